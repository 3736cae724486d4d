//! 重定向模块
//!
//! - asset: 可复制的重定向配置资产
//! - chain: 骨骼链定义与解析
//! - root / chain_fk / chain_ik: 根骨骼、FK 链、IK 链三类编解码
//! - processor: 持有配置与骨架对的帧级入口
//! - node: 每帧驱动状态机（初始化检查 → 快照捕获 → 求值输出）

mod asset;
mod chain;
mod chain_fk;
mod chain_ik;
mod node;
mod processor;
mod root;

pub use asset::{
    ChainMapping, ChainSettings, IkGoalDef, RetargetAsset, RetargetPasses, RootSettings,
    RotationMode, TranslationMode,
};
pub use chain::{BoneChainDef, ResolvedBoneChain};
pub use node::{CompactPose, EvaluateContext, PreUpdateContext, RetargetNode};
pub use processor::RetargetProcessor;
pub use root::RootRetargeter;
