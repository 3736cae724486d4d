//! 骨骼姿态重定向运行时
//!
//! 核心流程（每帧一次）：
//! - `RetargetNode` 在动画更新前拷贝源组件的组件空间姿态快照
//! - `RetargetProcessor` 把快照映射到目标骨架：直接拷贝 → 参考姿态回退 → 链式 IK 修正
//! - 结果按 required bones 写回紧凑姿态并转换到父相对空间
//!
//! 初始化失败全部收敛到"未初始化"状态，热路径只会退化为参考姿态输出，
//! 不存在致命错误路径。

pub mod ik;
pub mod pose;
pub mod retarget;
pub mod skeleton;

use thiserror::Error;

/// 重定向错误类型
#[derive(Debug, Error)]
pub enum RetargetError {
    /// 骨架没有任何骨骼
    #[error("skeleton has no bones")]
    EmptySkeleton,

    /// 骨骼名称重复
    #[error("duplicate bone name: {0}")]
    DuplicateBoneName(String),

    /// 父骨骼索引必须小于自身索引（拓扑序）
    #[error("bone '{bone}' at index {index} has parent index {parent} out of topological order")]
    BadParentOrder {
        bone: String,
        index: usize,
        parent: usize,
    },

    /// 配置资产缺少骨架引用
    #[error("retarget asset has no {side} skeleton reference")]
    MissingSkeletonRef { side: &'static str },

    /// 骨骼链起止骨骼无法在目标骨架上解析
    #[error("bone chain '{chain}' could not resolve bone '{bone}'")]
    ChainResolve { chain: String, bone: String },

    /// 骨骼链全长过短，无法可靠重定向
    #[error("bone chain '{chain}' is too short to retarget")]
    ChainZeroLength { chain: String },
}

/// 统一 Result 别名
pub type Result<T> = std::result::Result<T, RetargetError>;

pub use ik::{CcdSolver, ChainSolver, IkGoal};
pub use pose::{
    capture_source_pose, CaptureOutcome, PoseSnapshot, SourceHandle, SourcePoseProvider,
    SourceRegistry, UpdateRateInfo,
};
pub use retarget::{
    BoneChainDef, ChainMapping, ChainSettings, CompactPose, EvaluateContext, IkGoalDef,
    PreUpdateContext, RetargetAsset, RetargetNode, RetargetPasses, RetargetProcessor,
    RootSettings, RotationMode, TranslationMode,
};
pub use skeleton::{resolve_by_name, BoneDef, BoneTransform, RequiredBoneMap, Skeleton};
