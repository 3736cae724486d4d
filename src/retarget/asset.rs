//! 重定向配置资产
//!
//! 资产是纯数据；初始化时按实例整体复制（Clone），运行期调参只改副本，
//! 共享资产永不被运行时修改。持久化由外部资产系统负责。

use std::sync::Arc;

use bitflags::bitflags;
use glam::{Quat, Vec3};

use crate::skeleton::Skeleton;

use super::chain::BoneChainDef;

bitflags! {
    /// 启用的重定向阶段
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct RetargetPasses: u32 {
        /// 根骨骼重定向
        const ROOT = 1 << 0;
        /// FK 链重定向
        const FK = 1 << 1;
        /// IK 链修正
        const IK = 1 << 2;
    }
}

impl Default for RetargetPasses {
    fn default() -> Self {
        Self::IK
    }
}

/// FK 链旋转传递模式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RotationMode {
    /// 按链长参数插值采样源链
    #[default]
    Interpolated,
    /// 逐骨骼一对一（超出部分取源链末端）
    OneToOne,
    /// 不传递旋转（保持参考姿态）
    None,
}

/// FK 链平移传递模式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TranslationMode {
    /// 不传递平移（沿用参考姿态的本地偏移）
    #[default]
    None,
    /// 源平移按根骨骼比例缩放
    GloballyScaled,
    /// 直接使用源平移
    Absolute,
}

/// 单条链的重定向设置
#[derive(Clone, Debug)]
pub struct ChainSettings {
    /// 是否启用 FK 传递
    pub fk_enabled: bool,
    pub rotation_mode: RotationMode,
    pub rotation_alpha: f32,
    pub translation_mode: TranslationMode,
    pub translation_alpha: f32,

    /// 是否启用 IK 修正
    pub ik_enabled: bool,
    /// 是否驱动 IK 目标（关闭时目标取 FK 结果，等于不修正位置）
    pub drive_ik_goal: bool,
    /// 目标位置向源末端位置混合的总量
    pub blend_to_source: f32,
    /// 逐轴混合权重
    pub blend_to_source_weights: Vec3,
    /// 目标位置全局静态偏移
    pub static_offset: Vec3,
    /// 目标位置末端本地静态偏移
    pub static_local_offset: Vec3,
    /// 末端静态旋转偏移
    pub static_rotation_offset: Quat,
    /// 伸展系数（1.0 为原始长度）
    pub extension: f32,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            fk_enabled: false,
            rotation_mode: RotationMode::default(),
            rotation_alpha: 1.0,
            translation_mode: TranslationMode::default(),
            translation_alpha: 1.0,
            ik_enabled: true,
            drive_ik_goal: true,
            blend_to_source: 0.0,
            blend_to_source_weights: Vec3::ONE,
            static_offset: Vec3::ZERO,
            static_local_offset: Vec3::ZERO,
            static_rotation_offset: Quat::IDENTITY,
            extension: 1.0,
        }
    }
}

/// IK 目标定义
#[derive(Clone, Debug)]
pub struct IkGoalDef {
    /// 目标名
    pub name: String,
    /// 驱动的目标骨骼名（应为链末端）
    pub target_bone: String,
    /// 位置混合权重
    pub position_alpha: f32,
    /// 旋转混合权重
    pub rotation_alpha: f32,
}

impl IkGoalDef {
    pub fn new(name: impl Into<String>, target_bone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target_bone: target_bone.into(),
            position_alpha: 1.0,
            rotation_alpha: 1.0,
        }
    }
}

/// 源链 → 目标链 的配对
#[derive(Clone, Debug)]
pub struct ChainMapping {
    pub name: String,
    /// 未配对时为 None（该目标链不参与链式重定向）
    pub source_chain: Option<BoneChainDef>,
    pub target_chain: BoneChainDef,
    pub settings: ChainSettings,
}

/// 根骨骼重定向设置
#[derive(Clone, Debug)]
pub struct RootSettings {
    pub global_scale_horizontal: f32,
    pub global_scale_vertical: f32,
    /// 根位置向源位置混合
    pub blend_to_source: f32,
    pub static_offset: Vec3,
    pub static_rotation_offset: Quat,
}

impl Default for RootSettings {
    fn default() -> Self {
        Self {
            global_scale_horizontal: 1.0,
            global_scale_vertical: 1.0,
            blend_to_source: 0.0,
            static_offset: Vec3::ZERO,
            static_rotation_offset: Quat::IDENTITY,
        }
    }
}

/// 重定向配置资产
///
/// 初始化要求 source/target 骨架引用均已加载；任一缺失则初始化
/// 失败收敛为"未初始化"。
#[derive(Clone, Debug, Default)]
pub struct RetargetAsset {
    pub name: String,
    pub source_skeleton: Option<Arc<Skeleton>>,
    pub target_skeleton: Option<Arc<Skeleton>>,
    /// 源/目标根骨骼名（根骨骼重定向用，可缺省）
    pub source_root_bone: Option<String>,
    pub target_root_bone: Option<String>,
    pub chains: Vec<ChainMapping>,
    pub goals: Vec<IkGoalDef>,
    pub root_settings: RootSettings,
    pub passes: RetargetPasses,
    /// 编辑器实时预览：每次求值前把资产设置同步进处理器
    pub live_sync: bool,
}

impl RetargetAsset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passes: RetargetPasses::default(),
            ..Self::default()
        }
    }

    /// 按名称查找 IK 目标定义
    pub fn find_goal(&self, name: &str) -> Option<&IkGoalDef> {
        self.goals.iter().find(|goal| goal.name == name)
    }
}
