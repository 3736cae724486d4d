//! IK 链编解码
//!
//! 编码端把源肢体的末端方向按初始长度归一化（伸展百分比），
//! 解码端用"目标链起点 + 归一化方向 × 目标初始长度"得到目标位置，
//! 因此不同比例的骨架会得到同等伸展程度的肢体，而不是同一个绝对点。

use glam::Vec3;

use crate::ik::IkGoal;
use crate::skeleton::BoneTransform;
use crate::{RetargetError, Result};

use super::asset::ChainSettings;

const LENGTH_EPSILON: f32 = 1.0e-4;

/// 源链编码状态
#[derive(Clone, Copy, Debug, Default)]
struct SourceChainIk {
    start_bone: usize,
    end_bone: usize,
    inv_initial_length: f32,
    current_end_position: Vec3,
    /// 起点→末端方向 × 当前伸展百分比
    current_end_direction_normalized: Vec3,
}

/// 目标链解码状态
#[derive(Clone, Copy, Debug, Default)]
struct TargetChainIk {
    start_bone: usize,
    end_bone: usize,
    initial_length: f32,
}

/// IK 链重定向器
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct IkChainRetargeter {
    source: SourceChainIk,
    target: TargetChainIk,
}

impl IkChainRetargeter {
    /// 初始化源侧：至少 3 节、初始长度非零
    pub(crate) fn initialize_source(
        chain_name: &str,
        indices: &[usize],
        initial_global: &[BoneTransform],
    ) -> Result<SourceSide> {
        if indices.len() < 3 {
            log::warn!(
                "[Retarget] IK 链 '{chain_name}' 源侧不足 3 节（{}），无法做 IK 重定向",
                indices.len()
            );
            return Err(RetargetError::ChainZeroLength {
                chain: chain_name.to_string(),
            });
        }

        let start_bone = indices[0];
        let end_bone = *indices.last().unwrap_or(&start_bone);
        let length = (initial_global[start_bone].translation
            - initial_global[end_bone].translation)
            .length();
        if length <= LENGTH_EPSILON {
            return Err(RetargetError::ChainZeroLength {
                chain: chain_name.to_string(),
            });
        }

        Ok(SourceSide(SourceChainIk {
            start_bone,
            end_bone,
            inv_initial_length: 1.0 / length,
            ..SourceChainIk::default()
        }))
    }

    /// 初始化目标侧：至少 3 节、初始长度非零
    pub(crate) fn initialize_target(
        chain_name: &str,
        indices: &[usize],
        initial_global: &[BoneTransform],
    ) -> Result<TargetSide> {
        if indices.len() < 3 {
            log::warn!(
                "[Retarget] IK 链 '{chain_name}' 目标侧不足 3 节（{}），无法做 IK 重定向",
                indices.len()
            );
            return Err(RetargetError::ChainZeroLength {
                chain: chain_name.to_string(),
            });
        }

        let start_bone = indices[0];
        let end_bone = *indices.last().unwrap_or(&start_bone);
        let length = (initial_global[start_bone].translation
            - initial_global[end_bone].translation)
            .length();
        if length <= LENGTH_EPSILON {
            return Err(RetargetError::ChainZeroLength {
                chain: chain_name.to_string(),
            });
        }

        Ok(TargetSide(TargetChainIk {
            start_bone,
            end_bone,
            initial_length: length,
        }))
    }

    pub(crate) fn new(source: SourceSide, target: TargetSide) -> Self {
        Self {
            source: source.0,
            target: target.0,
        }
    }

    /// 记录本帧源肢体的伸展状态
    pub(crate) fn encode_pose(&mut self, source_global: &[BoneTransform]) {
        let start = source_global[self.source.start_bone].translation;
        let end = source_global[self.source.end_bone].translation;

        let limb = end - start;
        let length = limb.length();
        let direction = limb.normalize_or_zero();
        // 伸展百分比：当前长度相对初始长度
        let normalized_length = length * self.source.inv_initial_length;

        self.source.current_end_position = end;
        self.source.current_end_direction_normalized = direction * normalized_length;
    }

    /// 由当前输出姿态与设置解算 IK 目标
    ///
    /// 末端旋转取输入姿态的末端朝向（FK 阶段已经转好），只追加
    /// 静态旋转偏移，避免双重旋转。
    pub(crate) fn decode_goal(
        &self,
        settings: &ChainSettings,
        current_global: &[BoneTransform],
    ) -> IkGoal {
        let input_end = &current_global[self.target.end_bone];
        let rotation = input_end.rotation;

        if !settings.drive_ik_goal {
            // 目标取上一阶段的结果：IK 不改变位置
            return IkGoal {
                position: input_end.translation,
                rotation,
            };
        }

        let goal_rotation = (rotation * settings.static_rotation_offset).normalize();

        // 位置 = 目标链起点 + 归一化方向 × 目标初始长度
        let start = current_global[self.target.start_bone].translation;
        let mut goal_position =
            start + self.source.current_end_direction_normalized * self.target.initial_length;

        // 向源末端绝对位置混合
        if settings.blend_to_source > LENGTH_EPSILON {
            let weight = settings.blend_to_source * settings.blend_to_source_weights;
            let source_end = self.source.current_end_position;
            goal_position.x = lerp(goal_position.x, source_end.x, weight.x);
            goal_position.y = lerp(goal_position.y, source_end.y, weight.y);
            goal_position.z = lerp(goal_position.z, source_end.z, weight.z);
        }

        goal_position += settings.static_offset;
        goal_position += goal_rotation * settings.static_local_offset;

        // 伸展系数
        if (settings.extension - 1.0).abs() > LENGTH_EPSILON {
            goal_position = start + (goal_position - start) * settings.extension;
        }

        IkGoal {
            position: goal_position,
            rotation: goal_rotation,
        }
    }

    #[inline]
    pub(crate) fn target_end_bone(&self) -> usize {
        self.target.end_bone
    }
}

/// 初始化产物的新类型包装，防止源/目标侧传反
#[derive(Clone, Copy, Debug)]
pub(crate) struct SourceSide(SourceChainIk);

#[derive(Clone, Copy, Debug)]
pub(crate) struct TargetSide(TargetChainIk);

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}
