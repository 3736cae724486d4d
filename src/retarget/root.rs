//! 根骨骼重定向
//!
//! 源根位置按初始高度归一化后乘以目标初始高度，使不同身高的
//! 骨架得到等比的根运动；旋转传递的是相对初始朝向的增量。
//! 世界为 Y 轴朝上。

use glam::{Quat, Vec3};

use crate::skeleton::{BoneTransform, Skeleton};

use super::asset::RootSettings;

/// 源侧根状态
#[derive(Clone, Copy, Debug, Default)]
struct RootSource {
    bone_index: usize,
    initial_rotation: Quat,
    inv_initial_height: f32,
    current_position: Vec3,
    current_position_normalized: Vec3,
    current_rotation: Quat,
}

/// 目标侧根状态
#[derive(Clone, Copy, Debug, Default)]
struct RootTarget {
    bone_index: usize,
    initial_height: f32,
    initial_position: Vec3,
    initial_rotation: Quat,
}

/// 根骨骼编解码器
#[derive(Clone, Copy, Debug, Default)]
pub struct RootRetargeter {
    source: RootSource,
    target: RootTarget,
}

impl RootRetargeter {
    /// 初始化源侧；根骨骼名解析失败返回 None
    pub fn initialize(
        source_root: &str,
        target_root: &str,
        source: &Skeleton,
        target: &Skeleton,
    ) -> Option<Self> {
        let source_index = source.find_bone_by_name(source_root)?;
        let target_index = target.find_bone_by_name(target_root)?;

        let source_initial = source.ref_pose_global()[source_index];
        let mut initial_height = source_initial.translation.y;
        if initial_height < 1.0e-4 {
            // 根设在骨架实际根而非骨盆时高度会贴地，避免除零
            log::warn!("[Retarget] 源根骨骼 '{source_root}' 几乎贴地，高度按 1.0 处理");
            initial_height = 1.0;
        }

        let target_initial = target.ref_pose_global()[target_index];

        Some(Self {
            source: RootSource {
                bone_index: source_index,
                initial_rotation: source_initial.rotation,
                inv_initial_height: 1.0 / initial_height,
                ..RootSource::default()
            },
            target: RootTarget {
                bone_index: target_index,
                initial_height: target_initial.translation.y,
                initial_position: target_initial.translation,
                initial_rotation: target_initial.rotation,
            },
        })
    }

    #[inline]
    pub fn target_bone_index(&self) -> usize {
        self.target.bone_index
    }

    /// FK 链 GloballyScaled 平移模式使用的比例向量
    #[inline]
    pub fn global_scale_vector(&self, settings: &RootSettings) -> Vec3 {
        Vec3::new(
            settings.global_scale_horizontal,
            settings.global_scale_vertical,
            settings.global_scale_horizontal,
        ) * (self.target.initial_height * self.source.inv_initial_height)
    }

    /// 记录本帧源根状态
    pub fn encode_pose(&mut self, source_global: &[BoneTransform]) {
        let transform = &source_global[self.source.bone_index];
        self.source.current_position = transform.translation;
        self.source.current_position_normalized =
            transform.translation * self.source.inv_initial_height;
        self.source.current_rotation = transform.rotation;
    }

    /// 写出目标根变换
    pub fn decode_pose(&self, settings: &RootSettings, out_global: &mut [BoneTransform]) {
        // 归一化位置按目标高度还原，垂直分量单独缩放
        let mut retargeted = self.source.current_position_normalized * self.target.initial_height;
        retargeted.y *= settings.global_scale_vertical;

        // 水平偏移整体缩放
        let offset = (retargeted - self.target.initial_position)
            * Vec3::new(
                settings.global_scale_horizontal,
                1.0,
                settings.global_scale_horizontal,
            );
        retargeted = self.target.initial_position + offset;

        let mut position = retargeted.lerp(self.source.current_position, settings.blend_to_source);
        position += settings.static_offset;

        // 旋转增量叠加到目标初始朝向
        let delta = self.source.current_rotation * self.source.initial_rotation.inverse();
        let rotation = settings.static_rotation_offset * (delta * self.target.initial_rotation);

        let root = &mut out_global[self.target.bone_index];
        root.translation = position;
        root.rotation = rotation.normalize();
    }
}
