//! 骨架模块
//!
//! 核心设计思想：
//! - Skeleton: 不可变骨架拓扑（骨骼名 + 父索引 + 参考姿态），多处理器共享
//! - BoneTransform: 单骨骼刚体变换
//! - 骨骼映射表：required 索引 / 目标全索引 / 源骨骼名 三套坐标的互译

mod bone_map;
mod hierarchy;

pub use bone_map::{resolve_by_name, RequiredBoneMap};
pub use hierarchy::{BoneDef, Skeleton};

use glam::{Mat4, Quat, Vec3};

// ============================================================================
// 公共类型定义
// ============================================================================

/// 骨骼变换数据
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoneTransform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for BoneTransform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl BoneTransform {
    /// 单位变换
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn new(translation: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            translation,
            rotation,
            scale,
        }
    }

    /// 仅平移
    #[inline]
    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    /// 转换为 4x4 矩阵
    #[inline]
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    /// 从矩阵分解
    #[inline]
    pub fn from_matrix(m: Mat4) -> Self {
        let (scale, rotation, translation) = m.to_scale_rotation_translation();
        Self {
            translation,
            rotation,
            scale,
        }
    }

    /// 组合：global = parent ∘ local
    #[inline]
    pub fn compose(parent: &Self, local: &Self) -> Self {
        Self::from_matrix(parent.to_matrix() * local.to_matrix())
    }

    /// 相对变换：local = parent⁻¹ ∘ self
    #[inline]
    pub fn relative_to(&self, parent: &Self) -> Self {
        Self::from_matrix(parent.to_matrix().inverse() * self.to_matrix())
    }

    /// 插值：平移/缩放线性，旋转球面线性
    pub fn blend(from: &Self, to: &Self, alpha: f32) -> Self {
        Self {
            translation: from.translation.lerp(to.translation, alpha),
            rotation: from.rotation.slerp(to.rotation, alpha).normalize(),
            scale: from.scale.lerp(to.scale, alpha),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_relative_roundtrip() {
        let parent = BoneTransform::new(
            Vec3::new(1.0, 2.0, 3.0),
            Quat::from_rotation_y(0.7),
            Vec3::ONE,
        );
        let local = BoneTransform::new(
            Vec3::new(0.0, 1.5, 0.0),
            Quat::from_rotation_x(-0.3),
            Vec3::ONE,
        );

        let global = BoneTransform::compose(&parent, &local);
        let back = global.relative_to(&parent);

        // 往返后应恢复原本地变换
        assert!((back.translation - local.translation).length() < 1e-5);
        assert!(back.rotation.dot(local.rotation).abs() > 1.0 - 1e-5);
    }

    #[test]
    fn test_blend_endpoints() {
        let a = BoneTransform::from_translation(Vec3::X);
        let b = BoneTransform::from_translation(Vec3::Y * 2.0);

        assert!((BoneTransform::blend(&a, &b, 0.0).translation - a.translation).length() < 1e-6);
        assert!((BoneTransform::blend(&a, &b, 1.0).translation - b.translation).length() < 1e-6);
    }
}
