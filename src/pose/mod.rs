//! 姿态快照模块
//!
//! PoseSnapshot 每帧从源组件整体捕获一次，由所属节点独占持有：
//! 动画更新前写入，姿态求值时只读，不存在并发写者。

mod provider;

pub use provider::{
    capture_source_pose, CaptureOutcome, SourceHandle, SourcePoseProvider, SourceRegistry,
    UpdateRateInfo,
};

use crate::skeleton::BoneTransform;

/// 组件空间姿态快照
///
/// 不变式：长度等于采样骨架的骨骼数；要么整体有效，要么显式为空，
/// 不存在部分填充状态。
#[derive(Clone, Debug, Default)]
pub struct PoseSnapshot {
    transforms: Vec<BoneTransform>,
}

impl PoseSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// 整体替换快照内容（覆盖写，从不追加到旧数据）
    pub fn copy_from(&mut self, transforms: &[BoneTransform]) {
        self.transforms.clear();
        self.transforms.extend_from_slice(transforms);
    }

    /// 显式清空
    pub fn reset(&mut self) {
        self.transforms.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[BoneTransform] {
        &self.transforms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_copy_replaces_stale_contents() {
        let mut snapshot = PoseSnapshot::new();
        snapshot.copy_from(&[BoneTransform::from_translation(Vec3::X); 4]);
        assert_eq!(snapshot.len(), 4);

        // 覆盖写：旧内容不残留
        snapshot.copy_from(&[BoneTransform::from_translation(Vec3::Y); 2]);
        assert_eq!(snapshot.len(), 2);
        assert!((snapshot.as_slice()[0].translation - Vec3::Y).length() < 1e-6);

        // 显式清空
        snapshot.reset();
        assert!(snapshot.is_empty());
    }
}
