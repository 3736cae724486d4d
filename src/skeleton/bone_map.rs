//! 骨骼映射表
//!
//! 三套骨骼坐标的互译：
//! - required 索引：本次求值实际需要的骨骼子集（LOD 决定，可能稀疏）
//! - 目标全索引：处理器使用的稠密骨架索引
//! - 源骨骼名：资产时代的名称对应

use super::Skeleton;

// ============================================================================
// required 骨骼映射
// ============================================================================

/// required 索引 → 目标全索引 的有序映射
///
/// 按 required 序列的插入顺序保存；required 索引天然唯一，无重复键。
/// LOD 变化导致 required 集合变化时整表重建，从不增量修改。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequiredBoneMap {
    pairs: Vec<(usize, usize)>,
}

impl RequiredBoneMap {
    /// 构建 required → 目标全索引映射
    ///
    /// `required` 中的 None 哨兵与越界索引被静默跳过。
    /// 空输入得到空映射，本身不是错误；处理器是否就绪由调用方另行检查。
    pub fn build(required: &[Option<usize>], target: &Skeleton) -> Self {
        let mut pairs = Vec::with_capacity(required.len());
        for (required_index, target_index) in required.iter().enumerate() {
            let Some(target_index) = *target_index else {
                continue;
            };
            if target_index >= target.bone_count() {
                continue;
            }
            pairs.push((required_index, target_index));
        }
        Self { pairs }
    }

    /// 从已有映射对构建（调用方自证有效性）
    pub fn from_pairs(pairs: Vec<(usize, usize)>) -> Self {
        Self { pairs }
    }

    #[inline]
    pub fn pairs(&self) -> &[(usize, usize)] {
        &self.pairs
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

// ============================================================================
// 名称映射
// ============================================================================

/// 按名称精确匹配解析 源骨骼 → 目标骨骼 对应
///
/// 返回以目标骨骼索引下标的表：`result[target] = Some(source)`。
/// 直接拷贝路径据此得知哪个目标骨骼接收哪个源骨骼的变换；
/// 未匹配的源骨骼被丢弃，未匹配的目标骨骼为 None。
pub fn resolve_by_name(source: &Skeleton, target: &Skeleton) -> Vec<Option<usize>> {
    let mut map = vec![None; target.bone_count()];
    for source_index in 0..source.bone_count() {
        let Some(name) = source.bone_name(source_index) else {
            continue;
        };
        if let Some(target_index) = target.find_bone_by_name(name) {
            map[target_index] = Some(source_index);
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::{BoneDef, BoneTransform};

    fn skeleton(names: &[(&str, Option<usize>)]) -> Skeleton {
        Skeleton::new(
            names
                .iter()
                .map(|(name, parent)| BoneDef::new(*name, *parent, BoneTransform::IDENTITY))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_required_map_idempotent() {
        let target = skeleton(&[("Root", None), ("Spine", Some(0)), ("Head", Some(1))]);
        let required = vec![Some(0), None, Some(2)];

        let first = RequiredBoneMap::build(&required, &target);
        let second = RequiredBoneMap::build(&required, &target);

        // 相同输入两次构建结果逐项一致
        assert_eq!(first, second);
        assert_eq!(first.pairs(), &[(0, 0), (2, 2)]);
    }

    #[test]
    fn test_required_map_skips_sentinel_and_out_of_range() {
        let target = skeleton(&[("Root", None), ("Spine", Some(0))]);
        let required = vec![Some(1), None, Some(7)];

        let map = RequiredBoneMap::build(&required, &target);
        assert_eq!(map.pairs(), &[(0, 1)]);
    }

    #[test]
    fn test_required_map_full_replacement() {
        let target = skeleton(&[("Root", None), ("Spine", Some(0))]);
        let map = RequiredBoneMap::build(&[Some(0), Some(1)], &target);
        assert_eq!(map.len(), 2);

        // 重建完全替换，不叠加
        let map = RequiredBoneMap::build(&[Some(1)], &target);
        assert_eq!(map.pairs(), &[(0, 1)]);
    }

    #[test]
    fn test_resolve_by_name_drops_unmatched() {
        let source = skeleton(&[("Root", None), ("Spine", Some(0)), ("Head", Some(1))]);
        let target = skeleton(&[
            ("Root", None),
            ("Spine1", Some(0)),
            ("Spine2", Some(1)),
            ("Head", Some(2)),
        ]);

        let map = resolve_by_name(&source, &target);
        assert_eq!(map, vec![Some(0), None, None, Some(2)]);
    }
}
