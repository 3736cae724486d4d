//! 骨架拓扑
//!
//! 骨架在网格资产加载时构建一次，之后只读共享。
//! 不变式：非根骨骼的父索引严格小于自身索引（拓扑序），
//! 因此按索引顺序一次遍历即可完成 local → global 的姿态传播。

use std::collections::HashMap;

use crate::{RetargetError, Result};

use super::BoneTransform;

/// 尚未缓存分支末端的占位值
const INVALID_BRANCH_INDEX: i32 = -2;

/// 构建骨架用的单骨骼描述
#[derive(Clone, Debug)]
pub struct BoneDef {
    /// 骨骼名（骨架内唯一）
    pub name: String,
    /// 父骨骼索引（None 表示根）
    pub parent: Option<usize>,
    /// 父相对参考姿态
    pub ref_local: BoneTransform,
}

impl BoneDef {
    pub fn new(name: impl Into<String>, parent: Option<usize>, ref_local: BoneTransform) -> Self {
        Self {
            name: name.into(),
            parent,
            ref_local,
        }
    }
}

/// 骨架拓扑 + 参考姿态
///
/// 构建后不可变，经 `Arc` 在多个处理器间共享。
#[derive(Debug)]
pub struct Skeleton {
    bone_names: Vec<String>,
    parent_indices: Vec<Option<usize>>,
    name_to_index: HashMap<String, usize>,
    ref_pose_local: Vec<BoneTransform>,
    ref_pose_global: Vec<BoneTransform>,
    /// 每骨骼子树的末端索引缓存（含自身后代的最大索引，叶节点为 -1）
    end_of_branch: Vec<i32>,
}

impl Skeleton {
    /// 从骨骼描述序列构建骨架
    ///
    /// 校验：非空、名称唯一、父索引满足拓扑序。
    pub fn new(bones: Vec<BoneDef>) -> Result<Self> {
        if bones.is_empty() {
            return Err(RetargetError::EmptySkeleton);
        }

        let mut bone_names = Vec::with_capacity(bones.len());
        let mut parent_indices = Vec::with_capacity(bones.len());
        let mut name_to_index = HashMap::with_capacity(bones.len());
        let mut ref_pose_local = Vec::with_capacity(bones.len());

        for (index, bone) in bones.into_iter().enumerate() {
            if name_to_index.contains_key(&bone.name) {
                return Err(RetargetError::DuplicateBoneName(bone.name));
            }
            if let Some(parent) = bone.parent {
                if parent >= index {
                    return Err(RetargetError::BadParentOrder {
                        bone: bone.name,
                        index,
                        parent,
                    });
                }
            }
            name_to_index.insert(bone.name.clone(), index);
            bone_names.push(bone.name);
            parent_indices.push(bone.parent);
            ref_pose_local.push(bone.ref_local);
        }

        let end_of_branch = Self::compute_end_of_branch(&parent_indices);

        let mut skeleton = Self {
            bone_names,
            parent_indices,
            name_to_index,
            ref_pose_global: ref_pose_local.clone(),
            ref_pose_local,
            end_of_branch,
        };

        // 参考姿态转到组件空间（根骨骼的本地变换即组件空间）
        let local = skeleton.ref_pose_local.clone();
        let mut global = local.clone();
        skeleton.update_global_below(0, &local, &mut global);
        skeleton.ref_pose_global = global;

        Ok(skeleton)
    }

    /// 预计算每骨骼的分支末端索引
    ///
    /// 拓扑序保证子树的索引是连续区间 [i+1, end]；
    /// 一旦遇到父索引不大于 i 父的骨骼即离开分支。
    fn compute_end_of_branch(parent_indices: &[Option<usize>]) -> Vec<i32> {
        let count = parent_indices.len();
        let mut cache = vec![INVALID_BRANCH_INDEX; count];

        for index in 0..count {
            if index == 0 {
                cache[0] = count as i32 - 1;
                continue;
            }

            cache[index] = -1;
            let start_parent = parent_indices[index];
            let mut bone = index + 1;
            while bone < count {
                let parent = parent_indices[bone];
                // 子树内所有骨骼的父都严格大于 start_parent
                let inside = match (parent, start_parent) {
                    (Some(p), Some(sp)) => p > sp,
                    (Some(_), None) => true,
                    (None, _) => false,
                };
                if !inside {
                    break;
                }
                cache[index] = bone as i32;
                bone += 1;
            }
        }

        cache
    }

    // ========================================
    // 访问器
    // ========================================

    #[inline]
    pub fn bone_count(&self) -> usize {
        self.bone_names.len()
    }

    #[inline]
    pub fn bone_name(&self, index: usize) -> Option<&str> {
        self.bone_names.get(index).map(String::as_str)
    }

    /// 按名称查找骨骼
    #[inline]
    pub fn find_bone_by_name(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    #[inline]
    pub fn parent_of(&self, index: usize) -> Option<usize> {
        self.parent_indices.get(index).copied().flatten()
    }

    #[inline]
    pub fn ref_pose_local(&self) -> &[BoneTransform] {
        &self.ref_pose_local
    }

    #[inline]
    pub fn ref_pose_global(&self) -> &[BoneTransform] {
        &self.ref_pose_global
    }

    /// 直接子骨骼
    pub fn children_of(&self, index: usize) -> Vec<usize> {
        let mut children = Vec::new();
        let Some(&end) = self.end_of_branch.get(index) else {
            return children;
        };
        if end < 0 {
            return children;
        }
        for child in index + 1..=end as usize {
            if self.parent_indices[child] == Some(index) {
                children.push(child);
            }
        }
        children
    }

    /// potential_parent 是否为 child 的祖先
    pub fn is_parent_of(&self, potential_parent: usize, child: usize) -> bool {
        let mut parent = self.parent_of(child);
        while let Some(p) = parent {
            if p == potential_parent {
                return true;
            }
            parent = self.parent_of(p);
        }
        false
    }

    // ========================================
    // 姿态空间转换
    // ========================================

    /// 单骨骼 local → global（根骨骼本身视为已在组件空间）
    pub fn update_global_of_single(
        &self,
        index: usize,
        local_pose: &[BoneTransform],
        global_pose: &mut [BoneTransform],
    ) {
        let Some(parent) = self.parent_of(index) else {
            return;
        };
        global_pose[index] = BoneTransform::compose(&global_pose[parent], &local_pose[index]);
    }

    /// 从 start 之后的所有骨骼按拓扑序重建组件空间姿态
    pub fn update_global_below(
        &self,
        start: usize,
        local_pose: &[BoneTransform],
        global_pose: &mut [BoneTransform],
    ) {
        debug_assert_eq!(local_pose.len(), self.bone_count());
        debug_assert_eq!(global_pose.len(), self.bone_count());
        for index in start + 1..global_pose.len() {
            self.update_global_of_single(index, local_pose, global_pose);
        }
    }

    /// 按参考姿态的本地变换，挂接到当前姿态的父骨骼下
    ///
    /// 用于无源映射骨骼的回退：保持层级一致地回到参考姿态。
    pub fn global_ref_pose_of_single(
        &self,
        index: usize,
        current_global: &[BoneTransform],
    ) -> BoneTransform {
        match self.parent_of(index) {
            None => self.ref_pose_local[index],
            Some(parent) => {
                BoneTransform::compose(&current_global[parent], &self.ref_pose_local[index])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn chain_skeleton() -> Skeleton {
        // Root - Spine - Head，每节向上 1 单位
        Skeleton::new(vec![
            BoneDef::new("Root", None, BoneTransform::IDENTITY),
            BoneDef::new(
                "Spine",
                Some(0),
                BoneTransform::from_translation(Vec3::Y),
            ),
            BoneDef::new("Head", Some(1), BoneTransform::from_translation(Vec3::Y)),
        ])
        .unwrap()
    }

    #[test]
    fn test_ref_pose_global() {
        let skeleton = chain_skeleton();
        assert_eq!(skeleton.bone_count(), 3);
        assert!((skeleton.ref_pose_global()[2].translation - Vec3::new(0.0, 2.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_rejects_bad_parent_order() {
        let result = Skeleton::new(vec![
            BoneDef::new("A", Some(1), BoneTransform::IDENTITY),
            BoneDef::new("B", None, BoneTransform::IDENTITY),
        ]);
        assert!(matches!(result, Err(RetargetError::BadParentOrder { .. })));
    }

    #[test]
    fn test_rejects_duplicate_name() {
        let result = Skeleton::new(vec![
            BoneDef::new("A", None, BoneTransform::IDENTITY),
            BoneDef::new("A", Some(0), BoneTransform::IDENTITY),
        ]);
        assert!(matches!(result, Err(RetargetError::DuplicateBoneName(_))));
    }

    #[test]
    fn test_children_and_ancestry() {
        // Root 下两条分支：Root -> A -> B, Root -> C
        let skeleton = Skeleton::new(vec![
            BoneDef::new("Root", None, BoneTransform::IDENTITY),
            BoneDef::new("A", Some(0), BoneTransform::IDENTITY),
            BoneDef::new("B", Some(1), BoneTransform::IDENTITY),
            BoneDef::new("C", Some(0), BoneTransform::IDENTITY),
        ])
        .unwrap();

        assert_eq!(skeleton.children_of(0), vec![1, 3]);
        assert_eq!(skeleton.children_of(1), vec![2]);
        assert!(skeleton.children_of(2).is_empty());
        assert!(skeleton.is_parent_of(0, 2));
        assert!(!skeleton.is_parent_of(1, 3));
    }

    #[test]
    fn test_global_ref_pose_follows_current_parent() {
        let skeleton = chain_skeleton();
        let mut pose = skeleton.ref_pose_global().to_vec();
        // 把 Spine 挪走，Head 的参考回退应挂在新位置下
        pose[1].translation = Vec3::new(5.0, 1.0, 0.0);
        let head = skeleton.global_ref_pose_of_single(2, &pose);
        assert!((head.translation - Vec3::new(5.0, 2.0, 0.0)).length() < 1e-6);
    }
}
