//! 骨骼链定义与解析
//!
//! 链是目标骨架上从起始骨骼到末端骨骼的一段连续层级，
//! 解析时从末端沿父链上行收集索引，再反转为根→末端顺序。

use crate::skeleton::Skeleton;

/// 骨骼链定义（资产数据）
#[derive(Clone, Debug)]
pub struct BoneChainDef {
    pub name: String,
    pub start_bone: String,
    pub end_bone: String,
    /// 关联的 IK 目标名（无目标的链只做 FK）
    pub ik_goal: Option<String>,
}

impl BoneChainDef {
    pub fn new(
        name: impl Into<String>,
        start_bone: impl Into<String>,
        end_bone: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            start_bone: start_bone.into(),
            end_bone: end_bone.into(),
            ik_goal: None,
        }
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.ik_goal = Some(goal.into());
        self
    }
}

/// 在具体骨架上解析后的骨骼链
#[derive(Clone, Debug, Default)]
pub struct ResolvedBoneChain {
    /// 根→末端顺序的骨骼索引；解析失败时为空
    pub indices: Vec<usize>,
    pub found_start: bool,
    pub found_end: bool,
    /// 末端是否为起始骨骼本身或其后代
    pub end_is_start_or_child: bool,
}

impl ResolvedBoneChain {
    /// 解析链定义
    pub fn resolve(def: &BoneChainDef, skeleton: &Skeleton) -> Self {
        let mut resolved = Self::default();

        let start = skeleton.find_bone_by_name(&def.start_bone);
        let end = skeleton.find_bone_by_name(&def.end_bone);
        resolved.found_start = start.is_some();
        resolved.found_end = end.is_some();

        let (Some(start), Some(end)) = (start, end) else {
            return resolved;
        };
        if end < start {
            return resolved;
        }

        // 单骨骼链
        if end == start {
            resolved.indices = vec![end];
            resolved.end_is_start_or_child = true;
            return resolved;
        }

        // 从末端向根收集
        let mut indices = vec![end];
        let mut parent = skeleton.parent_of(end);
        while let Some(p) = parent {
            if p < start {
                break;
            }
            indices.push(p);
            parent = skeleton.parent_of(p);
        }

        // 上行途中必须恰好经过起始骨骼
        if indices.last() == Some(&start) {
            indices.reverse();
            resolved.indices = indices;
            resolved.end_is_start_or_child = true;
        }

        resolved
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.indices.is_empty()
    }
}
