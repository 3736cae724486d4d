//! 数值 IK 链求解
//!
//! 求解器只做"修正"：在已有链姿态的基础上把末端拉向目标，
//! 保持链条原有的节段比例与次级细节，从不整条重算。

mod ccd;

pub use ccd::CcdSolver;

use glam::{Quat, Vec3};

use crate::skeleton::BoneTransform;

/// IK 目标变换（组件空间）
#[derive(Clone, Copy, Debug)]
pub struct IkGoal {
    pub position: Vec3,
    pub rotation: Quat,
}

/// 链求解器接口
///
/// 纯函数式调用：对本核心而言求解器不保留跨帧状态。
/// `chain` 为根→末端的目标骨骼索引序列，`pose` 为组件空间工作缓冲，
/// 求解器只允许修改链上骨骼。
pub trait ChainSolver: Send + Sync {
    fn solve_chain(&self, chain: &[usize], goal: &IkGoal, pose: &mut [BoneTransform]);
}
