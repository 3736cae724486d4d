//! CCD 链求解器
//!
//! 迭代式逐关节求解：
//! - 每次迭代从靠近末端的关节向根遍历，绕关节把末端转向目标
//! - 单步旋转角受 max_angle_per_step 限制，避免姿态跳变
//! - 距离不再改善时回退到历史最优迭代结果后退出
//!
//! 收敛契约：至多 iterations 次迭代；末端与目标距离小于
//! tolerance × 链长 时提前退出；目标不可达时输出最优近似。

use glam::Quat;

use crate::skeleton::BoneTransform;

use super::{ChainSolver, IkGoal};

/// CCD 求解器
#[derive(Clone, Copy, Debug)]
pub struct CcdSolver {
    /// 最大迭代次数
    pub iterations: u32,
    /// 单关节单步最大旋转角（弧度）
    pub max_angle_per_step: f32,
    /// 收敛容差（相对链长）
    pub tolerance: f32,
}

impl Default for CcdSolver {
    fn default() -> Self {
        Self {
            iterations: 16,
            max_angle_per_step: std::f32::consts::FRAC_PI_4,
            tolerance: 1.0e-3,
        }
    }
}

impl CcdSolver {
    /// 绕链上第 joint 个关节旋转其后所有节段
    ///
    /// 关节自身位置不动，朝向与后续节段一起旋转，节段长度保持不变。
    fn rotate_from_joint(chain: &[usize], joint: usize, delta: Quat, pose: &mut [BoneTransform]) {
        let pivot = pose[chain[joint]].translation;
        for (offset, &bone) in chain.iter().enumerate().skip(joint) {
            if offset > joint {
                pose[bone].translation = pivot + delta * (pose[bone].translation - pivot);
            }
            pose[bone].rotation = (delta * pose[bone].rotation).normalize();
        }
    }

    fn chain_length(chain: &[usize], pose: &[BoneTransform]) -> f32 {
        chain
            .windows(2)
            .map(|w| (pose[w[1]].translation - pose[w[0]].translation).length())
            .sum()
    }
}

impl ChainSolver for CcdSolver {
    fn solve_chain(&self, chain: &[usize], goal: &IkGoal, pose: &mut [BoneTransform]) {
        if chain.len() < 2 {
            return;
        }
        if chain.iter().any(|&bone| bone >= pose.len()) {
            return;
        }

        let tip = *chain.last().unwrap_or(&0);
        let total_length = Self::chain_length(chain, pose);
        if total_length <= f32::EPSILON {
            return;
        }
        let tolerance = self.tolerance * total_length;

        // 历史最优（用于不收敛时回退）
        let mut best: Vec<BoneTransform> = chain.iter().map(|&bone| pose[bone]).collect();
        let mut best_distance = (pose[tip].translation - goal.position).length();

        for _ in 0..self.iterations {
            if best_distance <= tolerance {
                break;
            }

            // 从末端前一个关节向根逐关节修正
            for joint in (0..chain.len() - 1).rev() {
                let pivot = pose[chain[joint]].translation;
                let to_tip = pose[tip].translation - pivot;
                let to_goal = goal.position - pivot;

                let to_tip_dir = to_tip.normalize_or_zero();
                let to_goal_dir = to_goal.normalize_or_zero();
                if to_tip_dir.length_squared() < 1.0e-8 || to_goal_dir.length_squared() < 1.0e-8 {
                    continue;
                }

                let dot = to_tip_dir.dot(to_goal_dir).clamp(-1.0, 1.0);
                let angle = dot.acos();
                if angle < 1.0e-5 {
                    continue;
                }
                let angle = angle.min(self.max_angle_per_step);

                let axis = to_tip_dir.cross(to_goal_dir).normalize_or_zero();
                if axis.length_squared() < 1.0e-8 {
                    continue;
                }

                let delta = Quat::from_axis_angle(axis, angle);
                Self::rotate_from_joint(chain, joint, delta, pose);
            }

            let distance = (pose[tip].translation - goal.position).length();
            if distance < best_distance {
                best_distance = distance;
                for (slot, &bone) in best.iter_mut().zip(chain.iter()) {
                    *slot = pose[bone];
                }
            } else {
                // 不再改善：回退到最优结果并退出
                for (slot, &bone) in best.iter().zip(chain.iter()) {
                    pose[bone] = *slot;
                }
                break;
            }
        }

        // 末端朝向对齐目标
        pose[tip].rotation = goal.rotation.normalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    /// 竖直三节链：0 -(1)- 1 -(1)- 2
    fn straight_chain() -> Vec<BoneTransform> {
        vec![
            BoneTransform::from_translation(Vec3::ZERO),
            BoneTransform::from_translation(Vec3::Y),
            BoneTransform::from_translation(Vec3::Y * 2.0),
        ]
    }

    #[test]
    fn test_reaches_reachable_goal() {
        let mut pose = straight_chain();
        let goal = IkGoal {
            position: Vec3::new(1.0, 1.0, 0.0),
            rotation: Quat::IDENTITY,
        };

        CcdSolver::default().solve_chain(&[0, 1, 2], &goal, &mut pose);

        let distance = (pose[2].translation - goal.position).length();
        assert!(distance < 0.05, "末端距目标 {distance}");
    }

    #[test]
    fn test_preserves_segment_lengths() {
        let mut pose = straight_chain();
        let goal = IkGoal {
            position: Vec3::new(0.8, 1.2, 0.3),
            rotation: Quat::IDENTITY,
        };

        CcdSolver::default().solve_chain(&[0, 1, 2], &goal, &mut pose);

        let seg0 = (pose[1].translation - pose[0].translation).length();
        let seg1 = (pose[2].translation - pose[1].translation).length();
        assert!((seg0 - 1.0).abs() < 1e-4);
        assert!((seg1 - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_unreachable_goal_best_effort() {
        let mut pose = straight_chain();
        // 链长 2，目标在 4 之外：应尽量伸直指向目标
        let goal = IkGoal {
            position: Vec3::new(0.0, 4.0, 0.0),
            rotation: Quat::IDENTITY,
        };

        CcdSolver::default().solve_chain(&[0, 1, 2], &goal, &mut pose);

        let distance = (pose[2].translation - goal.position).length();
        assert!(distance < 2.1, "最优近似不应劣于初始姿态");
    }

    #[test]
    fn test_tip_rotation_matches_goal() {
        let mut pose = straight_chain();
        let goal = IkGoal {
            position: Vec3::new(1.0, 1.0, 0.0),
            rotation: Quat::from_rotation_z(0.5),
        };

        CcdSolver::default().solve_chain(&[0, 1, 2], &goal, &mut pose);
        assert!(pose[2].rotation.dot(goal.rotation).abs() > 1.0 - 1e-5);
    }

    #[test]
    fn test_ignores_degenerate_chain() {
        let mut pose = straight_chain();
        let before = pose.clone();
        let goal = IkGoal {
            position: Vec3::X,
            rotation: Quat::IDENTITY,
        };

        // 单骨骼与越界链都应原样返回
        CcdSolver::default().solve_chain(&[1], &goal, &mut pose);
        CcdSolver::default().solve_chain(&[0, 9], &goal, &mut pose);
        assert_eq!(pose, before);
    }
}
