//! 重定向处理器
//!
//! 持有按实例复制的配置与 (源网格, 目标网格) 骨架对，暴露唯一的
//! 帧级入口 `run_retargeter`。状态机只有未初始化/已初始化两态：
//! 初始化是同步的、全有或全无的；任何一步失败都停留在未初始化。
//!
//! 求值管线：
//! 1. 直接拷贝：名称匹配的目标骨骼原样接收源变换（组件空间）
//! 2. 参考回退：无匹配的骨骼按参考姿态挂接到当前父骨骼下
//! 3. 根骨骼 / FK 链 / IK 链修正（按配置启用）

use std::sync::Arc;

use glam::Vec3;

use crate::ik::{CcdSolver, ChainSolver, IkGoal};
use crate::pose::PoseSnapshot;
use crate::skeleton::{resolve_by_name, BoneTransform, Skeleton};
use crate::{RetargetError, Result};

use super::asset::{ChainSettings, IkGoalDef, RetargetAsset, RetargetPasses};
use super::chain::ResolvedBoneChain;
use super::chain_fk::FkChainPair;
use super::chain_ik::IkChainRetargeter;
use super::root::RootRetargeter;

/// 已初始化的 IK 链对
struct IkChainPair {
    name: String,
    target_indices: Vec<usize>,
    settings: ChainSettings,
    goal: IkGoalDef,
    retargeter: IkChainRetargeter,
}

/// 重定向处理器
pub struct RetargetProcessor {
    initialized: bool,
    /// 成功初始化的代数（配置变更检测用）
    init_generation: u64,

    /// 按实例复制的配置副本；运行期只改这份
    asset: Option<RetargetAsset>,
    /// 初始化时的共享资产身份（只用于身份比较）
    asset_identity: Option<Arc<RetargetAsset>>,

    source_skeleton: Option<Arc<Skeleton>>,
    target_skeleton: Option<Arc<Skeleton>>,

    /// 目标骨骼 → 源骨骼 的名称映射
    name_map: Vec<Option<usize>>,
    /// 被某个阶段"锚定"的骨骼：直接拷贝 / 链内 / 根。
    /// 其余骨骼每个阶段后都按参考姿态重新挂接到父骨骼下。
    anchored: Vec<bool>,

    root: Option<RootRetargeter>,
    fk_chains: Vec<FkChainPair>,
    ik_chains: Vec<IkChainPair>,
    solver: Box<dyn ChainSolver>,

    output_pose: Vec<BoneTransform>,
}

impl Default for RetargetProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl RetargetProcessor {
    pub fn new() -> Self {
        Self {
            initialized: false,
            init_generation: 0,
            asset: None,
            asset_identity: None,
            source_skeleton: None,
            target_skeleton: None,
            name_map: Vec::new(),
            anchored: Vec::new(),
            root: None,
            fk_chains: Vec::new(),
            ik_chains: Vec::new(),
            solver: Box::new(CcdSolver::default()),
            output_pose: Vec::new(),
        }
    }

    /// 替换数值链求解器
    pub fn set_chain_solver(&mut self, solver: Box<dyn ChainSolver>) {
        self.solver = solver;
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// 成功初始化的次数
    #[inline]
    pub fn init_generation(&self) -> u64 {
        self.init_generation
    }

    /// 请求下次重新初始化
    pub fn set_needs_initialized(&mut self) {
        self.initialized = false;
    }

    /// 上次 run_retargeter 的输出（目标骨架组件空间）
    #[inline]
    pub fn output(&self) -> &[BoneTransform] {
        &self.output_pose
    }

    /// 是否仍对应当前的 (源网格, 目标网格, 资产) 三元组
    pub fn was_initialized_with(
        &self,
        source_mesh: &Arc<Skeleton>,
        target_mesh: &Arc<Skeleton>,
        asset: &Arc<RetargetAsset>,
    ) -> bool {
        if !self.initialized {
            return false;
        }
        let source_matches = self
            .source_skeleton
            .as_ref()
            .is_some_and(|s| Arc::ptr_eq(s, source_mesh));
        let target_matches = self
            .target_skeleton
            .as_ref()
            .is_some_and(|t| Arc::ptr_eq(t, target_mesh));
        let asset_matches = self
            .asset_identity
            .as_ref()
            .is_some_and(|a| Arc::ptr_eq(a, asset));
        source_matches && target_matches && asset_matches
    }

    /// 是否针对当前求值的目标网格初始化（过期初始化保护）
    pub fn was_initialized_with_target(&self, target_mesh: &Arc<Skeleton>) -> bool {
        self.initialized
            && self
                .target_skeleton
                .as_ref()
                .is_some_and(|t| Arc::ptr_eq(t, target_mesh))
    }

    // ========================================
    // 初始化
    // ========================================

    /// 针对具体骨架对初始化
    ///
    /// 全有或全无：任一失败都返回 Err 且处理器停留在未初始化。
    /// 配置资产被整体复制，之后的运行期调参不触碰共享资产。
    pub fn initialize(
        &mut self,
        source_mesh: &Arc<Skeleton>,
        target_mesh: &Arc<Skeleton>,
        asset: &Arc<RetargetAsset>,
    ) -> Result<()> {
        self.initialized = false;

        // 重置全部派生数据
        self.source_skeleton = None;
        self.target_skeleton = None;
        self.name_map.clear();
        self.anchored.clear();
        self.root = None;
        self.fk_chains.clear();
        self.ik_chains.clear();

        // 按实例复制配置
        let duplicate = (**asset).clone();
        if duplicate.source_skeleton.is_none() {
            return Err(RetargetError::MissingSkeletonRef { side: "source" });
        }
        if duplicate.target_skeleton.is_none() {
            return Err(RetargetError::MissingSkeletonRef { side: "target" });
        }

        // 名称映射与锚定标记
        self.name_map = resolve_by_name(source_mesh, target_mesh);
        self.anchored = self.name_map.iter().map(Option::is_some).collect();

        // 根骨骼（可缺省：失败只告警，根阶段不参与）
        if duplicate.passes.contains(RetargetPasses::ROOT) {
            if let (Some(source_root), Some(target_root)) =
                (&duplicate.source_root_bone, &duplicate.target_root_bone)
            {
                self.root =
                    RootRetargeter::initialize(source_root, target_root, source_mesh, target_mesh);
                match &self.root {
                    Some(root) => self.anchored[root.target_bone_index()] = true,
                    None => log::warn!(
                        "[Retarget] 根骨骼 '{source_root}' / '{target_root}' 解析失败，跳过根重定向"
                    ),
                }
            }
        }

        // 链配对
        for mapping in &duplicate.chains {
            // 目标链解析失败属于初始化失败（收敛为未初始化）
            let target_chain = ResolvedBoneChain::resolve(&mapping.target_chain, target_mesh);
            if !target_chain.is_valid() {
                let bone = if target_chain.found_start {
                    &mapping.target_chain.end_bone
                } else {
                    &mapping.target_chain.start_bone
                };
                return Err(RetargetError::ChainResolve {
                    chain: mapping.name.clone(),
                    bone: bone.clone(),
                });
            }

            // 未配对源链：该目标链不参与链式重定向
            let Some(source_def) = &mapping.source_chain else {
                continue;
            };
            let source_chain = ResolvedBoneChain::resolve(source_def, source_mesh);
            if !source_chain.is_valid() {
                log::warn!(
                    "[Retarget] 链 '{}' 源侧 '{}' 在源骨架上解析失败，跳过该链",
                    mapping.name,
                    source_def.name
                );
                continue;
            }

            // FK 链
            if duplicate.passes.contains(RetargetPasses::FK) && mapping.settings.fk_enabled {
                match FkChainPair::initialize(
                    &mapping.name,
                    source_chain.indices.clone(),
                    target_chain.indices.clone(),
                    mapping.settings.clone(),
                    source_mesh,
                    target_mesh,
                ) {
                    Ok(pair) => {
                        for &bone in &pair.target_indices {
                            self.anchored[bone] = true;
                        }
                        self.fk_chains.push(pair);
                    }
                    Err(err) => {
                        log::warn!("[Retarget] FK 链 '{}' 初始化失败: {err}", mapping.name);
                    }
                }
            }

            // IK 链（需要链定义里关联的目标）
            if duplicate.passes.contains(RetargetPasses::IK) && mapping.settings.ik_enabled {
                let Some(goal_name) = &mapping.target_chain.ik_goal else {
                    continue;
                };
                let Some(goal) = duplicate.find_goal(goal_name) else {
                    log::warn!(
                        "[Retarget] 链 '{}' 引用的 IK 目标 '{goal_name}' 不存在，跳过 IK",
                        mapping.name
                    );
                    continue;
                };

                let source_side = IkChainRetargeter::initialize_source(
                    &mapping.name,
                    &source_chain.indices,
                    source_mesh.ref_pose_global(),
                );
                let target_side = IkChainRetargeter::initialize_target(
                    &mapping.name,
                    &target_chain.indices,
                    target_mesh.ref_pose_global(),
                );
                match (source_side, target_side) {
                    (Ok(source_side), Ok(target_side)) => {
                        for &bone in &target_chain.indices {
                            self.anchored[bone] = true;
                        }
                        self.ik_chains.push(IkChainPair {
                            name: mapping.name.clone(),
                            target_indices: target_chain.indices.clone(),
                            settings: mapping.settings.clone(),
                            goal: goal.clone(),
                            retargeter: IkChainRetargeter::new(source_side, target_side),
                        });
                    }
                    _ => {
                        log::warn!("[Retarget] IK 链 '{}' 初始化失败，跳过 IK", mapping.name);
                    }
                }
            }
        }

        // 按目标链起始骨骼排序，保证父链先于子链解码
        self.fk_chains
            .sort_by_key(|pair| pair.target_indices.first().copied().unwrap_or(usize::MAX));
        self.ik_chains
            .sort_by_key(|pair| pair.target_indices.first().copied().unwrap_or(usize::MAX));

        // 缓存身份与输出缓冲
        self.source_skeleton = Some(source_mesh.clone());
        self.target_skeleton = Some(target_mesh.clone());
        self.asset_identity = Some(asset.clone());
        self.output_pose = target_mesh.ref_pose_global().to_vec();
        self.asset = Some(duplicate);

        self.initialized = true;
        self.init_generation += 1;
        log::info!(
            "[Retarget] 初始化完成: {} 根名称映射, {} 条 FK 链, {} 条 IK 链",
            self.name_map.iter().filter(|m| m.is_some()).count(),
            self.fk_chains.len(),
            self.ik_chains.len()
        );
        Ok(())
    }

    /// 实时预览：把共享资产的当前设置同步进本实例副本
    pub fn copy_settings_from_asset(&mut self, shared: &RetargetAsset) {
        let Some(duplicate) = self.asset.as_mut() else {
            return;
        };
        duplicate.root_settings = shared.root_settings.clone();
        duplicate.goals = shared.goals.clone();
        for mapping in duplicate.chains.iter_mut() {
            if let Some(live) = shared
                .chains
                .iter()
                .find(|candidate| candidate.name == mapping.name)
            {
                mapping.settings = live.settings.clone();
            }
        }
        // 链对持有的设置副本同样刷新；目标定义以实时值覆盖
        for pair in self.fk_chains.iter_mut() {
            if let Some(live) = shared
                .chains
                .iter()
                .find(|candidate| candidate.name == pair.name)
            {
                pair.settings = live.settings.clone();
            }
        }
        for pair in self.ik_chains.iter_mut() {
            if let Some(live) = shared
                .chains
                .iter()
                .find(|candidate| candidate.name == pair.name)
            {
                pair.settings = live.settings.clone();
            }
            if let Some(live) = shared.goals.iter().find(|g| g.name == pair.goal.name) {
                pair.goal = live.clone();
            }
        }
    }

    // ========================================
    // 帧级入口
    // ========================================

    /// 把源姿态快照重定向为目标骨架的组件空间姿态
    ///
    /// 前置条件：处理器已初始化（由节点负责检查）。
    /// 输出长度恒等于目标骨骼数，每根骨骼都被某个阶段赋值。
    pub fn run_retargeter(&mut self, source_pose: &PoseSnapshot) -> &[BoneTransform] {
        debug_assert!(self.initialized, "run_retargeter 只能在初始化后调用");

        let (Some(source_skeleton), Some(target_skeleton), Some(asset)) = (
            self.source_skeleton.as_ref(),
            self.target_skeleton.as_ref(),
            self.asset.as_ref(),
        ) else {
            return &self.output_pose;
        };

        let source = source_pose.as_slice();
        if source.len() != source_skeleton.bone_count() {
            log::warn!(
                "[Retarget] 快照长度 {} 与源骨骼数 {} 不一致，输出参考姿态",
                source.len(),
                source_skeleton.bone_count()
            );
            self.output_pose.clear();
            self.output_pose
                .extend_from_slice(target_skeleton.ref_pose_global());
            return &self.output_pose;
        }

        // 从参考姿态出发
        let mut out = std::mem::take(&mut self.output_pose);
        out.clear();
        out.extend_from_slice(target_skeleton.ref_pose_global());

        // 1. 直接拷贝：名称匹配的骨骼原样接收源变换
        for (target_index, source_index) in self.name_map.iter().enumerate() {
            if let Some(source_index) = *source_index {
                out[target_index] = source[source_index];
            }
        }
        // 2. 参考回退：无匹配骨骼按参考姿态挂到当前父骨骼下
        refresh_unanchored(target_skeleton, &self.anchored, &mut out);

        // 3. 根骨骼
        if asset.passes.contains(RetargetPasses::ROOT) {
            if let Some(root) = self.root.as_mut() {
                root.encode_pose(source);
                root.decode_pose(&asset.root_settings, &mut out);
                refresh_unanchored(target_skeleton, &self.anchored, &mut out);
            }
        }

        // 4. FK 链
        if asset.passes.contains(RetargetPasses::FK) && !self.fk_chains.is_empty() {
            let scale_vector = match self.root.as_ref() {
                Some(root) => root.global_scale_vector(&asset.root_settings),
                None => Vec3::ONE,
            };
            for pair in self.fk_chains.iter_mut() {
                pair.run(
                    source_skeleton,
                    target_skeleton,
                    source,
                    scale_vector,
                    &mut out,
                );
            }
            refresh_unanchored(target_skeleton, &self.anchored, &mut out);
        }

        // 5. IK 链修正：只纠正已有结果的末端触达，保留次级细节
        if asset.passes.contains(RetargetPasses::IK) && !self.ik_chains.is_empty() {
            for pair in self.ik_chains.iter_mut() {
                pair.retargeter.encode_pose(source);
                let decoded = pair.retargeter.decode_goal(&pair.settings, &out);

                // 目标的 alpha 权重：向解码结果混合
                let end_bone = pair.retargeter.target_end_bone();
                let input_end = out[end_bone];
                let goal = IkGoal {
                    position: input_end
                        .translation
                        .lerp(decoded.position, pair.goal.position_alpha),
                    rotation: input_end
                        .rotation
                        .slerp(decoded.rotation, pair.goal.rotation_alpha)
                        .normalize(),
                };

                self.solver
                    .solve_chain(&pair.target_indices, &goal, &mut out);
            }
            refresh_unanchored(target_skeleton, &self.anchored, &mut out);
        }

        self.output_pose = out;
        &self.output_pose
    }
}

/// 未被任何阶段锚定的骨骼：按参考姿态挂接到当前父骨骼下
///
/// 拓扑序遍历保证父骨骼先于子骨骼得到最终变换。
fn refresh_unanchored(skeleton: &Skeleton, anchored: &[bool], out: &mut [BoneTransform]) {
    for index in 0..out.len() {
        if anchored[index] {
            continue;
        }
        out[index] = skeleton.global_ref_pose_of_single(index, out);
    }
}
