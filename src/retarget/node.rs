//! 重定向节点（每帧驱动状态机）
//!
//! 职责划分：
//! - `pre_update`（主线程，姿态求值前）：校验 (源组件, 源网格, 目标网格,
//!   资产) 四元组身份，失配时惰性重建处理器初始化，然后同步捕获
//!   源姿态快照
//! - `evaluate`（可能在工作线程）：只读快照与处理器，任何未就绪条件
//!   都退化为参考姿态直通输出
//!
//! 快照由节点独占：pre_update 写、同帧 evaluate 读，不存在其他写者。
//! 引脚驱动的源组件切换因此固定延迟一帧生效。

use std::sync::Arc;

use crate::pose::{
    capture_source_pose, CaptureOutcome, PoseSnapshot, SourceHandle, SourceRegistry,
    UpdateRateInfo,
};
use crate::skeleton::{BoneTransform, RequiredBoneMap, Skeleton};

use super::asset::RetargetAsset;
use super::processor::RetargetProcessor;

// ============================================================================
// 求值上下文
// ============================================================================

/// pre_update 所需的外部状态
pub struct PreUpdateContext<'a> {
    pub registry: &'a SourceRegistry,
    /// 当前求值的目标网格骨架
    pub target_mesh: &'a Arc<Skeleton>,
    /// 目标侧更新率参数（决定能否读源的缓存数组）
    pub update_rate: UpdateRateInfo,
    /// 目标组件的挂接父组件（若父组件是骨骼网格）
    pub attach_parent: Option<SourceHandle>,
}

/// evaluate 所需的外部状态
pub struct EvaluateContext<'a> {
    pub target_mesh: &'a Arc<Skeleton>,
    /// 本次求值实际需要的骨骼（目标全索引；None 为哨兵占位）
    pub required_bones: &'a [Option<usize>],
}

// ============================================================================
// 紧凑输出姿态
// ============================================================================

/// required 骨骼的父相对空间输出
#[derive(Clone, Debug, Default)]
pub struct CompactPose {
    transforms: Vec<BoneTransform>,
}

impl CompactPose {
    pub fn new() -> Self {
        Self::default()
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

    /// 整体重置为参考姿态（本地空间）
    pub fn reset_to_ref_pose(&mut self, required: &[Option<usize>], skeleton: &Skeleton) {
        self.transforms.clear();
        self.transforms.reserve(required.len());
        for entry in required {
            let transform = entry
                .and_then(|bone| skeleton.ref_pose_local().get(bone).copied())
                .unwrap_or(BoneTransform::IDENTITY);
            self.transforms.push(transform);
        }
    }

    /// 把组件空间的重定向结果经映射表写入，并转换为父相对空间
    ///
    /// 越界的 required 序号或在输出里没有对应项的目标索引保持
    /// 先前内容（参考姿态），绝不写入未初始化数据。
    pub fn apply_retargeted(
        &mut self,
        map: &RequiredBoneMap,
        retargeted: &[BoneTransform],
        skeleton: &Skeleton,
    ) {
        for &(required_index, target_index) in map.pairs() {
            if required_index >= self.transforms.len() {
                continue;
            }
            if target_index >= retargeted.len() {
                continue;
            }
            let local = match skeleton.parent_of(target_index) {
                None => retargeted[target_index],
                Some(parent) if parent < retargeted.len() => {
                    retargeted[target_index].relative_to(&retargeted[parent])
                }
                Some(_) => continue,
            };
            self.transforms[required_index] = local;
        }
    }
}

// ============================================================================
// 节点
// ============================================================================

/// 重定向节点
///
/// 所有硬失败都被限制在初始化阶段；热路径上的任何未就绪状态只会
/// 让输出退回参考姿态，下一帧自动重试。
pub struct RetargetNode {
    asset: Option<Arc<RetargetAsset>>,
    /// 显式接线的源组件
    source: Option<SourceHandle>,
    /// 未显式接线时尝试用目标的挂接父组件作为源
    use_attached_parent: bool,

    processor: Option<RetargetProcessor>,

    /// 身份缓存四元组（网格按 Arc 身份比较）
    cached_source_mesh: Option<Arc<Skeleton>>,
    cached_target_mesh: Option<Arc<Skeleton>>,
    cached_asset: Option<Arc<RetargetAsset>>,

    snapshot: PoseSnapshot,
    /// 本会话是否已捕获过快照（求值先于首次 pre_update 的保护）
    snapshot_valid: bool,

    required_map: RequiredBoneMap,
    cached_required: Vec<Option<usize>>,
}

impl Default for RetargetNode {
    fn default() -> Self {
        Self::new()
    }
}

impl RetargetNode {
    pub fn new() -> Self {
        Self {
            asset: None,
            source: None,
            use_attached_parent: true,
            processor: None,
            cached_source_mesh: None,
            cached_target_mesh: None,
            cached_asset: None,
            snapshot: PoseSnapshot::new(),
            snapshot_valid: false,
            required_map: RequiredBoneMap::default(),
            cached_required: Vec::new(),
        }
    }

    pub fn set_asset(&mut self, asset: Option<Arc<RetargetAsset>>) {
        self.asset = asset;
    }

    pub fn set_source(&mut self, source: Option<SourceHandle>) {
        self.source = source;
    }

    pub fn set_use_attached_parent(&mut self, enabled: bool) {
        self.use_attached_parent = enabled;
    }

    #[inline]
    pub fn processor(&self) -> Option<&RetargetProcessor> {
        self.processor.as_ref()
    }

    // ========================================
    // 每帧更新（主线程）
    // ========================================

    /// 姿态求值前调用：确保初始化并捕获源快照
    pub fn pre_update(&mut self, ctx: &PreUpdateContext) {
        // 未指定资产：节点完全惰性，求值时输出参考姿态
        if self.asset.is_none() {
            return;
        }

        // 惰性构建处理器
        if self.processor.is_none() {
            self.processor = Some(RetargetProcessor::new());
        }

        self.ensure_initialized(ctx);

        // 初始化成功后才捕获快照
        let initialized = self
            .processor
            .as_ref()
            .is_some_and(RetargetProcessor::is_initialized);
        if initialized {
            let handle = self.resolve_source(ctx);
            match capture_source_pose(ctx.registry, handle, &ctx.update_rate, &mut self.snapshot)
            {
                CaptureOutcome::Captured => self.snapshot_valid = true,
                CaptureOutcome::NotReady => {}
                CaptureOutcome::SourceLost => {
                    // 源注销/停用：清除源骨架记忆，下个有效帧重新初始化
                    self.cached_source_mesh = None;
                }
            }
        }
    }

    /// 解析源组件句柄：显式接线优先，其次目标的挂接父组件
    fn resolve_source(&self, ctx: &PreUpdateContext) -> Option<SourceHandle> {
        match self.source {
            Some(handle) => Some(handle),
            None if self.use_attached_parent => ctx.attach_parent,
            None => None,
        }
    }

    fn ensure_initialized(&mut self, ctx: &PreUpdateContext) {
        let Some(asset) = self.asset.clone() else {
            return;
        };

        let Some(handle) = self.resolve_source(ctx) else {
            // 没有可用源：停留在未就绪，每帧重试
            return;
        };

        // 句柄失效：清除记忆，下帧重试
        let Some(provider) = ctx.registry.get(handle) else {
            self.cached_source_mesh = None;
            return;
        };
        // 主姿态重定向后的最终骨架才是真正的源网格
        let provider = match provider.master() {
            Some(master) => match ctx.registry.get(master) {
                Some(master_provider) => master_provider,
                None => return,
            },
            None => provider,
        };
        let Some(source_mesh) = provider.skeleton() else {
            return;
        };

        // 身份比较：四元组完全一致则初始化为空操作
        let unchanged = self
            .cached_source_mesh
            .as_ref()
            .is_some_and(|cached| Arc::ptr_eq(cached, &source_mesh))
            && self
                .cached_target_mesh
                .as_ref()
                .is_some_and(|cached| Arc::ptr_eq(cached, ctx.target_mesh))
            && self
                .cached_asset
                .as_ref()
                .is_some_and(|cached| Arc::ptr_eq(cached, &asset));
        if unchanged {
            return;
        }

        if let Some(processor) = self.processor.as_mut() {
            if let Err(err) = processor.initialize(&source_mesh, ctx.target_mesh, &asset) {
                log::warn!("[Retarget] 处理器初始化失败: {err}");
            }
        }

        // 无论成败都更新缓存：同一组无效输入不会每帧重试；
        // 输入真正变化时身份比较会再次触发
        self.cached_source_mesh = Some(source_mesh);
        self.cached_target_mesh = Some(ctx.target_mesh.clone());
        self.cached_asset = Some(asset);
    }

    // ========================================
    // 姿态求值（可能在工作线程）
    // ========================================

    /// 求值输出：重定向结果或参考姿态直通
    pub fn evaluate(&mut self, ctx: &EvaluateContext, out: &mut CompactPose) {
        // required 集合变化（如 LOD 切换）时整表重建
        if self.cached_required != ctx.required_bones {
            self.required_map = RequiredBoneMap::build(ctx.required_bones, ctx.target_mesh);
            self.cached_required = ctx.required_bones.to_vec();
        }

        // 任何未就绪条件 → 参考姿态直通
        out.reset_to_ref_pose(ctx.required_bones, ctx.target_mesh);

        let Some(asset) = self.asset.as_ref() else {
            return;
        };
        let Some(processor) = self.processor.as_mut() else {
            return;
        };
        if !processor.is_initialized() {
            return;
        }
        // 过期初始化保护：目标网格已更换但尚未重新初始化
        if !processor.was_initialized_with_target(ctx.target_mesh) {
            return;
        }
        // 尚未捕获过快照（求值赶在首次 pre_update 之前）
        if !self.snapshot_valid {
            return;
        }

        // 实时预览：把共享资产的当前设置同步进处理器副本
        if asset.live_sync {
            processor.copy_settings_from_asset(asset);
        }

        processor.run_retargeter(&self.snapshot);

        let processor = match self.processor.as_ref() {
            Some(processor) => processor,
            None => return,
        };
        out.apply_retargeted(&self.required_map, processor.output(), ctx.target_mesh);
    }
}
