//! 源姿态提供者
//!
//! 直接读取另一个组件"当前"的组件空间变换会在更新率不同或源本帧
//! 尚未更新时拿到不一致数据。这里的捕获策略只有在缓存数组与目标
//! 更新率参数完全一致时才走缓存，否则回退到总是正确的实时数组，
//! 以放弃优化换取正确性。

use std::sync::Arc;

use crate::skeleton::{BoneTransform, Skeleton};

use super::PoseSnapshot;

// ============================================================================
// 更新率信息
// ============================================================================

/// 更新率优化参数
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateRateInfo {
    /// 是否启用更新率优化
    pub enabled: bool,
    /// 更新率分组（同组组件共享同一节拍）
    pub group: u32,
    /// 是否使用外部插值
    pub external_interpolation: bool,
}

impl UpdateRateInfo {
    /// 两份参数是否完全一致（缓存共享的前提）
    #[inline]
    pub fn matches(&self, other: &UpdateRateInfo) -> bool {
        self == other
    }
}

// ============================================================================
// 提供者接口
// ============================================================================

/// 源姿态提供者
///
/// 对应一个活动的骨骼网格组件：暴露注册状态、骨架引用、
/// 实时/缓存两套组件空间变换数组，以及可选的主姿态重定向。
pub trait SourcePoseProvider {
    /// 当前是否注册并参与更新
    fn is_active(&self) -> bool;

    /// 骨架引用（未设置网格时为 None）
    fn skeleton(&self) -> Option<Arc<Skeleton>>;

    /// 主姿态重定向：若本组件由另一组件驱动，返回其句柄
    fn master(&self) -> Option<SourceHandle> {
        None
    }

    /// 实时组件空间变换数组（本帧直接计算的结果）
    fn live_pose(&self) -> &[BoneTransform];

    /// 更新率优化缓存数组（可能与实时数组不同步）
    fn cached_pose(&self) -> Option<&[BoneTransform]> {
        None
    }

    /// 本组件的更新率参数
    fn update_rate(&self) -> UpdateRateInfo {
        UpdateRateInfo::default()
    }
}

// ============================================================================
// 注册表与句柄
// ============================================================================

/// 带代数校验的弱句柄
///
/// 非拥有观察者：持有者随时可以询问"是否仍然有效"，
/// 槽位复用后旧句柄因代数不匹配而失效。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceHandle {
    index: u32,
    generation: u32,
}

struct SourceSlot {
    generation: u32,
    provider: Option<Box<dyn SourcePoseProvider>>,
}

/// 源组件注册表
///
/// 生命周期由外部系统管理；节点只持有 SourceHandle，从不拥有组件。
#[derive(Default)]
pub struct SourceRegistry {
    slots: Vec<SourceSlot>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册提供者，返回其句柄
    pub fn register(&mut self, provider: Box<dyn SourcePoseProvider>) -> SourceHandle {
        // 复用已释放的槽位
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.provider.is_none() {
                slot.generation = slot.generation.wrapping_add(1);
                slot.provider = Some(provider);
                return SourceHandle {
                    index: index as u32,
                    generation: slot.generation,
                };
            }
        }

        self.slots.push(SourceSlot {
            generation: 0,
            provider: Some(provider),
        });
        SourceHandle {
            index: self.slots.len() as u32 - 1,
            generation: 0,
        }
    }

    /// 注销提供者；旧句柄从此失效
    pub fn unregister(&mut self, handle: SourceHandle) -> Option<Box<dyn SourcePoseProvider>> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.provider.take()
    }

    /// 解析句柄（代数不匹配或已注销返回 None）
    pub fn get(&self, handle: SourceHandle) -> Option<&dyn SourcePoseProvider> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.provider.as_deref()
    }

    /// 句柄是否仍指向活动槽位
    #[inline]
    pub fn is_live(&self, handle: SourceHandle) -> bool {
        self.get(handle).is_some()
    }
}

// ============================================================================
// 快照捕获
// ============================================================================

/// 捕获结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// 快照已整体刷新
    Captured,
    /// 本帧不可用（可恢复，下一帧重试），旧状态未动
    NotReady,
    /// 源已失效/注销：调用方应清除源骨架记忆，强制下次重新初始化
    SourceLost,
}

/// 从源组件捕获组件空间姿态快照
///
/// 捕获策略：
/// 1. 无句柄 → 不产生快照，旧状态不动
/// 2. 句柄失效或源未激活 → 跳帧并要求调用方清除骨架记忆
/// 3. 主姿态重定向后再次校验骨架与激活状态
/// 4. 更新率参数与目标完全一致、启用外部插值、缓存长度吻合时读缓存，
///    否则读实时数组
/// 5. 快照整体覆盖写入
pub fn capture_source_pose(
    registry: &SourceRegistry,
    handle: Option<SourceHandle>,
    target_rate: &UpdateRateInfo,
    out: &mut PoseSnapshot,
) -> CaptureOutcome {
    let Some(handle) = handle else {
        return CaptureOutcome::NotReady;
    };

    // 源已注销或停止更新：强制下个有效帧重走初始化
    let Some(direct) = registry.get(handle) else {
        return CaptureOutcome::SourceLost;
    };
    if !direct.is_active() {
        return CaptureOutcome::SourceLost;
    }

    // 主姿态重定向
    let provider = match direct.master() {
        Some(master) => match registry.get(master) {
            Some(p) => p,
            None => return CaptureOutcome::NotReady,
        },
        None => direct,
    };

    // 重定向后再校验
    let Some(skeleton) = provider.skeleton() else {
        return CaptureOutcome::NotReady;
    };
    if !provider.is_active() {
        return CaptureOutcome::NotReady;
    }

    let live = provider.live_pose();
    if live.len() != skeleton.bone_count() {
        log::warn!(
            "[Retarget] 源姿态长度 {} 与骨架骨骼数 {} 不一致，跳过本帧捕获",
            live.len(),
            skeleton.bone_count()
        );
        return CaptureOutcome::NotReady;
    }

    // 缓存数组仅在与目标节拍完全一致时才安全
    let source_rate = provider.update_rate();
    let chosen = match provider.cached_pose() {
        Some(cached)
            if source_rate.enabled
                && source_rate.matches(target_rate)
                && source_rate.external_interpolation
                && cached.len() == live.len() =>
        {
            cached
        }
        _ => live,
    };

    out.copy_from(chosen);
    CaptureOutcome::Captured
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::BoneDef;
    use glam::Vec3;

    /// 测试替身：实时/缓存数组各放可区分的哨兵值
    struct TestProvider {
        skeleton: Option<Arc<Skeleton>>,
        active: bool,
        master: Option<SourceHandle>,
        live: Vec<BoneTransform>,
        cached: Option<Vec<BoneTransform>>,
        rate: UpdateRateInfo,
    }

    impl SourcePoseProvider for TestProvider {
        fn is_active(&self) -> bool {
            self.active
        }
        fn skeleton(&self) -> Option<Arc<Skeleton>> {
            self.skeleton.clone()
        }
        fn master(&self) -> Option<SourceHandle> {
            self.master
        }
        fn live_pose(&self) -> &[BoneTransform] {
            &self.live
        }
        fn cached_pose(&self) -> Option<&[BoneTransform]> {
            self.cached.as_deref()
        }
        fn update_rate(&self) -> UpdateRateInfo {
            self.rate
        }
    }

    fn two_bone_skeleton() -> Arc<Skeleton> {
        Arc::new(
            Skeleton::new(vec![
                BoneDef::new("Root", None, BoneTransform::IDENTITY),
                BoneDef::new("Tip", Some(0), BoneTransform::from_translation(Vec3::Y)),
            ])
            .unwrap(),
        )
    }

    const LIVE_SENTINEL: f32 = 11.0;
    const CACHE_SENTINEL: f32 = 77.0;

    fn provider(rate: UpdateRateInfo, with_cache: bool) -> TestProvider {
        TestProvider {
            skeleton: Some(two_bone_skeleton()),
            active: true,
            master: None,
            live: vec![BoneTransform::from_translation(Vec3::splat(LIVE_SENTINEL)); 2],
            cached: with_cache
                .then(|| vec![BoneTransform::from_translation(Vec3::splat(CACHE_SENTINEL)); 2]),
            rate,
        }
    }

    fn captured_sentinel(
        registry: &SourceRegistry,
        handle: SourceHandle,
        target_rate: &UpdateRateInfo,
    ) -> f32 {
        let mut snapshot = PoseSnapshot::new();
        let outcome = capture_source_pose(registry, Some(handle), target_rate, &mut snapshot);
        assert_eq!(outcome, CaptureOutcome::Captured);
        snapshot.as_slice()[0].translation.x
    }

    #[test]
    fn test_cache_selected_when_rates_match() {
        let rate = UpdateRateInfo {
            enabled: true,
            group: 3,
            external_interpolation: true,
        };
        let mut registry = SourceRegistry::new();
        let handle = registry.register(Box::new(provider(rate, true)));

        assert_eq!(captured_sentinel(&registry, handle, &rate), CACHE_SENTINEL);
    }

    #[test]
    fn test_live_selected_when_any_condition_fails() {
        let rate = UpdateRateInfo {
            enabled: true,
            group: 3,
            external_interpolation: true,
        };

        // 分组不同
        let other_group = UpdateRateInfo { group: 4, ..rate };
        let mut registry = SourceRegistry::new();
        let handle = registry.register(Box::new(provider(rate, true)));
        assert_eq!(
            captured_sentinel(&registry, handle, &other_group),
            LIVE_SENTINEL
        );

        // 未启用优化
        let mut registry = SourceRegistry::new();
        let disabled = UpdateRateInfo {
            enabled: false,
            ..rate
        };
        let handle = registry.register(Box::new(provider(disabled, true)));
        assert_eq!(
            captured_sentinel(&registry, handle, &disabled),
            LIVE_SENTINEL
        );

        // 无外部插值
        let mut registry = SourceRegistry::new();
        let no_interp = UpdateRateInfo {
            external_interpolation: false,
            ..rate
        };
        let handle = registry.register(Box::new(provider(no_interp, true)));
        assert_eq!(
            captured_sentinel(&registry, handle, &no_interp),
            LIVE_SENTINEL
        );

        // 缓存长度不一致
        let mut registry = SourceRegistry::new();
        let mut p = provider(rate, true);
        p.cached.as_mut().unwrap().pop();
        let handle = registry.register(Box::new(p));
        assert_eq!(captured_sentinel(&registry, handle, &rate), LIVE_SENTINEL);
    }

    #[test]
    fn test_no_handle_leaves_prior_state() {
        let mut snapshot = PoseSnapshot::new();
        snapshot.copy_from(&[BoneTransform::from_translation(Vec3::X)]);

        let registry = SourceRegistry::new();
        let outcome =
            capture_source_pose(&registry, None, &UpdateRateInfo::default(), &mut snapshot);

        assert_eq!(outcome, CaptureOutcome::NotReady);
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_unregistered_source_is_lost() {
        let mut registry = SourceRegistry::new();
        let handle = registry.register(Box::new(provider(UpdateRateInfo::default(), false)));
        registry.unregister(handle);

        let mut snapshot = PoseSnapshot::new();
        let outcome = capture_source_pose(
            &registry,
            Some(handle),
            &UpdateRateInfo::default(),
            &mut snapshot,
        );
        assert_eq!(outcome, CaptureOutcome::SourceLost);
    }

    #[test]
    fn test_inactive_source_is_lost() {
        let mut registry = SourceRegistry::new();
        let mut p = provider(UpdateRateInfo::default(), false);
        p.active = false;
        let handle = registry.register(Box::new(p));

        let mut snapshot = PoseSnapshot::new();
        let outcome = capture_source_pose(
            &registry,
            Some(handle),
            &UpdateRateInfo::default(),
            &mut snapshot,
        );
        assert_eq!(outcome, CaptureOutcome::SourceLost);
    }

    #[test]
    fn test_master_redirect() {
        let mut registry = SourceRegistry::new();

        // 主组件带缓存哨兵，但未启用优化 → 读主组件的实时数组
        let master_handle = registry.register(Box::new(provider(UpdateRateInfo::default(), false)));

        let mut follower = provider(UpdateRateInfo::default(), false);
        follower.master = Some(master_handle);
        follower.live = vec![BoneTransform::from_translation(Vec3::splat(-1.0)); 2];
        let follower_handle = registry.register(Box::new(follower));

        assert_eq!(
            captured_sentinel(&registry, follower_handle, &UpdateRateInfo::default()),
            LIVE_SENTINEL
        );
    }

    #[test]
    fn test_generation_invalidates_reused_slot() {
        let mut registry = SourceRegistry::new();
        let old = registry.register(Box::new(provider(UpdateRateInfo::default(), false)));
        registry.unregister(old);
        let new = registry.register(Box::new(provider(UpdateRateInfo::default(), false)));

        // 槽位复用后旧句柄失效，新句柄有效
        assert!(!registry.is_live(old));
        assert!(registry.is_live(new));
    }
}
