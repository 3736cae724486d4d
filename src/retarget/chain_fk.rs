//! FK 链编解码
//!
//! 源链与目标链骨骼数可以不同：每根骨骼先按链长归一化出参数，
//! 解码时在源链上按参数采样，把旋转增量叠加到目标链的参考朝向上。
//! 这样源动画的相对细节得以保留，链条比例由目标骨架决定。

use glam::Vec3;

use crate::skeleton::{BoneTransform, Skeleton};
use crate::{RetargetError, Result};

use super::asset::{ChainSettings, RotationMode, TranslationMode};

const PARAM_EPSILON: f32 = 1.0e-4;

// ============================================================================
// 链姿态公共数据
// ============================================================================

/// 单条链的姿态缓存与长度参数
#[derive(Clone, Debug)]
struct ChainFk {
    initial_global: Vec<BoneTransform>,
    initial_local: Vec<BoneTransform>,
    current_global: Vec<BoneTransform>,
    /// 每骨骼沿链长的归一化参数 [0, 1]
    params: Vec<f32>,
    parent_index: Option<usize>,
    parent_initial_global: BoneTransform,
}

impl ChainFk {
    fn initialize(chain_name: &str, skeleton: &Skeleton, indices: &[usize]) -> Result<Self> {
        let ref_global = skeleton.ref_pose_global();

        let initial_global: Vec<BoneTransform> =
            indices.iter().map(|&bone| ref_global[bone]).collect();
        let initial_local = locals_of_chain(skeleton, ref_global, indices);
        let params = Self::bone_params(chain_name, &initial_global)?;

        let parent_index = skeleton.parent_of(indices[0]);
        let parent_initial_global = parent_index
            .map(|parent| ref_global[parent])
            .unwrap_or(BoneTransform::IDENTITY);

        Ok(Self {
            current_global: initial_global.clone(),
            initial_global,
            initial_local,
            params,
            parent_index,
            parent_initial_global,
        })
    }

    /// 按骨骼间距累计链长，归一化出每骨骼参数
    fn bone_params(chain_name: &str, initial_global: &[BoneTransform]) -> Result<Vec<f32>> {
        // 单骨骼链特例
        if initial_global.len() == 1 {
            return Ok(vec![1.0]);
        }

        let mut distances = Vec::with_capacity(initial_global.len());
        let mut total = 0.0f32;
        distances.push(0.0);
        for pair in initial_global.windows(2) {
            total += (pair[1].translation - pair[0].translation).length();
            distances.push(total);
        }

        // 骨骼全部重叠的链无法可靠重定向
        if total <= PARAM_EPSILON {
            return Err(RetargetError::ChainZeroLength {
                chain: chain_name.to_string(),
            });
        }

        Ok(distances.into_iter().map(|d| d / total).collect())
    }
}

/// 链内每骨骼相对其骨架父级的本地变换
fn locals_of_chain(
    skeleton: &Skeleton,
    global_pose: &[BoneTransform],
    indices: &[usize],
) -> Vec<BoneTransform> {
    indices
        .iter()
        .map(|&bone| match skeleton.parent_of(bone) {
            None => global_pose[bone],
            Some(parent) => global_pose[bone].relative_to(&global_pose[parent]),
        })
        .collect()
}

/// 按参数在链变换序列上插值采样
fn transform_at_param(
    transforms: &[BoneTransform],
    params: &[f32],
    param: f32,
) -> BoneTransform {
    if params.len() == 1 || param < PARAM_EPSILON {
        return transforms[0];
    }
    if param > 1.0 - PARAM_EPSILON {
        return *transforms.last().unwrap_or(&transforms[0]);
    }

    for index in 1..params.len() {
        let current = params[index];
        if current <= param {
            continue;
        }
        let prev = params[index - 1];
        let t = (param - prev) / (current - prev);
        return BoneTransform::blend(&transforms[index - 1], &transforms[index], t);
    }

    *transforms.last().unwrap_or(&transforms[0])
}

// ============================================================================
// 编码器（源链）
// ============================================================================

#[derive(Clone, Debug)]
pub(crate) struct ChainEncoderFk {
    chain: ChainFk,
    current_local: Vec<BoneTransform>,
}

impl ChainEncoderFk {
    pub(crate) fn initialize(
        chain_name: &str,
        skeleton: &Skeleton,
        indices: &[usize],
    ) -> Result<Self> {
        let chain = ChainFk::initialize(chain_name, skeleton, indices)?;
        let current_local = chain.initial_local.clone();
        Ok(Self {
            chain,
            current_local,
        })
    }

    /// 记录本帧源链的全局与本地姿态
    fn encode_pose(&mut self, skeleton: &Skeleton, indices: &[usize], source_global: &[BoneTransform]) {
        for (slot, &bone) in self.chain.current_global.iter_mut().zip(indices.iter()) {
            *slot = source_global[bone];
        }
        self.current_local = locals_of_chain(skeleton, source_global, indices);
    }

    /// 把整条源链重新挂到新的父变换下
    ///
    /// 目标父链先被重定向时源/目标会失配；以本地链形状 + 新父变换
    /// 重建全局，消除倾斜。
    fn reparent_chain(&mut self, new_parent: &BoneTransform) {
        for index in 0..self.chain.current_global.len() {
            let parent = if index == 0 {
                *new_parent
            } else {
                self.chain.current_global[index - 1]
            };
            self.chain.current_global[index] =
                BoneTransform::compose(&parent, &self.current_local[index]);
        }
    }
}

// ============================================================================
// 解码器（目标链）
// ============================================================================

#[derive(Clone, Debug)]
pub(crate) struct ChainDecoderFk {
    chain: ChainFk,
}

impl ChainDecoderFk {
    pub(crate) fn initialize(
        chain_name: &str,
        skeleton: &Skeleton,
        indices: &[usize],
    ) -> Result<Self> {
        Ok(Self {
            chain: ChainFk::initialize(chain_name, skeleton, indices)?,
        })
    }

    fn decode_pose(
        &mut self,
        settings: &ChainSettings,
        indices: &[usize],
        encoder: &mut ChainEncoderFk,
        skeleton: &Skeleton,
        scale_vector: Vec3,
        out_global: &mut [BoneTransform],
    ) {
        // 源链挂接到目标父链当前状态下
        let source_parent_delta = encoder
            .chain
            .parent_initial_global
            .relative_to(&self.chain.parent_initial_global);
        let target_parent_current = self
            .chain
            .parent_index
            .map(|parent| out_global[parent])
            .unwrap_or(BoneTransform::IDENTITY);
        let new_source_parent = BoneTransform::compose(&target_parent_current, &source_parent_delta);
        encoder.reparent_chain(&new_source_parent);

        let source_len = encoder.chain.current_global.len();

        for (chain_index, &bone) in indices.iter().enumerate() {
            let target_initial = self.chain.initial_global[chain_index];

            // 采样源链的当前/初始变换
            let (source_current, source_initial) = match settings.rotation_mode {
                RotationMode::Interpolated => {
                    let param = self.chain.params[chain_index];
                    (
                        transform_at_param(
                            &encoder.chain.current_global,
                            &encoder.chain.params,
                            param,
                        ),
                        transform_at_param(
                            &encoder.chain.initial_global,
                            &encoder.chain.params,
                            param,
                        ),
                    )
                }
                RotationMode::OneToOne => {
                    let source_index = chain_index.min(source_len - 1);
                    (
                        encoder.chain.current_global[source_index],
                        encoder.chain.initial_global[source_index],
                    )
                }
                RotationMode::None => {
                    let last = encoder.chain.initial_global[source_len - 1];
                    (last, last)
                }
            };

            // 旋转增量叠加到目标初始朝向
            let delta = source_current.rotation * source_initial.rotation.inverse();
            let rotation = (delta * target_initial.rotation).normalize();

            let parent_global = match skeleton.parent_of(bone) {
                Some(parent) => out_global[parent],
                None => BoneTransform::IDENTITY,
            };
            let translation = match settings.translation_mode {
                TranslationMode::None => {
                    // 沿用参考姿态的本地偏移，挂在当前父骨骼下
                    let local_offset = skeleton.ref_pose_local()[bone].translation;
                    parent_global
                        .to_matrix()
                        .transform_point3(local_offset)
                }
                TranslationMode::GloballyScaled => source_current.translation * scale_vector,
                TranslationMode::Absolute => source_current.translation,
            };

            let scale =
                source_current.scale + (target_initial.scale - source_initial.scale);

            out_global[bone] = BoneTransform::new(translation, rotation, scale);
        }

        // 最终按本地空间向参考姿态回混（alpha 接近 1 时跳过）
        let needs_blend = (settings.rotation_alpha - 1.0).abs() > PARAM_EPSILON
            || (settings.translation_alpha - 1.0).abs() > PARAM_EPSILON;
        if needs_blend {
            let new_locals = locals_of_chain(skeleton, out_global, indices);
            for (chain_index, &bone) in indices.iter().enumerate() {
                let initial_local = &self.chain.initial_local[chain_index];
                let mut local = new_locals[chain_index];
                local.translation = initial_local
                    .translation
                    .lerp(local.translation, settings.translation_alpha);
                local.rotation = initial_local
                    .rotation
                    .slerp(local.rotation, settings.rotation_alpha)
                    .normalize();

                let parent_global = match skeleton.parent_of(bone) {
                    Some(parent) => out_global[parent],
                    None => BoneTransform::IDENTITY,
                };
                out_global[bone] = BoneTransform::compose(&parent_global, &local);
            }
        }
    }
}

// ============================================================================
// 链对
// ============================================================================

/// 已初始化的 FK 链对
#[derive(Clone, Debug)]
pub(crate) struct FkChainPair {
    pub(crate) name: String,
    pub(crate) source_indices: Vec<usize>,
    pub(crate) target_indices: Vec<usize>,
    pub(crate) settings: ChainSettings,
    encoder: ChainEncoderFk,
    decoder: ChainDecoderFk,
}

impl FkChainPair {
    pub(crate) fn initialize(
        name: &str,
        source_indices: Vec<usize>,
        target_indices: Vec<usize>,
        settings: ChainSettings,
        source_skeleton: &Skeleton,
        target_skeleton: &Skeleton,
    ) -> Result<Self> {
        let encoder = ChainEncoderFk::initialize(name, source_skeleton, &source_indices)?;
        let decoder = ChainDecoderFk::initialize(name, target_skeleton, &target_indices)?;
        Ok(Self {
            name: name.to_string(),
            source_indices,
            target_indices,
            settings,
            encoder,
            decoder,
        })
    }

    /// 编码源链并解码到目标输出
    pub(crate) fn run(
        &mut self,
        source_skeleton: &Skeleton,
        target_skeleton: &Skeleton,
        source_global: &[BoneTransform],
        scale_vector: Vec3,
        out_global: &mut [BoneTransform],
    ) {
        self.encoder
            .encode_pose(source_skeleton, &self.source_indices, source_global);
        self.decoder.decode_pose(
            &self.settings,
            &self.target_indices,
            &mut self.encoder,
            target_skeleton,
            scale_vector,
            out_global,
        );
    }
}
