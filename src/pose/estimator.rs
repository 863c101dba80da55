use anyhow::Result;

use super::keypoint::PoseObservation;

/// 1フレームから姿勢を推定する外部コラボレーター
///
/// `Ok(None)` は人物が検出されなかったフレーム、`Err` は推定失敗。
/// どちらの場合もそのフレームはスキップされ、再試行はしない。
pub trait PoseEstimator {
    type Frame;

    fn estimate(&mut self, frame: &Self::Frame) -> Result<Option<PoseObservation>>;
}

/// 推定済みの姿勢をそのまま流す推定器（外部で推定した姿勢や合成ポーズ用）
#[derive(Debug, Default, Clone, Copy)]
pub struct PrecomputedPoses;

impl PoseEstimator for PrecomputedPoses {
    type Frame = Option<PoseObservation>;

    fn estimate(&mut self, frame: &Option<PoseObservation>) -> Result<Option<PoseObservation>> {
        Ok(frame.clone())
    }
}
