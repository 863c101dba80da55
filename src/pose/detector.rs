use anyhow::{Context, Result};
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

use super::estimator::PoseEstimator;
use super::keypoint::{Keypoint, KeypointIndex, PoseObservation};

/// MoveNet の出力キーポイント数
pub const MOVENET_KEYPOINT_COUNT: usize = 17;

/// COCO-18 の各スロットに対応する MoveNet インデックス（Neck は合成するので None）
const MOVENET_SOURCE: [Option<usize>; KeypointIndex::COUNT] = [
    Some(0),  // Nose
    None,     // Neck
    Some(6),  // RightShoulder
    Some(8),  // RightElbow
    Some(10), // RightWrist
    Some(5),  // LeftShoulder
    Some(7),  // LeftElbow
    Some(9),  // LeftWrist
    Some(12), // RightHip
    Some(14), // RightKnee
    Some(16), // RightAnkle
    Some(11), // LeftHip
    Some(13), // LeftKnee
    Some(15), // LeftAnkle
    Some(2),  // RightEye
    Some(1),  // LeftEye
    Some(4),  // RightEar
    Some(3),  // LeftEar
];

const MOVENET_LEFT_SHOULDER: usize = 5;
const MOVENET_RIGHT_SHOULDER: usize = 6;

/// MoveNet の17キーポイントを COCO-18 レイアウトに並べ替える
///
/// Neck は左右の肩の中点、信頼度は低い方の肩の値。
pub fn remap_movenet(raw: &[Keypoint; MOVENET_KEYPOINT_COUNT]) -> PoseObservation {
    let ls = raw[MOVENET_LEFT_SHOULDER];
    let rs = raw[MOVENET_RIGHT_SHOULDER];
    let neck = Keypoint::new(
        (ls.x + rs.x) / 2.0,
        (ls.y + rs.y) / 2.0,
        ls.confidence.min(rs.confidence),
    );

    let keypoints = std::array::from_fn(|i| match MOVENET_SOURCE[i] {
        Some(src) => raw[src],
        None => neck,
    });

    PoseObservation::new(keypoints)
}

/// ONNXモデルのセッションを作成（cuda フィーチャー有効時は CUDA を試す）
pub(crate) fn load_session(model_path: &Path) -> Result<Session> {
    let builder = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "cuda")]
    let builder = {
        log::info!("[ort] Attempting CUDA execution provider...");
        builder.with_execution_providers([ort::execution_providers::CUDAExecutionProvider::default().build()])?
    };

    builder
        .commit_from_file(model_path)
        .with_context(|| format!("Failed to load ONNX model {}", model_path.display()))
}

/// MoveNet を使用した姿勢検出器
pub struct MoveNetDetector {
    session: Session,
    min_pose_confidence: f32,
}

impl MoveNetDetector {
    /// ONNXモデルを読み込んで初期化
    pub fn new<P: AsRef<Path>>(model_path: P, min_pose_confidence: f32) -> Result<Self> {
        let session = load_session(model_path.as_ref())?;

        Ok(Self {
            session,
            min_pose_confidence,
        })
    }

    /// 前処理済みテンソルから姿勢を検出
    ///
    /// 入力: [1, 192, 192, 3] の f32 テンソル
    /// 出力: MoveNet 順の17キーポイント
    pub fn detect(&mut self, input: Array4<f32>) -> Result<[Keypoint; MOVENET_KEYPOINT_COUNT]> {
        let input_tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs!["serving_default_input_0" => input_tensor])
            .context("Inference failed")?;

        // MoveNet の出力は [1, 1, 17, 3] (y, x, confidence)
        let output: ndarray::ArrayViewD<f32> = outputs["StatefulPartitionedCall_0"]
            .try_extract_array()
            .context("Failed to extract output tensor")?;

        if output.shape() != [1, 1, MOVENET_KEYPOINT_COUNT, 3] {
            anyhow::bail!("Unexpected MoveNet output shape {:?}", output.shape());
        }

        let mut keypoints = [Keypoint::default(); MOVENET_KEYPOINT_COUNT];
        for (i, kp) in keypoints.iter_mut().enumerate() {
            let y = output[[0, 0, i, 0]];
            let x = output[[0, 0, i, 1]];
            let confidence = output[[0, 0, i, 2]];
            *kp = Keypoint::new(x, y, confidence);
        }

        Ok(keypoints)
    }
}

impl PoseEstimator for MoveNetDetector {
    type Frame = Array4<f32>;

    fn estimate(&mut self, frame: &Array4<f32>) -> Result<Option<PoseObservation>> {
        let raw = self.detect(frame.clone())?;
        let observation = remap_movenet(&raw);

        // 平均信頼度が低い場合は人物なしとみなす
        if observation.average_confidence() < self.min_pose_confidence {
            return Ok(None);
        }
        Ok(Some(observation))
    }
}
