use ndarray::Array3;
use thiserror::Error;

/// 行動分類モデルの入力チャンネル数 (x, y, confidence)
pub const CHANNELS: usize = 3;

/// COCO-18 キーポイントインデックス（分類モデルの入力順）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum KeypointIndex {
    Nose = 0,
    Neck = 1,
    RightShoulder = 2,
    RightElbow = 3,
    RightWrist = 4,
    LeftShoulder = 5,
    LeftElbow = 6,
    LeftWrist = 7,
    RightHip = 8,
    RightKnee = 9,
    RightAnkle = 10,
    LeftHip = 11,
    LeftKnee = 12,
    LeftAnkle = 13,
    RightEye = 14,
    LeftEye = 15,
    RightEar = 16,
    LeftEar = 17,
}

impl KeypointIndex {
    pub const COUNT: usize = 18;

    pub const ALL: [KeypointIndex; Self::COUNT] = [
        Self::Nose,
        Self::Neck,
        Self::RightShoulder,
        Self::RightElbow,
        Self::RightWrist,
        Self::LeftShoulder,
        Self::LeftElbow,
        Self::LeftWrist,
        Self::RightHip,
        Self::RightKnee,
        Self::RightAnkle,
        Self::LeftHip,
        Self::LeftKnee,
        Self::LeftAnkle,
        Self::RightEye,
        Self::LeftEye,
        Self::RightEar,
        Self::LeftEar,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Nose => "nose",
            Self::Neck => "neck",
            Self::RightShoulder => "right_shoulder",
            Self::RightElbow => "right_elbow",
            Self::RightWrist => "right_wrist",
            Self::LeftShoulder => "left_shoulder",
            Self::LeftElbow => "left_elbow",
            Self::LeftWrist => "left_wrist",
            Self::RightHip => "right_hip",
            Self::RightKnee => "right_knee",
            Self::RightAnkle => "right_ankle",
            Self::LeftHip => "left_hip",
            Self::LeftKnee => "left_knee",
            Self::LeftAnkle => "left_ankle",
            Self::RightEye => "right_eye",
            Self::LeftEye => "left_eye",
            Self::RightEar => "right_ear",
            Self::LeftEar => "left_ear",
        }
    }
}

/// 単一キーポイント
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    /// 正規化されたX座標 (0.0〜1.0)
    pub x: f32,
    /// 正規化されたY座標 (0.0〜1.0, 上が0)
    pub y: f32,
    /// 信頼度スコア (0.0〜1.0)
    pub confidence: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }

    /// 信頼度が閾値以上か
    pub fn is_valid(&self, threshold: f32) -> bool {
        self.confidence >= threshold
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.confidence.is_finite()
    }
}

impl Default for Keypoint {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            confidence: 0.0,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConversionError {
    #[error("keypoint {keypoint} has a non-finite value")]
    NonFinite { keypoint: &'static str },
}

/// 1フレーム分の姿勢観測（18キーポイント）
///
/// 姿勢推定器が1フレームにつき最大1つ生成する。生成後は変更しない。
#[derive(Debug, Clone, PartialEq)]
pub struct PoseObservation {
    keypoints: [Keypoint; KeypointIndex::COUNT],
}

impl PoseObservation {
    pub fn new(keypoints: [Keypoint; KeypointIndex::COUNT]) -> Self {
        Self { keypoints }
    }

    /// インデックスでキーポイントを取得
    pub fn get(&self, index: KeypointIndex) -> &Keypoint {
        &self.keypoints[index as usize]
    }

    pub fn keypoints(&self) -> &[Keypoint; KeypointIndex::COUNT] {
        &self.keypoints
    }

    /// 全キーポイントの平均信頼度
    pub fn average_confidence(&self) -> f32 {
        let sum: f32 = self.keypoints.iter().map(|k| k.confidence).sum();
        sum / KeypointIndex::COUNT as f32
    }

    /// 信頼度が閾値を超えたキーポイントの2D座標（オーバーレイ描画用）
    pub fn recognized_points(&self, threshold: f32) -> Vec<(KeypointIndex, [f32; 2])> {
        KeypointIndex::ALL
            .iter()
            .zip(self.keypoints.iter())
            .filter(|(_, kp)| kp.confidence > threshold)
            .map(|(&idx, kp)| (idx, [kp.x, kp.y]))
            .collect()
    }

    /// 分類モデル入力用の [1, 3, 18] スライスに変換
    ///
    /// チャンネル0 = x, 1 = y, 2 = confidence。
    /// 非有限値を含む場合は失敗する。
    pub fn to_model_slice(&self) -> Result<Array3<f32>, ConversionError> {
        let mut slice = Array3::<f32>::zeros((1, CHANNELS, KeypointIndex::COUNT));

        for (i, kp) in self.keypoints.iter().enumerate() {
            if !kp.is_finite() {
                return Err(ConversionError::NonFinite {
                    keypoint: KeypointIndex::ALL[i].name(),
                });
            }
            slice[[0, 0, i]] = kp.x;
            slice[[0, 1, i]] = kp.y;
            slice[[0, 2, i]] = kp.confidence;
        }

        Ok(slice)
    }
}

impl Default for PoseObservation {
    fn default() -> Self {
        Self {
            keypoints: [Keypoint::default(); KeypointIndex::COUNT],
        }
    }
}
