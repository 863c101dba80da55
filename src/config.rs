use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::action::{FillPolicy, WINDOW_CAPACITY};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub pose: PoseConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub alert: AlertConfig,
    #[serde(default)]
    pub app: AppConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PoseConfig {
    /// MoveNet ONNX モデルのパス
    #[serde(default = "default_pose_model")]
    pub model_path: String,
    /// 平均信頼度がこれ未満なら人物なしとする
    #[serde(default = "default_min_pose_confidence")]
    pub min_pose_confidence: f32,
    /// オーバーレイ用に通知するキーポイントの信頼度下限
    #[serde(default = "default_point_confidence")]
    pub point_confidence: f32,
}

fn default_pose_model() -> String { "models/movenet_lightning.onnx".to_string() }
fn default_min_pose_confidence() -> f32 { 0.2 }
fn default_point_confidence() -> f32 { 0.1 }

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            model_path: default_pose_model(),
            min_pose_confidence: default_min_pose_confidence(),
            point_confidence: default_point_confidence(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    #[serde(default = "default_classifier_model")]
    pub model_path: String,
    #[serde(default = "default_input_name")]
    pub input_name: String,
    #[serde(default = "default_probabilities_output")]
    pub probabilities_output: String,
    /// int64 のラベルインデックスを出力するモデルの場合のみ指定
    #[serde(default)]
    pub label_output: Option<String>,
    /// モデル出力順のラベル
    #[serde(default = "default_labels")]
    pub labels: Vec<String>,
}

fn default_classifier_model() -> String { "models/fall_classifier.onnx".to_string() }
fn default_input_name() -> String { "poses".to_string() }
fn default_probabilities_output() -> String { "probabilities".to_string() }
fn default_labels() -> Vec<String> {
    ["falling", "standing", "walking", "sitting"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_path: default_classifier_model(),
            input_name: default_input_name(),
            probabilities_output: default_probabilities_output(),
            label_output: None,
            labels: default_labels(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WindowConfig {
    /// 60 固定（分類モデルの入力フレーム数）。それ以外は validate で弾く
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub fill_policy: FillPolicy,
}

fn default_capacity() -> usize { WINDOW_CAPACITY }

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            fill_policy: FillPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertConfig {
    #[serde(default = "default_fall_label")]
    pub fall_label: String,
    #[serde(default = "default_alert_threshold")]
    pub threshold: f32,
    /// アラート後、次のアラートまでに必要なフレーム数
    #[serde(default = "default_cooldown_frames")]
    pub cooldown_frames: u64,
}

fn default_fall_label() -> String { "falling".to_string() }
fn default_alert_threshold() -> f32 { 0.8 }
fn default_cooldown_frames() -> u64 { 30 }

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            fall_label: default_fall_label(),
            threshold: default_alert_threshold(),
            cooldown_frames: default_cooldown_frames(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// ワーカースレッドのフレームキュー長。溢れたフレームは捨てる
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

fn default_queue_depth() -> usize { 2 }

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// 読み込みに失敗した場合はデフォルト値を使う
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("{}: {:#}, using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        // 分類モデルの入力フレーム数と一致しないと最新のフレームが入力に届かない
        if self.window.capacity != WINDOW_CAPACITY {
            anyhow::bail!(
                "window.capacity must be {} (classifier input frames), got {}",
                WINDOW_CAPACITY,
                self.window.capacity
            );
        }
        if self.classifier.labels.is_empty() {
            anyhow::bail!("classifier.labels must not be empty");
        }
        if self.app.queue_depth == 0 {
            anyhow::bail!("app.queue_depth must be at least 1");
        }
        for (name, value) in [
            ("pose.min_pose_confidence", self.pose.min_pose_confidence),
            ("pose.point_confidence", self.pose.point_confidence),
            ("alert.threshold", self.alert.threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("{} must be within [0, 1], got {}", name, value);
            }
        }
        Ok(())
    }
}
