//! Converts a pose window into the fixed-shape classifier input.

use ndarray::{concatenate, Array3, Axis};
use serde::Deserialize;
use thiserror::Error;

use super::window::{PoseWindow, WINDOW_CAPACITY};
use crate::pose::{KeypointIndex, CHANNELS};

/// Classifier input, shape `[frames, 3, 18]`.
pub type ModelInput = Array3<f32>;

/// Shape the action classifier expects: `[60, 3, 18]`.
pub const MODEL_INPUT_SHAPE: [usize; 3] = [WINDOW_CAPACITY, CHANNELS, KeypointIndex::COUNT];

/// What to do with an observation that fails to convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillPolicy {
    /// Drop the frame. Later frames move up and the zero tail grows by one,
    /// so the real/zero boundary ends up before `window.len()`.
    #[default]
    Shrink,
    /// Put a zero frame where the failed one was. The boundary stays at `window.len()`.
    ZeroFill,
}

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("no frames to concatenate")]
    Empty,
    #[error("failed to concatenate frames: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

#[derive(Debug, Clone)]
pub struct ModelInputAssembler {
    frames: usize,
    policy: FillPolicy,
}

impl ModelInputAssembler {
    pub fn new(frames: usize, policy: FillPolicy) -> Self {
        Self { frames, policy }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn policy(&self) -> FillPolicy {
        self.policy
    }

    /// Build a `[frames, 3, 18]` tensor from the window, oldest frame first.
    ///
    /// The newest `min(window.len(), frames)` observations are converted; the
    /// rest of the tensor is zero.
    pub fn build(&self, window: &PoseWindow) -> Result<ModelInput, AssemblyError> {
        self.build_with_failures(window).map(|(input, _)| input)
    }

    /// Like [`build`](Self::build), also returning how many observations
    /// failed to convert and were dropped or zero-filled.
    pub fn build_with_failures(&self, window: &PoseWindow) -> Result<(ModelInput, usize), AssemblyError> {
        let skip = window.len().saturating_sub(self.frames);
        let mut slices: Vec<Array3<f32>> = Vec::with_capacity(self.frames);
        let mut failed = 0;

        for (i, observation) in window.iter().enumerate().skip(skip) {
            match observation.to_model_slice() {
                Ok(slice) => slices.push(slice),
                Err(e) => {
                    failed += 1;
                    log::debug!("frame {} left out of model input: {}", i, e);
                    if self.policy == FillPolicy::ZeroFill {
                        slices.push(zero_slice());
                    }
                }
            }
        }

        while slices.len() < self.frames {
            slices.push(zero_slice());
        }

        if slices.is_empty() {
            return Err(AssemblyError::Empty);
        }

        let views: Vec<_> = slices.iter().map(|s| s.view()).collect();
        Ok((concatenate(Axis(0), &views)?, failed))
    }
}

impl Default for ModelInputAssembler {
    fn default() -> Self {
        Self::new(WINDOW_CAPACITY, FillPolicy::default())
    }
}

fn zero_slice() -> Array3<f32> {
    Array3::zeros((1, CHANNELS, KeypointIndex::COUNT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{Keypoint, PoseObservation};

    /// Observation whose every value equals `tag` (tag > 0 keeps it distinguishable from padding).
    fn tagged(tag: f32) -> PoseObservation {
        PoseObservation::new([Keypoint::new(tag, tag, tag); KeypointIndex::COUNT])
    }

    fn broken() -> PoseObservation {
        PoseObservation::new([Keypoint::new(f32::NAN, 0.0, 1.0); KeypointIndex::COUNT])
    }

    fn frame_value(input: &ModelInput, frame: usize) -> f32 {
        input[[frame, 0, 0]]
    }

    fn is_zero_frame(input: &ModelInput, frame: usize) -> bool {
        input.index_axis(Axis(0), frame).iter().all(|&v| v == 0.0)
    }

    fn window_of(tags: &[f32]) -> PoseWindow {
        let mut window = PoseWindow::default();
        for &t in tags {
            window.push(tagged(t));
        }
        window
    }

    #[test]
    fn test_empty_window_is_all_zero() {
        let input = ModelInputAssembler::default().build(&PoseWindow::default()).unwrap();
        assert_eq!(input.shape(), &MODEL_INPUT_SHAPE);
        assert!(input.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_full_window_is_all_real() {
        let tags: Vec<f32> = (1..=60).map(|i| i as f32).collect();
        let input = ModelInputAssembler::default().build(&window_of(&tags)).unwrap();

        assert_eq!(input.shape(), &MODEL_INPUT_SHAPE);
        for (frame, &tag) in tags.iter().enumerate() {
            assert_eq!(frame_value(&input, frame), tag);
            assert!(!is_zero_frame(&input, frame));
        }
    }

    #[test]
    fn test_partial_window_padded_after_real_frames() {
        let tags: Vec<f32> = (1..=25).map(|i| i as f32).collect();
        let input = ModelInputAssembler::default().build(&window_of(&tags)).unwrap();

        assert_eq!(input.shape(), &MODEL_INPUT_SHAPE);
        for frame in 0..25 {
            assert_eq!(frame_value(&input, frame), (frame + 1) as f32);
        }
        for frame in 25..60 {
            assert!(is_zero_frame(&input, frame));
        }
    }

    #[test]
    fn test_channels_follow_keypoint_layout() {
        let mut keypoints = [Keypoint::new(0.1, 0.1, 0.1); KeypointIndex::COUNT];
        keypoints[KeypointIndex::Neck as usize] = Keypoint::new(0.3, 0.4, 0.5);
        let mut window = PoseWindow::default();
        window.push(PoseObservation::new(keypoints));

        let input = ModelInputAssembler::default().build(&window).unwrap();
        let neck = KeypointIndex::Neck as usize;
        assert_eq!(input[[0, 0, neck]], 0.3);
        assert_eq!(input[[0, 1, neck]], 0.4);
        assert_eq!(input[[0, 2, neck]], 0.5);
    }

    #[test]
    fn test_shrink_drops_failed_frame() {
        let mut window = window_of(&[1.0, 2.0]);
        window.push(broken());
        window.push(tagged(4.0));
        window.push(tagged(5.0));

        let input = ModelInputAssembler::new(60, FillPolicy::Shrink).build(&window).unwrap();

        assert_eq!(input.shape(), &MODEL_INPUT_SHAPE);
        let real: Vec<f32> = (0..4).map(|f| frame_value(&input, f)).collect();
        assert_eq!(real, vec![1.0, 2.0, 4.0, 5.0]);
        // boundary moved from 5 to 4
        for frame in 4..60 {
            assert!(is_zero_frame(&input, frame));
        }
    }

    #[test]
    fn test_zero_fill_keeps_boundary() {
        let mut window = window_of(&[1.0, 2.0]);
        window.push(broken());
        window.push(tagged(4.0));
        window.push(tagged(5.0));

        let input = ModelInputAssembler::new(60, FillPolicy::ZeroFill).build(&window).unwrap();

        assert_eq!(input.shape(), &MODEL_INPUT_SHAPE);
        assert_eq!(frame_value(&input, 0), 1.0);
        assert_eq!(frame_value(&input, 1), 2.0);
        assert!(is_zero_frame(&input, 2));
        assert_eq!(frame_value(&input, 3), 4.0);
        assert_eq!(frame_value(&input, 4), 5.0);
        for frame in 5..60 {
            assert!(is_zero_frame(&input, frame));
        }
    }

    #[test]
    fn test_window_longer_than_frames_uses_newest() {
        let mut window = PoseWindow::new(10);
        for i in 1..=10 {
            window.push(tagged(i as f32));
        }

        let input = ModelInputAssembler::new(4, FillPolicy::Shrink).build(&window).unwrap();
        assert_eq!(input.shape(), &[4, CHANNELS, KeypointIndex::COUNT]);
        let values: Vec<f32> = (0..4).map(|f| frame_value(&input, f)).collect();
        assert_eq!(values, vec![7.0, 8.0, 9.0, 10.0]);
    }

    #[test]
    fn test_failures_counted_per_policy() {
        let mut window = window_of(&[1.0]);
        window.push(broken());
        window.push(tagged(3.0));
        window.push(broken());

        for policy in [FillPolicy::Shrink, FillPolicy::ZeroFill] {
            let (_, failed) = ModelInputAssembler::new(60, policy).build_with_failures(&window).unwrap();
            assert_eq!(failed, 2, "{:?}", policy);
        }
        let (_, failed) = ModelInputAssembler::default().build_with_failures(&window_of(&[1.0, 2.0])).unwrap();
        assert_eq!(failed, 0);
    }

    #[test]
    fn test_failures_outside_model_frames_not_counted() {
        let mut window = PoseWindow::new(5);
        window.push(broken());
        for i in 2..=5 {
            window.push(tagged(i as f32));
        }

        let (input, failed) = ModelInputAssembler::new(4, FillPolicy::Shrink)
            .build_with_failures(&window)
            .unwrap();
        assert_eq!(failed, 0);
        let values: Vec<f32> = (0..4).map(|f| frame_value(&input, f)).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_zero_frames_fails() {
        let window = window_of(&[1.0]);
        let err = ModelInputAssembler::new(0, FillPolicy::Shrink).build(&window).unwrap_err();
        assert!(matches!(err, AssemblyError::Empty));
    }

    #[test]
    fn test_fill_policy_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: FillPolicy,
        }
        let w: Wrapper = toml::from_str("policy = \"zero_fill\"").unwrap();
        assert_eq!(w.policy, FillPolicy::ZeroFill);
        let w: Wrapper = toml::from_str("policy = \"shrink\"").unwrap();
        assert_eq!(w.policy, FillPolicy::Shrink);
    }
}
