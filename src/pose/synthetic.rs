//! Hand-built poses for driving the pipeline without a camera or pose model.

use super::keypoint::{Keypoint, KeypointIndex, PoseObservation};

/// Upright body layout, normalized coordinates, head at the top.
const STANDING: [(f32, f32); KeypointIndex::COUNT] = [
    (0.50, 0.10), // Nose
    (0.50, 0.20), // Neck
    (0.42, 0.20), // RightShoulder
    (0.40, 0.35), // RightElbow
    (0.39, 0.48), // RightWrist
    (0.58, 0.20), // LeftShoulder
    (0.60, 0.35), // LeftElbow
    (0.61, 0.48), // LeftWrist
    (0.45, 0.50), // RightHip
    (0.45, 0.70), // RightKnee
    (0.45, 0.90), // RightAnkle
    (0.55, 0.50), // LeftHip
    (0.55, 0.70), // LeftKnee
    (0.55, 0.90), // LeftAnkle
    (0.48, 0.08), // RightEye
    (0.52, 0.08), // LeftEye
    (0.46, 0.10), // RightEar
    (0.54, 0.10), // LeftEar
];

/// Standing pose shifted horizontally by `sway` (small values give frame-to-frame jitter).
pub fn standing_pose(sway: f32) -> PoseObservation {
    let keypoints = std::array::from_fn(|i| {
        let (x, y) = STANDING[i];
        Keypoint::new(x + sway, y, 0.9)
    });
    PoseObservation::new(keypoints)
}

/// The standing layout rotated 90° so the body lies along the x axis near the floor.
pub fn lying_pose() -> PoseObservation {
    let keypoints = std::array::from_fn(|i| {
        let (x, y) = STANDING[i];
        // rotate around the hip centre, then drop towards the bottom of the frame
        let (dx, dy) = (x - 0.5, y - 0.5);
        Keypoint::new(0.5 - dy, 0.85 + dx * 0.2, 0.8)
    });
    PoseObservation::new(keypoints)
}
