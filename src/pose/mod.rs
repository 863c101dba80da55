pub mod detector;
pub mod estimator;
pub mod keypoint;
#[cfg(feature = "desktop")]
pub mod preprocess;
pub mod synthetic;

pub use detector::{remap_movenet, MoveNetDetector};
pub use estimator::{PoseEstimator, PrecomputedPoses};
pub use keypoint::{ConversionError, Keypoint, KeypointIndex, PoseObservation, CHANNELS};
#[cfg(feature = "desktop")]
pub use preprocess::{load_frame, preprocess_for_movenet};
