pub mod assembler;
pub mod classifier;
pub mod window;

pub use assembler::{AssemblyError, FillPolicy, ModelInput, ModelInputAssembler, MODEL_INPUT_SHAPE};
pub use classifier::{classify, ActionClassifier, ClassificationResult, OnnxActionClassifier, Prediction};
pub use window::{PoseWindow, WINDOW_CAPACITY};
