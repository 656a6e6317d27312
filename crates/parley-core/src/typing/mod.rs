pub mod animator;

pub use animator::{OnTypingDone, TypingAnimator, TypingDone, TypingPhase};
