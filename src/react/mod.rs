//! 编排层：Call-Form Normalizer、主循环与过程事件

pub mod events;
pub mod loop_;
pub mod normalizer;

pub use events::ReactEvent;
pub use loop_::{OrchestrationLoop, TurnOutcome};
pub use normalizer::{CallFormNormalizer, Recognition, RecognitionOutcome, Strategy};
