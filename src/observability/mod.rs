//! Observability
//!
//! Structured logging for the framework and the evaluation logging service.

pub mod evaluation;
pub mod logging;

pub use evaluation::{
    EvaluationKind, EvaluationLogger, EvaluationRecord, EvaluationSink, HttpEvaluationSink,
};
pub use logging::{LogFormat, init_default_logging, init_logging};

// Span macros for structured logging
pub use logging::{download_span, matching_span, store_span, upload_span};
