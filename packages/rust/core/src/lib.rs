//! Core orchestration for docchat.
//!
//! This crate ties the remote call client and the document cache together into
//! the document pipeline (convert → store → cache) and the per-document chat
//! session, and offers [`DocChat`] as the session-scoped entry point.

pub mod chat;
pub mod pipeline;
pub mod session;

pub use chat::{ChatSession, IgnoreReason, TurnOutcome};
pub use pipeline::{
    ConversionOrchestrator, ConvertedDocument, PipelineState, ProgressReporter, SilentProgress,
};
pub use session::DocChat;
