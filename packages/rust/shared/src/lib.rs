//! Shared types, error model, and configuration for docchat.
//!
//! This crate is the foundation depended on by all other docchat crates.
//! It provides:
//! - [`DocChatError`] — the unified error type
//! - Domain types ([`DocumentId`], [`DocumentRef`], [`ChatMessage`], [`SessionState`])
//! - Configuration ([`AppConfig`], [`ClientConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CacheConfig, ClientConfig, ClientSettings, ServiceEndpoints, ServicesConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, validate_config,
};
pub use error::{DocChatError, Result};
pub use types::{ChatMessage, DocumentId, DocumentRef, Sender, SessionId, SessionState};
