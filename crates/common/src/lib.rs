//! TrialDoc Common Library
//!
//! Shared code for the TrialDoc assistant services including:
//! - Document, citation and unified response models
//! - Error types and HTTP error mapping
//! - Configuration management
//! - Bearer credential extraction
//! - Metrics and observability

pub mod auth;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod models;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use models::{
    CitationSource, DocumentInfo, ProviderKind, Relevance, UnifiedCitation, UnifiedResponse,
};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Section label used when a provider does not report one
pub const DEFAULT_SECTION: &str = "Document Section";
