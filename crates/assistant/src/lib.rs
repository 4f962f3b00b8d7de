//! TrialDoc Assistant
//!
//! Query orchestration across interchangeable document-answering providers:
//! - Provider clients for the primary backend, the document-chat API and the LLM citation service
//! - Failure classification deciding when a failure warrants falling back
//! - A single-flight cache of provider source registrations
//! - Normalization of every provider's response into `UnifiedResponse`
//! - Optional fine-grained citation extraction with graceful degradation

pub mod citation_assist;
pub mod classify;
pub mod errors;
pub mod normalizer;
pub mod orchestrator;
pub mod providers;
pub mod source_cache;

pub use classify::{classify, should_use_fallback, FailureClassification};
pub use errors::{ProviderError, QueryError};
pub use orchestrator::{OrchestratorSettings, ProviderStatus, QueryOrchestrator, QueryRequest};
pub use source_cache::SourceIdCache;
