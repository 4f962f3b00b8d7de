//! Application state shared across handlers

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use trialdoc_assistant::{
    providers::{DocumentChatClient, LlmCitationClient, PrimaryBackendClient},
    OrchestratorSettings, ProviderError, QueryOrchestrator, SourceIdCache,
};
use trialdoc_common::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub orchestrator: Arc<QueryOrchestrator>,
    pub primary: Arc<PrimaryBackendClient>,
    pub sources: Arc<SourceIdCache>,

    /// Cancelled on shutdown; each request works under a child token
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Construct every provider client explicitly from configuration
    pub fn from_config(config: AppConfig) -> Result<Self, ProviderError> {
        let sources = Arc::new(SourceIdCache::new());
        let primary = Arc::new(PrimaryBackendClient::new(
            config.primary.clone(),
            config.prompts.clone(),
        )?);
        let llm = Arc::new(LlmCitationClient::new(config.llm.clone())?);

        let mut chat = DocumentChatClient::new(
            config.third_party.clone(),
            config.prompts.clone(),
            sources.clone(),
        )?;
        if config.llm.is_configured() {
            chat = chat.with_extractor(llm.clone());
        }

        let orchestrator = QueryOrchestrator::new(primary.clone(), OrchestratorSettings::from_config(&config))
            .with_fallback(Arc::new(chat))
            .with_llm(llm);

        let status = orchestrator.status();
        info!(
            primary = status.primary_configured,
            fallback = status.fallback_configured,
            llm = status.llm_configured,
            third_party_as_primary = status.third_party_as_primary,
            "Providers initialised"
        );

        Ok(Self {
            config: Arc::new(config),
            orchestrator: Arc::new(orchestrator),
            primary,
            sources,
            shutdown: CancellationToken::new(),
        })
    }

    /// Token for one request, cancelled when the server shuts down
    pub fn request_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }
}
