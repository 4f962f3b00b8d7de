//! Configuration management for TrialDoc services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml)
//! - Default values
//!
//! Provider credentials are read once at startup. A missing API key marks
//! that provider as unconfigured everywhere, including fallback offers.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Placeholder substituted with the user's question in prompt templates
pub const QUESTION_PLACEHOLDER: &str = "{{QUESTION}}";

/// Instruction appended verbatim to every primary backend prompt
pub const CITATION_INSTRUCTION: &str = "Please cite specific page numbers and section titles from the protocol document for each point in your answer.";

/// Formatting contract shared by the answer-producing providers
pub const FORMAT_INSTRUCTION: &str = "Format your answer using markdown: use **bold** for key terms, numbered or bulleted lists for criteria and steps, and ### headings to separate topics.";

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Internal RAG query backend
    pub primary: PrimaryBackendConfig,

    /// Third-party document-chat provider
    pub third_party: ThirdPartyConfig,

    /// LLM citation service
    pub llm: LlmConfig,

    /// Prompt templates
    pub prompts: PromptsConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds, must exceed the slowest provider budget
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Maximum requests in flight across all routes
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrimaryBackendConfig {
    /// Base URL of the query backend; unset disables the provider
    pub base_url: Option<String>,

    /// Query timeout in milliseconds
    #[serde(default = "default_query_timeout")]
    pub query_timeout_ms: u64,

    /// Connectivity health-check timeout in milliseconds
    #[serde(default = "default_health_timeout")]
    pub health_timeout_ms: u64,

    /// Highlighted PDF fetch timeout in milliseconds
    #[serde(default = "default_pdf_fetch_timeout")]
    pub pdf_fetch_timeout_ms: u64,

    /// Result limit when the caller does not pass one
    #[serde(default = "default_result_limit")]
    pub default_limit: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThirdPartyConfig {
    /// API base URL
    #[serde(default = "default_third_party_base")]
    pub base_url: String,

    /// API key; unset disables the provider
    pub api_key: Option<String>,

    /// Route every query to this provider and skip the primary backend
    #[serde(default)]
    pub use_as_primary: bool,

    /// Sampling temperature, kept low to favour extractive answers
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in milliseconds
    #[serde(default = "default_query_timeout")]
    pub timeout_ms: u64,

    /// Run the citation extraction assist after each answer
    #[serde(default = "default_enabled")]
    pub extract_sources: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// API base URL
    #[serde(default = "default_llm_base")]
    pub base_url: String,

    /// API key; unset disables the provider and the extraction assist
    pub api_key: Option<String>,

    /// Model to use
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// API version header value
    #[serde(default = "default_llm_api_version")]
    pub api_version: String,

    /// Maximum output tokens
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,

    /// USD per million input tokens
    #[serde(default = "default_input_rate")]
    pub input_rate_per_million: f64,

    /// USD per million output tokens
    #[serde(default = "default_output_rate")]
    pub output_rate_per_million: f64,

    /// Request timeout in milliseconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PromptsConfig {
    /// Primary backend prompt; `{{QUESTION}}` is replaced with the question
    #[serde(default = "default_primary_template")]
    pub primary_template: String,

    /// Document-chat prompt; `{{QUESTION}}` is replaced with the question
    #[serde(default = "default_third_party_template")]
    pub third_party_template: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name, attached to every exported metric as the `service` label
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 300 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_concurrent() -> usize { 100 }
fn default_query_timeout() -> u64 { 120_000 }
fn default_health_timeout() -> u64 { 5_000 }
fn default_pdf_fetch_timeout() -> u64 { 30_000 }
fn default_result_limit() -> u32 { 5 }
fn default_third_party_base() -> String { "https://api.chatpdf.com/v1".to_string() }
fn default_temperature() -> f32 { 0.3 }
fn default_llm_base() -> String { "https://api.anthropic.com".to_string() }
fn default_llm_model() -> String { "claude-3-5-haiku-latest".to_string() }
fn default_llm_api_version() -> String { "2023-06-01".to_string() }
fn default_llm_max_tokens() -> u32 { 4096 }
fn default_input_rate() -> f64 { 0.8 }
fn default_output_rate() -> f64 { 4.0 }
fn default_llm_timeout() -> u64 { 60_000 }
fn default_primary_template() -> String {
    format!("{}\n\n{}\n\n{}", QUESTION_PLACEHOLDER, CITATION_INSTRUCTION, FORMAT_INSTRUCTION)
}
fn default_third_party_template() -> String {
    format!("{}\n\n{}", QUESTION_PLACEHOLDER, FORMAT_INSTRUCTION)
}
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "trialdoc".to_string() }
fn default_rate_limit() -> u32 { 20 }
fn default_burst() -> u32 { 40 }
fn default_enabled() -> bool { true }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__THIRD_PARTY__API_KEY=sec_xxx
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

impl PrimaryBackendConfig {
    pub fn is_configured(&self) -> bool {
        self.base_url.as_deref().is_some_and(|url| !url.trim().is_empty())
    }
}

impl ThirdPartyConfig {
    pub fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.trim().is_empty())
    }
}

impl LlmConfig {
    pub fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.trim().is_empty())
    }
}

impl PromptsConfig {
    /// Render the primary backend prompt for a question
    pub fn render_primary(&self, question: &str) -> String {
        render_template(&self.primary_template, question)
    }

    /// Render the document-chat prompt for a question
    pub fn render_third_party(&self, question: &str) -> String {
        render_template(&self.third_party_template, question)
    }
}

/// Substitute the question into a template; templates without the
/// placeholder get the question prepended.
fn render_template(template: &str, question: &str) -> String {
    if template.contains(QUESTION_PLACEHOLDER) {
        template.replace(QUESTION_PLACEHOLDER, question)
    } else {
        format!("{}\n\n{}", question, template)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            max_concurrent_requests: default_max_concurrent(),
        }
    }
}

impl Default for PrimaryBackendConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            query_timeout_ms: default_query_timeout(),
            health_timeout_ms: default_health_timeout(),
            pdf_fetch_timeout_ms: default_pdf_fetch_timeout(),
            default_limit: default_result_limit(),
        }
    }
}

impl Default for ThirdPartyConfig {
    fn default() -> Self {
        Self {
            base_url: default_third_party_base(),
            api_key: None,
            use_as_primary: false,
            temperature: default_temperature(),
            timeout_ms: default_query_timeout(),
            extract_sources: default_enabled(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base(),
            api_key: None,
            model: default_llm_model(),
            api_version: default_llm_api_version(),
            max_tokens: default_llm_max_tokens(),
            input_rate_per_million: default_input_rate(),
            output_rate_per_million: default_output_rate(),
            timeout_ms: default_llm_timeout(),
        }
    }
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            primary_template: default_primary_template(),
            third_party_template: default_third_party_template(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.primary.query_timeout_ms, 120_000);
        assert_eq!(config.primary.health_timeout_ms, 5_000);
        assert_eq!(config.primary.pdf_fetch_timeout_ms, 30_000);
        assert!((config.third_party.temperature - 0.3).abs() < f32::EPSILON);
        assert!(!config.third_party.use_as_primary);
    }

    #[test]
    fn test_providers_unconfigured_without_credentials() {
        let mut config = AppConfig::default();
        assert!(!config.primary.is_configured());
        assert!(!config.third_party.is_configured());
        assert!(!config.llm.is_configured());

        config.third_party.api_key = Some("   ".to_string());
        assert!(!config.third_party.is_configured());

        config.third_party.api_key = Some("sec_abc".to_string());
        config.primary.base_url = Some("http://localhost:8000".to_string());
        assert!(config.third_party.is_configured());
        assert!(config.primary.is_configured());
    }

    #[test]
    fn test_primary_prompt_appends_citation_instruction() {
        let prompts = PromptsConfig::default();
        let prompt = prompts.render_primary("What are the inclusion criteria?");
        assert!(prompt.starts_with("What are the inclusion criteria?"));
        assert!(prompt.contains(&format!("\n\n{}\n\n", CITATION_INSTRUCTION)));
        assert!(prompt.ends_with(FORMAT_INSTRUCTION));
    }

    #[test]
    fn test_default_templates_share_format_contract() {
        let prompts = PromptsConfig::default();
        assert!(prompts.render_primary("q").contains(FORMAT_INSTRUCTION));
        assert!(prompts.render_third_party("q").contains(FORMAT_INSTRUCTION));
        assert!(!prompts.render_third_party("q").contains(CITATION_INSTRUCTION));
    }

    #[test]
    fn test_templates_are_independent() {
        let prompts = PromptsConfig {
            primary_template: "P: {{QUESTION}}".to_string(),
            third_party_template: "no placeholder".to_string(),
        };
        assert_eq!(prompts.render_primary("q"), "P: q");
        assert_eq!(prompts.render_third_party("q"), "q\n\nno placeholder");
    }
}
