//! Pipeline and backend configuration read from the environment

use crate::agent::ClinicalAgent;
use crate::inference::{
    env_or_default, env_parse, ChatBackend, ChatClient, EmbeddingBackend, TeiClient,
    DEFAULT_OLLAMA_CHAT_MODEL, DEFAULT_OLLAMA_EMBED_MODEL, DEFAULT_OLLAMA_URL,
    DEFAULT_EMBEDDING_TIMEOUT_SECS, DEFAULT_OPENAI_CHAT_MODEL, DEFAULT_OPENAI_URL, DEFAULT_TEI_URL,
};
use crate::llm::LlmAgent;
use crate::retry::RetryPolicy;
use crate::rule_based::RuleBasedAgent;
use crate::{AgentError, Result};
use healthguard_core::chunk::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use healthguard_core::ChunkConfig;
use healthguard_index::{EmbeddingProvider, HashingEmbedder, DEFAULT_HASHING_DIMENSION};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_TOP_K: usize = 8;
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 250;
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(5);
const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 120;
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;

/// What to do with diagnosis items that fail validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnverifiedPolicy {
    /// Keep them in the diagnosis, flagged
    #[default]
    Surface,
    /// Move them to the rejected list
    Strip,
}

impl UnverifiedPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "surface" => Some(Self::Surface),
            "strip" => Some(Self::Strip),
            _ => None,
        }
    }
}

/// Structural settings of one pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub chunking: ChunkConfig,
    pub top_k: usize,
    pub retry: RetryPolicy,
    pub unverified_policy: UnverifiedPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkConfig::default(),
            top_k: DEFAULT_TOP_K,
            retry: RetryPolicy::default(),
            unverified_policy: UnverifiedPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Read `CHUNK_SIZE`, `CHUNK_OVERLAP`, `TOP_K`, `PIPELINE_*` and
    /// `UNVERIFIED_POLICY`. Unparseable values fall back to defaults.
    pub fn from_env() -> Self {
        let initial_backoff = Duration::from_millis(env_parse(
            "PIPELINE_RETRY_BACKOFF_MS",
            DEFAULT_RETRY_BACKOFF_MS,
        ));
        Self {
            chunking: ChunkConfig {
                chunk_size: env_parse("CHUNK_SIZE", DEFAULT_CHUNK_SIZE),
                overlap: env_parse("CHUNK_OVERLAP", DEFAULT_CHUNK_OVERLAP),
            },
            top_k: env_parse("TOP_K", DEFAULT_TOP_K),
            retry: RetryPolicy {
                max_retries: env_parse("PIPELINE_MAX_RETRIES", DEFAULT_MAX_RETRIES),
                initial_backoff,
                max_backoff: MAX_RETRY_BACKOFF.max(initial_backoff),
                attempt_timeout: Duration::from_secs(
                    env_parse("PIPELINE_STAGE_TIMEOUT_SECS", DEFAULT_STAGE_TIMEOUT_SECS).max(1),
                ),
            },
            unverified_policy: std::env::var("UNVERIFIED_POLICY")
                .ok()
                .and_then(|v| UnverifiedPolicy::parse(&v))
                .unwrap_or_default(),
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_chunking(mut self, chunking: ChunkConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_unverified_policy(mut self, policy: UnverifiedPolicy) -> Self {
        self.unverified_policy = policy;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Chunking must be valid and `top_k` positive
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        if self.top_k == 0 {
            return Err(AgentError::Config("top_k must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentMode {
    Llm,
    RuleBased,
    /// LLM when a provider is configured, rule-based otherwise
    Auto,
}

impl AgentMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "llm" => Some(Self::Llm),
            "rule-based" | "rule_based" | "rules" => Some(Self::RuleBased),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }
}

/// Chat model settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmSettings {
    pub backend: ChatBackend,
    pub url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl LlmSettings {
    /// `None` when neither `LLM_PROVIDER` nor `OPENAI_API_KEY` is set
    pub fn from_env() -> Result<Option<Self>> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());
        let provider = match std::env::var("LLM_PROVIDER") {
            Ok(provider) if !provider.trim().is_empty() => provider.trim().to_ascii_lowercase(),
            _ if api_key.is_some() => "openai".to_string(),
            _ => return Ok(None),
        };

        let (backend, default_url, default_model) = match provider.as_str() {
            "openai" => (ChatBackend::OpenAi, DEFAULT_OPENAI_URL, DEFAULT_OPENAI_CHAT_MODEL),
            "ollama" => (ChatBackend::Ollama, DEFAULT_OLLAMA_URL, DEFAULT_OLLAMA_CHAT_MODEL),
            other => {
                return Err(AgentError::Config(format!(
                    "unknown LLM_PROVIDER `{}` (expected openai or ollama)",
                    other
                )))
            }
        };

        Ok(Some(Self {
            backend,
            url: env_or_default("LLM_URL", default_url),
            model: env_or_default("LLM_MODEL", default_model),
            api_key,
            timeout: Duration::from_secs(env_parse("LLM_TIMEOUT_SECS", DEFAULT_LLM_TIMEOUT_SECS).max(1)),
        }))
    }

    pub fn client(&self) -> ChatClient {
        let client = ChatClient::new(self.backend, self.url.clone(), self.model.clone())
            .with_timeout(self.timeout);
        match &self.api_key {
            Some(key) if self.backend == ChatBackend::OpenAi => client.with_api_key(key.clone()),
            _ => client,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingKind {
    Hashing,
    Remote(EmbeddingBackend),
}

/// Embedding backend settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingSettings {
    pub kind: EmbeddingKind,
    pub url: String,
    pub model: String,
    pub dimensions: usize,
    /// Per-request deadline for remote backends
    pub timeout: Duration,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            kind: EmbeddingKind::Hashing,
            url: String::new(),
            model: String::new(),
            dimensions: DEFAULT_HASHING_DIMENSION,
            timeout: Duration::from_secs(DEFAULT_EMBEDDING_TIMEOUT_SECS),
        }
    }
}

impl EmbeddingSettings {
    pub fn from_env() -> Result<Self> {
        let provider = env_or_default("EMBEDDING_PROVIDER", "hashing").to_ascii_lowercase();
        let dimensions = env_parse("EMBEDDING_DIM", DEFAULT_HASHING_DIMENSION);
        if dimensions == 0 {
            return Err(AgentError::Config("EMBEDDING_DIM must be positive".into()));
        }

        let (kind, default_url, default_model) = match provider.as_str() {
            "hashing" => (EmbeddingKind::Hashing, "", ""),
            "tei" => (EmbeddingKind::Remote(EmbeddingBackend::Tei), DEFAULT_TEI_URL, "default"),
            "ollama" => (
                EmbeddingKind::Remote(EmbeddingBackend::Ollama),
                DEFAULT_OLLAMA_URL,
                DEFAULT_OLLAMA_EMBED_MODEL,
            ),
            other => {
                return Err(AgentError::Config(format!(
                    "unknown EMBEDDING_PROVIDER `{}` (expected hashing, tei or ollama)",
                    other
                )))
            }
        };

        Ok(Self {
            kind,
            url: env_or_default("EMBEDDING_URL", default_url),
            model: env_or_default("EMBEDDING_MODEL", default_model),
            dimensions,
            timeout: Duration::from_secs(
                env_parse("EMBEDDING_TIMEOUT_SECS", DEFAULT_EMBEDDING_TIMEOUT_SECS).max(1),
            ),
        })
    }

    /// The service client, `None` for the offline hashing embedder
    pub fn remote_client(&self) -> Option<TeiClient> {
        match self.kind {
            EmbeddingKind::Hashing => None,
            EmbeddingKind::Remote(backend) => Some(
                TeiClient::new(backend, self.url.clone(), self.model.clone(), self.dimensions)
                    .with_timeout(self.timeout),
            ),
        }
    }

    pub fn provider(&self) -> Arc<dyn EmbeddingProvider> {
        match self.remote_client() {
            Some(client) => Arc::new(client),
            None => Arc::new(HashingEmbedder::new(self.dimensions)),
        }
    }
}

/// Everything needed to assemble a pipeline
#[derive(Debug, Clone)]
pub struct Settings {
    pub pipeline: PipelineConfig,
    pub agent_mode: AgentMode,
    pub llm: Option<LlmSettings>,
    pub embedding: EmbeddingSettings,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let agent_mode = match std::env::var("AGENT_MODE") {
            Ok(value) if !value.trim().is_empty() => AgentMode::parse(&value).ok_or_else(|| {
                AgentError::Config(format!(
                    "unknown AGENT_MODE `{}` (expected llm, rule-based or auto)",
                    value
                ))
            })?,
            _ => AgentMode::Auto,
        };

        Ok(Self {
            pipeline: PipelineConfig::from_env(),
            agent_mode,
            llm: LlmSettings::from_env()?,
            embedding: EmbeddingSettings::from_env()?,
        })
    }

    /// Offline settings: rule-based agent, hashing embedder, defaults
    pub fn offline() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            agent_mode: AgentMode::RuleBased,
            llm: None,
            embedding: EmbeddingSettings::default(),
        }
    }

    /// Pick the agent variant for this configuration
    pub fn agent(&self) -> Result<Arc<dyn ClinicalAgent>> {
        let agent: Arc<dyn ClinicalAgent> = match (self.agent_mode, &self.llm) {
            (AgentMode::RuleBased, _) | (AgentMode::Auto, None) => Arc::new(RuleBasedAgent::new()),
            (AgentMode::Llm | AgentMode::Auto, Some(llm)) => Arc::new(LlmAgent::new(llm.client())),
            (AgentMode::Llm, None) => {
                return Err(AgentError::Config(
                    "AGENT_MODE=llm requires LLM_PROVIDER or OPENAI_API_KEY".into(),
                ))
            }
        };
        info!("Using {} agent", agent.name());
        Ok(agent)
    }
}
