//! Clinical agents and the diagnosis pipeline for HealthGuard
//!
//! This crate contains:
//! - The dual-mode clinical agent (LLM-backed or rule-based)
//! - The literature retriever and citation validator
//! - The pipeline orchestrator and its configuration
//! - Remote inference clients for embeddings and chat completion

pub mod agent;
pub mod care;
pub mod config;
pub mod error;
pub mod inference;
pub mod llm;
pub mod pipeline;
pub mod retriever;
pub mod retry;
pub mod rule_based;
pub mod validator;

pub use agent::ClinicalAgent;
pub use care::{
    haversine_km, match_condition, recommend_care, CareFinder, CareRecommendation, CareReport,
    Facility, FacilityKind, GeoPoint, Urgency,
};
pub use config::{AgentMode, EmbeddingSettings, LlmSettings, PipelineConfig, Settings, UnverifiedPolicy};
pub use error::{AgentError, ErrorKind, Result};
pub use inference::{ChatBackend, ChatClient, EmbeddingBackend, TeiClient};
pub use llm::LlmAgent;
pub use pipeline::{ItemStatus, Pipeline, PipelineResult, PipelineState, StageFailure, ValidatedItem};
pub use retriever::{retrieve, Evidence, Retrieval};
pub use retry::RetryPolicy;
pub use rule_based::RuleBasedAgent;
pub use validator::{validate, ValidationReport, Violation, ViolationReason};
