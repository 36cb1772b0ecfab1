//! Analysis, classification, and application pipeline for skill evolution.
//!
//! The flow runs event log -> analyzer -> findings -> classifier -> proposal
//! drafts, then separately approved proposal -> applier -> document edit.
//! [`service::EvolutionService`] wires the stages together with the policy
//! layer (daily idempotence, auto-approval, expiry sweeps, notifications).

pub mod analyzer;
pub mod applier;
pub mod classifier;
pub mod corpus;
pub mod notify;
pub mod report;
pub mod service;

pub use analyzer::{Analyzer, SkillMetrics};
pub use applier::{ApplicationResult, Applier, RevertResult};
pub use classifier::Classifier;
pub use corpus::{SkillCorpus, SkillDescriptor};
pub use notify::{LogNotifier, Notifier};
pub use report::ReportWriter;
pub use service::{exit_code, AnalysisOptions, AnalysisOutcome, EvolutionService};
