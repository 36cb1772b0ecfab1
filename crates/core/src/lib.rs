pub mod config;
pub mod error;
pub mod paths;
pub mod types;

pub use config::{AnalyzerConfig, Config, LevelRules, ProposalConfig};
pub use error::{Error, Result};
pub use paths::Paths;
pub use types::{
    Change, ChangeLevel, EventAction, EventResult, Finding, FindingKind, Proposal, ProposalDraft,
    ProposalStatus, SemVer, Timestamp, TransitionEvent, UsageEvent,
};
