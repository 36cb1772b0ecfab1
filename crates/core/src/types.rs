use chrono::{DateTime, FixedOffset, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Zoned timestamp used across the engine. The collector writes local time
/// with an explicit offset, and we keep the offset instead of normalizing.
pub type Timestamp = DateTime<FixedOffset>;

pub fn now() -> Timestamp {
    Local::now().fixed_offset()
}

// ── Change level ────────────────────────────────────────────────────────────

/// Severity tier of a proposal. Ordering matters: when several findings merge
/// into one proposal, the highest level wins.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChangeLevel {
    Patch,
    Minor,
    Major,
}

impl ChangeLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeLevel::Patch => "patch",
            ChangeLevel::Minor => "minor",
            ChangeLevel::Major => "major",
        }
    }
}

impl fmt::Display for ChangeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "patch" => Ok(ChangeLevel::Patch),
            "minor" => Ok(ChangeLevel::Minor),
            "major" => Ok(ChangeLevel::Major),
            other => Err(Error::Validation(format!("Unknown change level: {}", other))),
        }
    }
}

// ── Semantic version ────────────────────────────────────────────────────────

/// Flat three-component version declared in a skill's front matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemVer {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SemVer {
    pub fn bump(&self, level: ChangeLevel) -> SemVer {
        match level {
            ChangeLevel::Patch => SemVer {
                patch: self.patch + 1,
                ..*self
            },
            ChangeLevel::Minor => SemVer {
                major: self.major,
                minor: self.minor + 1,
                patch: 0,
            },
            ChangeLevel::Major => SemVer {
                major: self.major + 1,
                minor: 0,
                patch: 0,
            },
        }
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for SemVer {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(Error::Validation(format!("Invalid version string: {}", s)));
        }
        let parse = |p: &str| {
            p.parse::<u32>()
                .map_err(|_| Error::Validation(format!("Invalid version string: {}", s)))
        };
        Ok(SemVer {
            major: parse(parts[0])?,
            minor: parse(parts[1])?,
            patch: parse(parts[2])?,
        })
    }
}

// ── Usage events ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    Invoked,
    Skipped,
    Snapshot,
    EvolutionApplied,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventResult {
    Success,
    Failure,
    Cancelled,
}

/// One immutable fact about skill usage, as written by the collector shim.
/// The wire format is a flat JSONL line; action-specific fields stay `None`
/// for the other actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub skill: String,
    pub action: EventAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<EventResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Why the skill was skipped (skipped events only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Snapshot payload: number of skills in the corpus at snapshot time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill_count: Option<usize>,
    /// Snapshot payload: skill identifiers in the corpus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<String>>,
    /// Evolution payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_level: Option<ChangeLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl UsageEvent {
    fn base(skill: &str, action: EventAction) -> Self {
        Self {
            timestamp: now(),
            session_id: None,
            skill: skill.to_string(),
            action,
            result: None,
            duration_ms: None,
            error: None,
            reason: None,
            skill_count: None,
            skills: None,
            version_before: None,
            version_after: None,
            change_level: None,
            description: None,
        }
    }

    pub fn invoked(skill: &str, result: EventResult) -> Self {
        Self {
            result: Some(result),
            ..Self::base(skill, EventAction::Invoked)
        }
    }

    pub fn skipped(skill: &str, reason: Option<String>) -> Self {
        Self {
            reason,
            ..Self::base(skill, EventAction::Skipped)
        }
    }

    /// Daily corpus snapshot record.
    pub fn snapshot(skills: Vec<String>) -> Self {
        Self {
            skill_count: Some(skills.len()),
            skills: Some(skills),
            ..Self::base("corpus", EventAction::Snapshot)
        }
    }

    /// Record of an applied (or reverted, with versions swapped) evolution.
    pub fn evolution(
        skill: &str,
        version_before: &str,
        version_after: &str,
        change_level: ChangeLevel,
        description: &str,
    ) -> Self {
        Self {
            version_before: Some(version_before.to_string()),
            version_after: Some(version_after.to_string()),
            change_level: Some(change_level),
            description: Some(description.to_string()),
            ..Self::base(skill, EventAction::EvolutionApplied)
        }
    }

    /// Boundary validation: a malformed event is rejected before it is ever
    /// stored, never partially written.
    pub fn validate(&self) -> Result<()> {
        if self.skill.trim().is_empty() {
            return Err(Error::Validation("Event is missing a target skill".into()));
        }
        if self.action == EventAction::Invoked && self.result.is_none() {
            return Err(Error::Validation(format!(
                "Invoked event for '{}' is missing a result",
                self.skill
            )));
        }
        if self.action == EventAction::EvolutionApplied
            && (self.version_before.is_none() || self.version_after.is_none())
        {
            return Err(Error::Validation(format!(
                "Evolution event for '{}' is missing version fields",
                self.skill
            )));
        }
        Ok(())
    }

    /// Date partition this event belongs to.
    pub fn partition(&self) -> String {
        self.timestamp.format("%Y-%m-%d").to_string()
    }
}

// ── Findings ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    LowSuccessRate,
    RepeatedSkips,
    MissingMetadata,
    MissingSection,
    Unused,
}

impl FindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingKind::LowSuccessRate => "low_success_rate",
            FindingKind::RepeatedSkips => "repeated_skips",
            FindingKind::MissingMetadata => "missing_metadata",
            FindingKind::MissingSection => "missing_section",
            FindingKind::Unused => "unused",
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A derived observation for one skill. Findings live only inside a single
/// analysis run; the classifier consumes them immediately.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Finding {
    pub kind: FindingKind,
    pub skill: String,
    /// The metric value that crossed the threshold (rate, count, ...).
    pub metric: f64,
    pub summary: String,
    /// Supporting evidence: error samples, skip reasons, section names.
    pub evidence: Vec<String>,
}

// ── Changes ─────────────────────────────────────────────────────────────────

/// One atomic edit within a proposal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Change {
    /// Replace `before` with `after`. Application refuses unless `before`
    /// still matches the live document verbatim.
    Edit {
        section: String,
        before: String,
        after: String,
    },
    /// Insert `content` at a named anchor: "frontmatter", "end", or an
    /// existing "## Heading" line.
    Add { anchor: String, content: String },
    /// Delete `content` verbatim.
    Remove { section: String, content: String },
    /// Advisory only; surfaced to a human, never mutates the document.
    Review { note: String },
}

impl Change {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Change::Review { .. })
    }
}

// ── Proposal state machine ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Applied,
    RolledBack,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Pending => "pending",
            ProposalStatus::Approved => "approved",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Expired => "expired",
            ProposalStatus::Applied => "applied",
            ProposalStatus::RolledBack => "rolled_back",
        }
    }

    /// The only legal edges. No transition skips a state and no terminal
    /// state is ever re-entered.
    pub fn can_transition_to(&self, to: ProposalStatus) -> bool {
        use ProposalStatus::*;
        matches!(
            (self, to),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Pending, Expired)
                | (Approved, Applied)
                | (Applied, RolledBack)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProposalStatus::Rejected | ProposalStatus::Expired | ProposalStatus::RolledBack
        )
    }

    /// Pending and approved proposals block new proposals for the same
    /// target (single-writer invariant).
    pub fn is_open(&self) -> bool {
        matches!(self, ProposalStatus::Pending | ProposalStatus::Approved)
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProposalStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ProposalStatus::Pending),
            "approved" => Ok(ProposalStatus::Approved),
            "rejected" => Ok(ProposalStatus::Rejected),
            "expired" => Ok(ProposalStatus::Expired),
            "applied" => Ok(ProposalStatus::Applied),
            "rolled_back" => Ok(ProposalStatus::RolledBack),
            other => Err(Error::Validation(format!("Unknown status: {}", other))),
        }
    }
}

// ── Proposal ────────────────────────────────────────────────────────────────

/// Durable record of a candidate edit and its disposition. After creation,
/// only the status, the transition timestamps, the backup/checksum fields
/// written by the applier, and `expires_at` (human extension) may change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub proposal_id: String,
    pub skill: String,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub change_level: ChangeLevel,
    pub status: ProposalStatus,
    /// Finding kind that produced this proposal.
    pub source_trigger: String,
    pub title: String,
    pub description: String,
    pub changes: Vec<Change>,
    pub impact: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    /// sha256 of the document content right after application; rollback
    /// refuses if the live document no longer matches it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<Timestamp>,
    /// Earliest instant the applier may act on an approved proposal. Minor
    /// proposals observe a delay window here; patch proposals are eligible
    /// immediately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eligible_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolled_back_at: Option<Timestamp>,
}

impl Proposal {
    pub fn is_expired(&self, at: Timestamp) -> bool {
        self.status == ProposalStatus::Pending && at > self.expires_at
    }

    pub fn is_eligible(&self, at: Timestamp) -> bool {
        self.status == ProposalStatus::Approved
            && self.eligible_at.map(|e| at >= e).unwrap_or(true)
    }
}

/// Classifier output before it is handed to the proposal store, which either
/// persists it as a new proposal or merges it into an open one.
#[derive(Debug, Clone)]
pub struct ProposalDraft {
    /// Deterministic identifier: target + a content-derived suffix assigned
    /// by the classifier, collision-free within one run.
    pub proposal_id: String,
    pub skill: String,
    pub change_level: ChangeLevel,
    pub source_trigger: String,
    pub title: String,
    pub description: String,
    pub changes: Vec<Change>,
    pub impact: Vec<String>,
}

// ── Notification boundary ───────────────────────────────────────────────────

/// Structured event emitted on every proposal state transition for an
/// external notifier to deliver.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionEvent {
    pub kind: ProposalStatus,
    pub proposal_id: String,
    pub skill: String,
    pub change_level: ChangeLevel,
    pub timestamp: Timestamp,
}

impl TransitionEvent {
    pub fn new(proposal: &Proposal) -> Self {
        Self {
            kind: proposal.status,
            proposal_id: proposal.proposal_id.clone(),
            skill: proposal.skill.clone(),
            change_level: proposal.change_level,
            timestamp: now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semver_bump() {
        let v: SemVer = "1.2.3".parse().unwrap();
        assert_eq!(v.bump(ChangeLevel::Patch).to_string(), "1.2.4");
        assert_eq!(v.bump(ChangeLevel::Minor).to_string(), "1.3.0");
        assert_eq!(v.bump(ChangeLevel::Major).to_string(), "2.0.0");
    }

    #[test]
    fn test_semver_rejects_garbage() {
        assert!("1.2".parse::<SemVer>().is_err());
        assert!("a.b.c".parse::<SemVer>().is_err());
    }

    #[test]
    fn test_change_level_ordering() {
        assert!(ChangeLevel::Major > ChangeLevel::Minor);
        assert!(ChangeLevel::Minor > ChangeLevel::Patch);
    }

    #[test]
    fn test_status_edges() {
        use ProposalStatus::*;
        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Pending.can_transition_to(Expired));
        assert!(Approved.can_transition_to(Applied));
        assert!(Applied.can_transition_to(RolledBack));

        // No jumps, no re-entry.
        assert!(!Pending.can_transition_to(Applied));
        assert!(!Approved.can_transition_to(Pending));
        assert!(!Rejected.can_transition_to(Approved));
        assert!(!RolledBack.can_transition_to(Applied));
        assert!(!Expired.can_transition_to(Approved));
    }

    #[test]
    fn test_event_validation() {
        let mut event = UsageEvent {
            timestamp: now(),
            session_id: None,
            skill: "pine-lead".into(),
            action: EventAction::Invoked,
            result: Some(EventResult::Success),
            duration_ms: Some(120),
            error: None,
            reason: None,
            skill_count: None,
            skills: None,
            version_before: None,
            version_after: None,
            change_level: None,
            description: None,
        };
        assert!(event.validate().is_ok());

        event.result = None;
        assert!(event.validate().is_err());

        event.result = Some(EventResult::Failure);
        event.skill = "  ".into();
        assert!(event.validate().is_err());
    }
}
