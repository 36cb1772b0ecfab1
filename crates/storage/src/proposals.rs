use chrono::Duration;
use skillevo_core::types::now;
use skillevo_core::{Error, Paths, Proposal, ProposalDraft, ProposalStatus, Result};
use tracing::{info, warn};

/// Outcome of handing a draft to the store. The single-writer invariant means
/// a draft never silently becomes a second open proposal for the same target.
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    /// No open proposal existed; a new one was persisted.
    Created(Proposal),
    /// An open pending proposal existed; the draft's changes were merged
    /// into its change list.
    Merged(Proposal),
    /// The open proposal is already approved and must resolve first; the
    /// draft is deferred until the next analysis run.
    Deferred(Proposal),
}

/// Durable proposal records, one YAML file per proposal, plus the state
/// machine that guards every mutation.
pub struct ProposalStore {
    paths: Paths,
}

impl ProposalStore {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    pub fn save(&self, proposal: &Proposal) -> Result<()> {
        let file = self.paths.proposal_file(&proposal.proposal_id);
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(proposal)?;
        std::fs::write(file, content)?;
        Ok(())
    }

    fn load_raw(&self, proposal_id: &str) -> Result<Proposal> {
        let file = self.paths.proposal_file(proposal_id);
        if !file.exists() {
            return Err(Error::NotFound(format!("Proposal {}", proposal_id)));
        }
        let content = std::fs::read_to_string(file)?;
        let proposal = serde_yaml::from_str(&content)?;
        Ok(proposal)
    }

    /// Load a proposal, lazily expiring it if its horizon has passed. There
    /// is no background timer; expiry happens on access.
    pub fn load(&self, proposal_id: &str) -> Result<Proposal> {
        let mut proposal = self.load_raw(proposal_id)?;
        self.refresh_expiry(&mut proposal)?;
        Ok(proposal)
    }

    /// All proposals, lazily expired, oldest first.
    pub fn list(&self) -> Result<Vec<Proposal>> {
        let dir = self.paths.proposals_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut proposals = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().map(|e| e != "yaml").unwrap_or(true) {
                continue;
            }
            let content = std::fs::read_to_string(&path)?;
            match serde_yaml::from_str::<Proposal>(&content) {
                Ok(mut proposal) => {
                    self.refresh_expiry(&mut proposal)?;
                    proposals.push(proposal);
                }
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Skipping unreadable proposal record");
                }
            }
        }

        proposals.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(proposals)
    }

    pub fn list_by_status(&self, status: ProposalStatus) -> Result<Vec<Proposal>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|p| p.status == status)
            .collect())
    }

    /// Proposals that crossed their expiry horizon during this sweep, for
    /// the caller to notify about. Already-expired records are not repeated.
    pub fn sweep_expired(&self) -> Result<Vec<Proposal>> {
        let dir = self.paths.proposals_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut newly_expired = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().map(|e| e != "yaml").unwrap_or(true) {
                continue;
            }
            let content = std::fs::read_to_string(&path)?;
            if let Ok(mut proposal) = serde_yaml::from_str::<Proposal>(&content) {
                if self.refresh_expiry(&mut proposal)? {
                    newly_expired.push(proposal);
                }
            }
        }
        Ok(newly_expired)
    }

    /// The at-most-one open proposal for a target, if any.
    pub fn open_for(&self, skill: &str) -> Result<Option<Proposal>> {
        Ok(self
            .list()?
            .into_iter()
            .find(|p| p.skill == skill && p.status.is_open()))
    }

    /// Persist a draft, honoring the one-open-proposal-per-target invariant.
    pub fn create(&self, draft: ProposalDraft, expires_at: skillevo_core::Timestamp) -> Result<CreateOutcome> {
        if let Some(mut open) = self.open_for(&draft.skill)? {
            if open.status == ProposalStatus::Approved {
                info!(
                    skill = %draft.skill,
                    open_id = %open.proposal_id,
                    "Open proposal already approved; deferring new draft"
                );
                return Ok(CreateOutcome::Deferred(open));
            }

            if draft.change_level > open.change_level {
                // Level is immutable after creation; the higher-level draft
                // will re-derive once the open proposal resolves.
                warn!(
                    skill = %draft.skill,
                    open_level = %open.change_level,
                    draft_level = %draft.change_level,
                    "Merging draft into lower-level open proposal"
                );
            }

            let mut merged_any = false;
            for change in draft.changes {
                if !open.changes.contains(&change) {
                    open.changes.push(change);
                    merged_any = true;
                }
            }
            for note in draft.impact {
                if !open.impact.contains(&note) {
                    open.impact.push(note);
                }
            }
            if merged_any {
                self.save(&open)?;
            }
            info!(
                skill = %open.skill,
                proposal_id = %open.proposal_id,
                "Merged new findings into open proposal"
            );
            return Ok(CreateOutcome::Merged(open));
        }

        let proposal = Proposal {
            proposal_id: draft.proposal_id,
            skill: draft.skill,
            created_at: now(),
            expires_at,
            change_level: draft.change_level,
            status: ProposalStatus::Pending,
            source_trigger: draft.source_trigger,
            title: draft.title,
            description: draft.description,
            changes: draft.changes,
            impact: draft.impact,
            backup_path: None,
            applied_checksum: None,
            approved_at: None,
            eligible_at: None,
            applied_at: None,
            rejected_at: None,
            expired_at: None,
            rolled_back_at: None,
        };
        self.save(&proposal)?;
        info!(
            skill = %proposal.skill,
            proposal_id = %proposal.proposal_id,
            level = %proposal.change_level,
            "Created proposal"
        );
        Ok(CreateOutcome::Created(proposal))
    }

    /// Move a proposal along one state-machine edge, stamping the matching
    /// transition timestamp and persisting. Rejects any edge not in the
    /// machine.
    pub fn transition(&self, proposal: &mut Proposal, to: ProposalStatus) -> Result<()> {
        if !proposal.status.can_transition_to(to) {
            return Err(Error::Transition(format!(
                "{}: {} -> {} is not a legal transition",
                proposal.proposal_id, proposal.status, to
            )));
        }

        let stamp = now();
        match to {
            ProposalStatus::Approved => proposal.approved_at = Some(stamp),
            ProposalStatus::Rejected => proposal.rejected_at = Some(stamp),
            ProposalStatus::Expired => proposal.expired_at = Some(stamp),
            ProposalStatus::Applied => proposal.applied_at = Some(stamp),
            ProposalStatus::RolledBack => proposal.rolled_back_at = Some(stamp),
            ProposalStatus::Pending => {}
        }
        proposal.status = to;
        self.save(proposal)?;

        info!(
            proposal_id = %proposal.proposal_id,
            skill = %proposal.skill,
            status = %to,
            "Proposal transitioned"
        );
        Ok(())
    }

    /// Approve a pending proposal. `delay` is the window between approval
    /// and apply eligibility (zero for patch, the cancellation window for
    /// minor).
    pub fn approve(&self, proposal_id: &str, delay: Duration) -> Result<Proposal> {
        let mut proposal = self.load(proposal_id)?;
        self.transition(&mut proposal, ProposalStatus::Approved)?;
        proposal.eligible_at = proposal.approved_at.map(|t| t + delay);
        self.save(&proposal)?;
        Ok(proposal)
    }

    pub fn reject(&self, proposal_id: &str) -> Result<Proposal> {
        let mut proposal = self.load(proposal_id)?;
        self.transition(&mut proposal, ProposalStatus::Rejected)?;
        Ok(proposal)
    }

    /// A human may push the expiry horizon out while a proposal is pending.
    pub fn extend_expiry(&self, proposal_id: &str, days: i64) -> Result<Proposal> {
        let mut proposal = self.load(proposal_id)?;
        if proposal.status != ProposalStatus::Pending {
            return Err(Error::Transition(format!(
                "{}: only pending proposals can be extended (status: {})",
                proposal.proposal_id, proposal.status
            )));
        }
        proposal.expires_at = proposal.expires_at + Duration::days(days);
        self.save(&proposal)?;
        info!(
            proposal_id = %proposal.proposal_id,
            expires_at = %proposal.expires_at,
            "Extended proposal expiry"
        );
        Ok(proposal)
    }

    fn refresh_expiry(&self, proposal: &mut Proposal) -> Result<bool> {
        if proposal.is_expired(now()) {
            self.transition(proposal, ProposalStatus::Expired)?;
            return Ok(true);
        }
        Ok(false)
    }
}
