use chrono::Duration;
use serde::Serialize;
use skillevo_core::types::now;
use skillevo_core::{
    ChangeLevel, Config, Error, Finding, Paths, Proposal, ProposalStatus, Result,
    TransitionEvent, UsageEvent,
};
use skillevo_storage::{CreateOutcome, EventStore, ProposalStore};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::analyzer::Analyzer;
use crate::applier::{ApplicationResult, Applier, RevertResult};
use crate::classifier::Classifier;
use crate::corpus::SkillCorpus;
use crate::notify::{deliver, LogNotifier, Notifier};
use crate::report::ReportWriter;

#[derive(Debug, Clone, Default)]
pub struct AnalysisOptions {
    /// Run even when an analysis already happened today.
    pub force: bool,
    /// Window override in days; the configured window otherwise.
    pub days: Option<i64>,
    /// Restrict the run to one target.
    pub skill: Option<String>,
    /// Compute findings and drafts without persisting anything.
    pub dry_run: bool,
}

/// What one analysis run did, for operator output.
#[derive(Debug, Serialize)]
pub struct AnalysisOutcome {
    pub skills_analyzed: usize,
    pub events_in_window: usize,
    pub findings: Vec<Finding>,
    pub created: Vec<String>,
    pub merged: Vec<String>,
    pub deferred: Vec<String>,
    pub auto_approved: Vec<String>,
    pub report_path: Option<PathBuf>,
    /// Set when the run was skipped because one already happened today.
    pub skipped: bool,
}

/// Orchestration facade over the pipeline. Owns the policy decisions the
/// individual components stay agnostic of: daily run idempotence, level-based
/// auto-approval, expiry sweeps, notification fan-out.
pub struct EvolutionService {
    paths: Paths,
    config: Config,
    events: EventStore,
    proposals: ProposalStore,
    corpus: SkillCorpus,
    applier: Applier,
    reports: ReportWriter,
    notifier: Box<dyn Notifier>,
}

impl EvolutionService {
    pub fn open(paths: Paths) -> Result<Self> {
        let config = Config::load_or_default(&paths)?;
        Ok(Self::with_notifier(paths, config, Box::new(LogNotifier)))
    }

    pub fn with_notifier(paths: Paths, config: Config, notifier: Box<dyn Notifier>) -> Self {
        Self {
            events: EventStore::new(paths.clone()),
            proposals: ProposalStore::new(paths.clone()),
            corpus: SkillCorpus::new(&paths),
            applier: Applier::new(&paths),
            reports: ReportWriter::new(&paths),
            paths,
            config,
            notifier,
        }
    }

    pub fn record_event(&self, event: &UsageEvent) -> Result<()> {
        self.events.append(event)
    }

    pub fn recent_events(&self, days: i64) -> Result<Vec<UsageEvent>> {
        self.events.load_recent(days)
    }

    pub fn events_on(&self, date: &str) -> Result<Vec<UsageEvent>> {
        self.events.read_date(date)
    }

    pub async fn run_analysis(&self, force: bool) -> Result<AnalysisOutcome> {
        self.run_analysis_with(&AnalysisOptions {
            force,
            ..AnalysisOptions::default()
        })
        .await
    }

    /// Full pipeline pass: sweep expiries, window the event log, analyze,
    /// classify, upsert proposals, auto-approve by level, write the weekly
    /// report. At most one run per calendar day unless forced; a dry run
    /// computes everything and persists nothing.
    pub async fn run_analysis_with(&self, options: &AnalysisOptions) -> Result<AnalysisOutcome> {
        self.paths.ensure_dirs()?;
        if !options.dry_run {
            self.sweep_and_notify().await?;
        }

        let run_at = now();
        let today = run_at.format("%Y-%m-%d").to_string();
        if !options.force
            && !options.dry_run
            && self
                .events
                .has_action_on(&today, skillevo_core::EventAction::Snapshot)?
        {
            info!(date = %today, "Analysis already ran today, skipping");
            return Ok(AnalysisOutcome {
                skills_analyzed: 0,
                events_in_window: 0,
                findings: Vec::new(),
                created: Vec::new(),
                merged: Vec::new(),
                deferred: Vec::new(),
                auto_approved: Vec::new(),
                report_path: None,
                skipped: true,
            });
        }

        let mut corpus = self.corpus.list()?;
        if let Some(skill) = &options.skill {
            corpus.retain(|d| &d.name == skill);
            if corpus.is_empty() {
                return Err(Error::NotFound(format!("Skill {}", skill)));
            }
        }
        let window_days = options.days.unwrap_or(self.config.analyzer.window_days);
        let from = run_at - Duration::days(window_days);
        let events = self.events.load_window(from, run_at)?;

        let analyzer = Analyzer::new(self.config.analyzer.clone());
        let metrics = analyzer.aggregate(&events, &corpus);
        let findings: Vec<Finding> = analyzer
            .analyze(&events, &corpus, from, run_at)
            .into_iter()
            .filter(|f| {
                corpus
                    .iter()
                    .find(|d| d.name == f.skill)
                    .map(|d| d.evolution_enabled)
                    .unwrap_or(true)
            })
            .collect();

        let drafts = Classifier::new(self.config.rules.clone()).classify(&findings, run_at);
        let expires_at = run_at + Duration::days(self.config.proposals.expiry_days);

        let mut outcome = AnalysisOutcome {
            skills_analyzed: corpus.len(),
            events_in_window: events.len(),
            findings,
            created: Vec::new(),
            merged: Vec::new(),
            deferred: Vec::new(),
            auto_approved: Vec::new(),
            report_path: None,
            skipped: false,
        };

        if options.dry_run {
            outcome.created = drafts.iter().map(|d| d.proposal_id.clone()).collect();
            return Ok(outcome);
        }

        let mut touched = Vec::new();
        for draft in drafts {
            match self.proposals.create(draft, expires_at)? {
                CreateOutcome::Created(proposal) => {
                    deliver(self.notifier.as_ref(), &TransitionEvent::new(&proposal)).await;
                    outcome.created.push(proposal.proposal_id.clone());
                    let proposal = self.maybe_auto_approve(proposal, &mut outcome).await?;
                    touched.push(proposal);
                }
                CreateOutcome::Merged(proposal) => {
                    debug!(proposal_id = %proposal.proposal_id, "Merged into open proposal");
                    outcome.merged.push(proposal.proposal_id.clone());
                    touched.push(proposal);
                }
                CreateOutcome::Deferred(proposal) => {
                    outcome.deferred.push(proposal.proposal_id.clone());
                }
            }
        }

        self.events.append(&UsageEvent::snapshot(
            corpus.iter().map(|d| d.name.clone()).collect(),
        ))?;

        let report_path =
            self.reports
                .save(run_at, &metrics, &outcome.findings, &touched)?;
        outcome.report_path = Some(report_path);

        info!(
            skills = outcome.skills_analyzed,
            findings = outcome.findings.len(),
            created = outcome.created.len(),
            merged = outcome.merged.len(),
            "Analysis run complete"
        );
        Ok(outcome)
    }

    /// Patch proposals approve immediately; minor ones approve with the
    /// configured delay window. Major changes wait for a human.
    async fn maybe_auto_approve(
        &self,
        proposal: Proposal,
        outcome: &mut AnalysisOutcome,
    ) -> Result<Proposal> {
        let delay = match proposal.change_level {
            ChangeLevel::Patch => Duration::zero(),
            ChangeLevel::Minor => Duration::hours(self.config.proposals.minor_delay_hours),
            ChangeLevel::Major => return Ok(proposal),
        };
        let approved = self.proposals.approve(&proposal.proposal_id, delay)?;
        deliver(self.notifier.as_ref(), &TransitionEvent::new(&approved)).await;
        outcome.auto_approved.push(approved.proposal_id.clone());
        Ok(approved)
    }

    pub async fn approve(&self, proposal_id: &str) -> Result<Proposal> {
        let proposal = self.proposals.approve(proposal_id, Duration::zero())?;
        deliver(self.notifier.as_ref(), &TransitionEvent::new(&proposal)).await;
        Ok(proposal)
    }

    pub async fn reject(&self, proposal_id: &str) -> Result<Proposal> {
        let proposal = self.proposals.reject(proposal_id)?;
        deliver(self.notifier.as_ref(), &TransitionEvent::new(&proposal)).await;
        Ok(proposal)
    }

    pub fn extend(&self, proposal_id: &str, days: i64) -> Result<Proposal> {
        self.proposals.extend_expiry(proposal_id, days)
    }

    pub fn show(&self, proposal_id: &str) -> Result<Proposal> {
        self.proposals.load(proposal_id)
    }

    /// All proposals, with the expiry sweep applied first so listings never
    /// show a stale pending status.
    pub async fn list(&self, status: Option<ProposalStatus>) -> Result<Vec<Proposal>> {
        self.sweep_and_notify().await?;
        match status {
            Some(status) => self.proposals.list_by_status(status),
            None => self.proposals.list(),
        }
    }

    pub fn verify(&self, proposal_id: &str) -> Result<Proposal> {
        self.applier.verify(proposal_id)
    }

    pub async fn apply(&self, proposal_id: &str) -> Result<ApplicationResult> {
        let result = self.applier.apply(proposal_id)?;
        let proposal = self.proposals.load(&result.proposal_id)?;
        deliver(self.notifier.as_ref(), &TransitionEvent::new(&proposal)).await;
        Ok(result)
    }

    /// Apply every approved proposal whose eligibility window has opened,
    /// optionally restricted to one change level. One failure does not stop
    /// the batch.
    pub async fn apply_eligible(
        &self,
        level: Option<ChangeLevel>,
    ) -> Result<Vec<ApplicationResult>> {
        self.sweep_and_notify().await?;
        let at = now();
        let mut results = Vec::new();
        for proposal in self.proposals.list_by_status(ProposalStatus::Approved)? {
            if !proposal.is_eligible(at) {
                continue;
            }
            if level.is_some_and(|l| proposal.change_level != l) {
                continue;
            }
            match self.apply(&proposal.proposal_id).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::warn!(
                        proposal_id = %proposal.proposal_id,
                        error = %e,
                        "Skipping proposal in batch apply"
                    );
                }
            }
        }
        Ok(results)
    }

    pub async fn revert(&self, proposal_id: &str) -> Result<RevertResult> {
        let result = self.applier.revert(proposal_id)?;
        let proposal = self.proposals.load(&result.proposal_id)?;
        deliver(self.notifier.as_ref(), &TransitionEvent::new(&proposal)).await;
        Ok(result)
    }

    /// Current-window digest without touching any stored state. What
    /// `run_analysis` writes to the reports directory, rendered on demand.
    pub fn render_report(&self) -> Result<String> {
        let run_at = now();
        let from = run_at - Duration::days(self.config.analyzer.window_days);
        let corpus = self.corpus.list()?;
        let events = self.events.load_window(from, run_at)?;

        let analyzer = Analyzer::new(self.config.analyzer.clone());
        let metrics = analyzer.aggregate(&events, &corpus);
        let findings = analyzer.analyze(&events, &corpus, from, run_at);
        let proposals = self.proposals.list()?;

        Ok(crate::report::render(run_at, &metrics, &findings, &proposals))
    }

    async fn sweep_and_notify(&self) -> Result<()> {
        for proposal in self.proposals.sweep_expired()? {
            deliver(self.notifier.as_ref(), &TransitionEvent::new(&proposal)).await;
        }
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Process exit code for a failed operation: 2 for rejections of bad input
/// or stale state, 1 for internal failures.
pub fn exit_code(error: &Error) -> i32 {
    if error.is_rejection() {
        2
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillevo_core::EventResult;
    use tempfile::TempDir;

    const DOC: &str = r#"---
name: triage
description: Triage workflow
evolution:
  enabled: true
  version: "1.0.0"
---

# Triage

## Workflow

Do the triage.

## Out of Scope

Nothing.

## Verification

Check.

## Integrations

None.
"#;

    fn service() -> (TempDir, EvolutionService) {
        let temp = TempDir::new().unwrap();
        let paths = Paths::with_base(temp.path().to_path_buf());
        paths.ensure_dirs().unwrap();
        std::fs::create_dir_all(paths.skills_dir().join("triage")).unwrap();
        std::fs::write(paths.skill_file("triage"), DOC).unwrap();
        let config = Config::default();
        let service = EvolutionService::with_notifier(paths, config, Box::new(LogNotifier));
        (temp, service)
    }

    fn failed_invocation(skill: &str, error: &str) -> UsageEvent {
        let mut event = UsageEvent::invoked(skill, EventResult::Failure);
        event.error = Some(error.to_string());
        event
    }

    #[tokio::test]
    async fn test_run_creates_and_auto_approves_minor_proposal() {
        let (_t, service) = service();
        for i in 0..5 {
            service
                .record_event(&failed_invocation("triage", &format!("err {}", i)))
                .unwrap();
        }

        let outcome = service.run_analysis(false).await.unwrap();
        assert!(!outcome.skipped);
        assert_eq!(outcome.created.len(), 1);
        // low_success_rate maps to minor, which auto-approves with a delay.
        assert_eq!(outcome.auto_approved, outcome.created);
        assert!(outcome.report_path.as_ref().unwrap().exists());

        let proposal = service.show(&outcome.created[0]).unwrap();
        assert_eq!(proposal.status, ProposalStatus::Approved);
        assert!(proposal.eligible_at.unwrap() > now());

        // Ineligible until the delay window opens.
        assert!(service.apply_eligible(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_run_same_day_is_idempotent() {
        let (_t, service) = service();
        service
            .record_event(&failed_invocation("triage", "boom"))
            .unwrap();

        let first = service.run_analysis(false).await.unwrap();
        assert!(!first.skipped);
        let second = service.run_analysis(false).await.unwrap();
        assert!(second.skipped);
        // Forcing bypasses the daily guard; the open-proposal invariant
        // still prevents duplicates.
        let forced = service.run_analysis(true).await.unwrap();
        assert!(!forced.skipped);
        assert!(forced.created.is_empty());
    }

    #[tokio::test]
    async fn test_repeat_findings_merge_into_open_proposal() {
        let (_t, service) = service();
        // Unused skill with no events: maps to major, stays pending.
        let first = service.run_analysis(false).await.unwrap();
        assert_eq!(first.created.len(), 1);
        assert!(first.auto_approved.is_empty());

        let second = service.run_analysis(true).await.unwrap();
        assert!(second.created.is_empty());
        assert_eq!(second.merged.len(), 1);
        assert_eq!(second.merged[0], first.created[0]);
    }

    #[tokio::test]
    async fn test_explicit_approve_then_apply_then_revert() {
        let (_t, service) = service();
        let outcome = service.run_analysis(false).await.unwrap();
        let id = &outcome.created[0];

        service.approve(id).await.unwrap();
        let applied = service.apply(id).await.unwrap();
        assert_eq!(applied.version_before, "1.0.0");
        assert_eq!(applied.version_after, "2.0.0");

        let reverted = service.revert(id).await.unwrap();
        assert_eq!(reverted.restored_version, "1.0.0");
        assert_eq!(
            service.show(id).unwrap().status,
            ProposalStatus::RolledBack
        );
    }

    #[tokio::test]
    async fn test_dry_run_persists_nothing() {
        let (_t, service) = service();
        let options = AnalysisOptions {
            dry_run: true,
            ..AnalysisOptions::default()
        };
        let outcome = service.run_analysis_with(&options).await.unwrap();
        // The unused finding produces a would-be proposal id.
        assert_eq!(outcome.created.len(), 1);
        assert!(outcome.report_path.is_none());
        assert!(service.list(None).await.unwrap().is_empty());

        // A real run afterwards is not blocked by the daily guard.
        let real = service.run_analysis(false).await.unwrap();
        assert!(!real.skipped);
        assert_eq!(real.created.len(), 1);
    }

    #[tokio::test]
    async fn test_analysis_for_unknown_skill_is_rejected() {
        let (_t, service) = service();
        let options = AnalysisOptions {
            skill: Some("nope".into()),
            ..AnalysisOptions::default()
        };
        let err = service.run_analysis_with(&options).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&Error::Validation("x".into())), 2);
        assert_eq!(exit_code(&Error::Verification("x".into())), 2);
        assert_eq!(exit_code(&Error::Other("x".into())), 1);
    }
}
