use chrono::Local;
use regex::Regex;
use serde::Serialize;
use skillevo_core::types::now;
use skillevo_core::{
    Change, ChangeLevel, Error, Paths, Proposal, ProposalStatus, Result, SemVer, UsageEvent,
};
use skillevo_storage::{checksum, BackupStore, EventStore, ProposalStore};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::corpus::{extract_version, SkillCorpus};

#[derive(Debug, Clone, Serialize)]
pub struct ApplicationResult {
    pub proposal_id: String,
    pub skill: String,
    pub change_level: ChangeLevel,
    pub version_before: String,
    pub version_after: String,
    pub backup_path: PathBuf,
    /// Review-type changes carried by the proposal, surfaced to the operator
    /// since they are not applied mechanically.
    pub review_notes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevertResult {
    pub proposal_id: String,
    pub skill: String,
    pub restored_version: String,
}

/// Performs the document edit for an approved proposal, and its inverse.
/// Both operations are all-or-nothing: every change is verified against the
/// live content before anything is written, the new content is materialized
/// fully in memory, and the document mutation is a single write that happens
/// only after the backup exists.
pub struct Applier {
    corpus: SkillCorpus,
    proposals: ProposalStore,
    backups: BackupStore,
    events: EventStore,
}

impl Applier {
    pub fn new(paths: &Paths) -> Self {
        Self {
            corpus: SkillCorpus::new(paths),
            proposals: ProposalStore::new(paths.clone()),
            backups: BackupStore::new(paths.clone()),
            events: EventStore::new(paths.clone()),
        }
    }

    /// Preconditions and content verification only, for dry runs.
    pub fn verify(&self, proposal_id: &str) -> Result<Proposal> {
        let proposal = self.proposals.load(proposal_id)?;
        self.check_preconditions(&proposal)?;
        let content = self.corpus.read(&proposal.skill)?;
        verify_changes(&content, &proposal.changes)?;
        Ok(proposal)
    }

    pub fn apply(&self, proposal_id: &str) -> Result<ApplicationResult> {
        let mut proposal = self.proposals.load(proposal_id)?;
        self.check_preconditions(&proposal)?;

        let content = self.corpus.read(&proposal.skill)?;
        verify_changes(&content, &proposal.changes)?;

        let version_before = extract_version(&content).unwrap_or(SemVer {
            major: 1,
            minor: 0,
            patch: 0,
        });
        let version_after = version_before.bump(proposal.change_level);

        // Backup first; the document write below is the only mutation.
        let backup_path =
            self.backups
                .write(&proposal.skill, &version_before.to_string(), &content)?;

        let mut updated = apply_changes(&content, &proposal.changes);
        updated = bump_declared_version(&updated, version_after, &proposal.title);
        self.corpus.write(&proposal.skill, &updated)?;

        proposal.backup_path = Some(backup_path.clone());
        proposal.applied_checksum = Some(checksum(&updated));

        self.events.append(&UsageEvent::evolution(
            &proposal.skill,
            &version_before.to_string(),
            &version_after.to_string(),
            proposal.change_level,
            &proposal.title,
        ))?;
        self.proposals
            .transition(&mut proposal, ProposalStatus::Applied)?;

        info!(
            proposal_id = %proposal.proposal_id,
            skill = %proposal.skill,
            from = %version_before,
            to = %version_after,
            "Applied proposal"
        );

        let review_notes = proposal
            .changes
            .iter()
            .filter_map(|c| match c {
                Change::Review { note } => Some(note.clone()),
                _ => None,
            })
            .collect();

        Ok(ApplicationResult {
            proposal_id: proposal.proposal_id,
            skill: proposal.skill,
            change_level: proposal.change_level,
            version_before: version_before.to_string(),
            version_after: version_after.to_string(),
            backup_path,
            review_notes,
        })
    }

    /// Structural inverse of `apply`: restore the backup verbatim, record a
    /// compensating event, transition to rolled_back. Refuses when the live
    /// document no longer matches what the application produced, so later
    /// edits are never silently discarded.
    pub fn revert(&self, proposal_id: &str) -> Result<RevertResult> {
        let mut proposal = self.proposals.load(proposal_id)?;
        let current = self.corpus.read(&proposal.skill)?;

        match &proposal.applied_checksum {
            Some(recorded) if checksum(&current) != *recorded => {
                return Err(Error::BackupMismatch(format!(
                    "{}: document content diverged since application; manual intervention required",
                    proposal.proposal_id
                )));
            }
            Some(_) => {}
            None => {
                return Err(Error::Transition(format!(
                    "{}: proposal was never applied (status: {})",
                    proposal.proposal_id, proposal.status
                )));
            }
        }

        if proposal.status != ProposalStatus::Applied {
            return Err(Error::Transition(format!(
                "{}: only applied proposals can be reverted (status: {})",
                proposal.proposal_id, proposal.status
            )));
        }

        let backup_path = proposal.backup_path.clone().ok_or_else(|| {
            Error::NotFound(format!("Backup for proposal {}", proposal.proposal_id))
        })?;
        let restored = self.backups.read(&backup_path)?;

        let applied_version = extract_version(&current)
            .map(|v| v.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let restored_version = extract_version(&restored)
            .map(|v| v.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        self.corpus.write(&proposal.skill, &restored)?;

        // Compensating record: versions run backwards.
        self.events.append(&UsageEvent::evolution(
            &proposal.skill,
            &applied_version,
            &restored_version,
            proposal.change_level,
            &format!("Rollback of {}", proposal.proposal_id),
        ))?;
        self.proposals
            .transition(&mut proposal, ProposalStatus::RolledBack)?;

        warn!(
            proposal_id = %proposal.proposal_id,
            skill = %proposal.skill,
            restored = %restored_version,
            "Rolled back proposal"
        );

        Ok(RevertResult {
            proposal_id: proposal.proposal_id,
            skill: proposal.skill,
            restored_version,
        })
    }

    fn check_preconditions(&self, proposal: &Proposal) -> Result<()> {
        if proposal.status != ProposalStatus::Approved {
            return Err(Error::Transition(format!(
                "{}: must be approved to apply (status: {})",
                proposal.proposal_id, proposal.status
            )));
        }
        let at = now();
        if !proposal.is_eligible(at) {
            return Err(Error::Transition(format!(
                "{}: not eligible until {}",
                proposal.proposal_id,
                proposal
                    .eligible_at
                    .map(|e| e.to_rfc3339())
                    .unwrap_or_default()
            )));
        }
        Ok(())
    }
}

/// Optimistic concurrency check: every edit/remove must still match the live
/// document verbatim. Any mismatch fails the whole proposal before a single
/// byte is written.
fn verify_changes(content: &str, changes: &[Change]) -> Result<()> {
    let mut stale = Vec::new();
    for change in changes {
        match change {
            Change::Edit {
                section, before, ..
            } => {
                if !content.contains(before.as_str()) {
                    stale.push(format!("edit in '{}'", section));
                }
            }
            Change::Remove { section, content: text } => {
                if !content.contains(text.as_str()) {
                    stale.push(format!("removal in '{}'", section));
                }
            }
            Change::Add { .. } | Change::Review { .. } => {}
        }
    }
    if !stale.is_empty() {
        return Err(Error::Verification(format!(
            "proposal stale, needs re-derivation: expected content not found for {}",
            stale.join(", ")
        )));
    }
    Ok(())
}

/// Apply all change items in order to an in-memory copy. Callers must have
/// run `verify_changes` first; review items are no-ops.
fn apply_changes(content: &str, changes: &[Change]) -> String {
    let mut result = content.to_string();
    for change in changes {
        match change {
            Change::Edit { before, after, .. } => {
                result = result.replacen(before.as_str(), after.as_str(), 1);
            }
            Change::Remove { content: text, .. } => {
                result = result.replacen(text.as_str(), "", 1);
            }
            Change::Add { anchor, content: added } => {
                result = insert_at_anchor(&result, anchor, added);
            }
            Change::Review { .. } => {}
        }
    }
    result
}

fn insert_at_anchor(content: &str, anchor: &str, added: &str) -> String {
    match anchor {
        "frontmatter" => {
            let re = Regex::new(r"(?s)\A---\n(.*?)\n---").expect("static regex");
            if let Some(captured) = re.captures(content) {
                let body = captured.get(1).map(|m| m.as_str()).unwrap_or_default();
                let replacement = format!("---\n{}\n{}\n---", body.trim_end(), added);
                content.replacen(&captured[0], &replacement, 1)
            } else {
                format!("---\n{}\n---\n\n{}", added, content)
            }
        }
        "end" => format!("{}\n\n{}\n", content.trim_end(), added),
        heading => {
            if content.contains(heading) {
                content.replacen(heading, &format!("{}\n\n{}", heading, added), 1)
            } else {
                // Unknown anchor degrades to appending at the end.
                format!("{}\n\n{}\n", content.trim_end(), added)
            }
        }
    }
}

/// Rewrite the declared version, refresh the `updated:` date, and prepend a
/// changelog entry when the document keeps one. Documents may declare the
/// version in more than one place (top-level key and evolution block); every
/// occurrence is rewritten so no stale copy survives the bump.
fn bump_declared_version(content: &str, version_after: SemVer, title: &str) -> String {
    let today = Local::now().format("%Y-%m-%d").to_string();

    let version_re =
        Regex::new(r#"(version:\s*["']?)\d+\.\d+\.\d+(["']?)"#).expect("static regex");
    let mut result = if version_re.is_match(content) {
        version_re
            .replace_all(content, |caps: &regex::Captures| {
                format!("{}{}{}", &caps[1], version_after, &caps[2])
            })
            .into_owned()
    } else {
        insert_at_anchor(
            content,
            "frontmatter",
            &format!("version: \"{}\"", version_after),
        )
    };

    let updated_re = Regex::new(r"(updated:\s*)\d{4}-\d{2}-\d{2}").expect("static regex");
    result = updated_re
        .replace_all(&result, |caps: &regex::Captures| {
            format!("{}{}", &caps[1], today)
        })
        .into_owned();

    if result.contains("## Changelog") {
        let entry = format!(
            "## Changelog\n\n### v{} ({})\n\n- {}",
            version_after, today, title
        );
        result = result.replacen("## Changelog", &entry, 1);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use skillevo_core::ProposalDraft;
    use skillevo_storage::CreateOutcome;
    use tempfile::TempDir;

    const DOC: &str = r#"---
name: doc-x
description: Example workflow
updated: 2026-01-01
evolution:
  enabled: true
  version: "1.2.0"
---

# Doc X

## Workflow

Run the steps in order.

## Changelog
"#;

    struct Fixture {
        _temp: TempDir,
        paths: Paths,
        applier: Applier,
        proposals: ProposalStore,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let paths = Paths::with_base(temp.path().to_path_buf());
        paths.ensure_dirs().unwrap();
        std::fs::create_dir_all(paths.skills_dir().join("doc-x")).unwrap();
        std::fs::write(paths.skill_file("doc-x"), DOC).unwrap();
        Fixture {
            applier: Applier::new(&paths),
            proposals: ProposalStore::new(paths.clone()),
            paths,
            _temp: temp,
        }
    }

    fn edit_draft(id: &str, level: ChangeLevel, before: &str, after: &str) -> ProposalDraft {
        ProposalDraft {
            proposal_id: id.to_string(),
            skill: "doc-x".to_string(),
            change_level: level,
            source_trigger: "low_success_rate".into(),
            title: "Tighten workflow wording".into(),
            description: "test".into(),
            changes: vec![Change::Edit {
                section: "Workflow".into(),
                before: before.into(),
                after: after.into(),
            }],
            impact: vec![],
        }
    }

    fn create_approved(f: &Fixture, draft: ProposalDraft) -> String {
        let outcome = f
            .proposals
            .create(draft, now() + Duration::days(7))
            .unwrap();
        let id = match outcome {
            CreateOutcome::Created(p) => p.proposal_id,
            other => panic!("expected Created, got {:?}", other),
        };
        f.proposals.approve(&id, Duration::zero()).unwrap();
        id
    }

    #[test]
    fn test_apply_edits_and_bumps_version() {
        let f = fixture();
        let id = create_approved(
            &f,
            edit_draft(
                "doc-x-aaa111",
                ChangeLevel::Patch,
                "Run the steps in order.",
                "Run the steps in order, checking output after each.",
            ),
        );

        let result = f.applier.apply(&id).unwrap();
        assert_eq!(result.version_before, "1.2.0");
        assert_eq!(result.version_after, "1.2.1");

        let content = std::fs::read_to_string(f.paths.skill_file("doc-x")).unwrap();
        assert!(content.contains("checking output after each"));
        assert!(content.contains("version: \"1.2.1\""));
        assert!(content.contains("### v1.2.1"));

        let proposal = f.proposals.load(&id).unwrap();
        assert_eq!(proposal.status, ProposalStatus::Applied);
        assert!(proposal.backup_path.is_some());
        assert!(proposal.applied_checksum.is_some());
    }

    #[test]
    fn test_minor_bump_zeroes_patch_component() {
        let f = fixture();
        let id = create_approved(
            &f,
            edit_draft(
                "doc-x-bbb222",
                ChangeLevel::Minor,
                "Run the steps in order.",
                "Follow the revised steps.",
            ),
        );
        let result = f.applier.apply(&id).unwrap();
        assert_eq!(result.version_after, "1.3.0");
    }

    #[test]
    fn test_stale_edit_fails_verification_and_leaves_document_untouched() {
        let f = fixture();
        let id = create_approved(
            &f,
            edit_draft(
                "doc-x-ccc333",
                ChangeLevel::Patch,
                "This text is not in the document.",
                "replacement",
            ),
        );

        let err = f.applier.apply(&id).unwrap_err();
        assert!(matches!(err, Error::Verification(_)));

        // Document unchanged, proposal still approved.
        let content = std::fs::read_to_string(f.paths.skill_file("doc-x")).unwrap();
        assert_eq!(content, DOC);
        let proposal = f.proposals.load(&id).unwrap();
        assert_eq!(proposal.status, ProposalStatus::Approved);
        assert!(proposal.backup_path.is_none());
    }

    #[test]
    fn test_pending_and_expired_proposals_cannot_apply() {
        let f = fixture();
        let outcome = f
            .proposals
            .create(
                edit_draft("doc-x-ddd444", ChangeLevel::Major, "a", "b"),
                now() - Duration::hours(1),
            )
            .unwrap();
        let id = match outcome {
            CreateOutcome::Created(p) => p.proposal_id,
            other => panic!("unexpected {:?}", other),
        };

        // Lazy expiry fires on access; apply reports the state precondition.
        let err = f.applier.apply(&id).unwrap_err();
        assert!(matches!(err, Error::Transition(_)));
        assert_eq!(
            f.proposals.load(&id).unwrap().status,
            ProposalStatus::Expired
        );
    }

    #[test]
    fn test_minor_delay_window_blocks_early_apply() {
        let f = fixture();
        let outcome = f
            .proposals
            .create(
                edit_draft("doc-x-eee555", ChangeLevel::Minor, "Run the steps in order.", "x"),
                now() + Duration::days(7),
            )
            .unwrap();
        let id = match outcome {
            CreateOutcome::Created(p) => p.proposal_id,
            other => panic!("unexpected {:?}", other),
        };
        f.proposals.approve(&id, Duration::hours(24)).unwrap();

        let err = f.applier.apply(&id).unwrap_err();
        assert!(matches!(err, Error::Transition(_)));
    }

    #[test]
    fn test_revert_round_trip_restores_bytes() {
        let f = fixture();
        let id = create_approved(
            &f,
            edit_draft(
                "doc-x-fff666",
                ChangeLevel::Patch,
                "Run the steps in order.",
                "Different steps.",
            ),
        );
        f.applier.apply(&id).unwrap();

        let result = f.applier.revert(&id).unwrap();
        assert_eq!(result.restored_version, "1.2.0");

        let content = std::fs::read_to_string(f.paths.skill_file("doc-x")).unwrap();
        assert_eq!(content, DOC);
        assert_eq!(
            f.proposals.load(&id).unwrap().status,
            ProposalStatus::RolledBack
        );

        // A second revert finds the content no longer matching the recorded
        // post-application state.
        let err = f.applier.revert(&id).unwrap_err();
        assert!(matches!(err, Error::BackupMismatch(_)));
    }

    #[test]
    fn test_revert_refuses_after_manual_edit() {
        let f = fixture();
        let id = create_approved(
            &f,
            edit_draft(
                "doc-x-abc777",
                ChangeLevel::Patch,
                "Run the steps in order.",
                "Different steps.",
            ),
        );
        f.applier.apply(&id).unwrap();

        // Hand-edit after application.
        let file = f.paths.skill_file("doc-x");
        let mut content = std::fs::read_to_string(&file).unwrap();
        content.push_str("\nManual addendum.\n");
        std::fs::write(&file, &content).unwrap();

        let err = f.applier.revert(&id).unwrap_err();
        assert!(matches!(err, Error::BackupMismatch(_)));
        // The later edit is preserved.
        assert!(std::fs::read_to_string(&file)
            .unwrap()
            .contains("Manual addendum."));
    }

    #[test]
    fn test_add_changes_and_review_notes() {
        let f = fixture();
        let draft = ProposalDraft {
            proposal_id: "doc-x-add888".into(),
            skill: "doc-x".into(),
            change_level: ChangeLevel::Patch,
            source_trigger: "missing_section".into(),
            title: "Add verification section".into(),
            description: "test".into(),
            changes: vec![
                Change::Add {
                    anchor: "end".into(),
                    content: "## Verification\n\n_Not yet documented._".into(),
                },
                Change::Review {
                    note: "Check trigger coverage".into(),
                },
            ],
            impact: vec![],
        };
        let outcome = f.proposals.create(draft, now() + Duration::days(7)).unwrap();
        let id = match outcome {
            CreateOutcome::Created(p) => p.proposal_id,
            other => panic!("unexpected {:?}", other),
        };
        f.proposals.approve(&id, Duration::zero()).unwrap();

        let result = f.applier.apply(&id).unwrap();
        assert_eq!(result.review_notes, vec!["Check trigger coverage"]);

        let content = std::fs::read_to_string(f.paths.skill_file("doc-x")).unwrap();
        assert!(content.ends_with("## Verification\n\n_Not yet documented._\n"));
    }

    #[test]
    fn test_version_bump_rewrites_every_declared_key() {
        // A top-level version key alongside evolution.version: the reader
        // prefers the evolution block, and the bump must leave neither copy
        // stale.
        let doc = "---\nname: doc-y\nversion: \"0.9.0\"\nevolution:\n  enabled: true\n  version: \"1.2.0\"\n---\n\n# Doc Y\n";
        let from = extract_version(doc).unwrap();
        assert_eq!(from.to_string(), "1.2.0");

        let bumped = bump_declared_version(doc, from.bump(ChangeLevel::Patch), "Fix wording");
        assert!(!bumped.contains("0.9.0"));
        assert!(!bumped.contains("1.2.0"));
        assert_eq!(bumped.matches("version: \"1.2.1\"").count(), 2);
    }

    #[test]
    fn test_frontmatter_anchor_insert() {
        let inserted = insert_at_anchor(DOC, "frontmatter", "evolutionNote: test");
        assert!(inserted.contains("evolutionNote: test\n---"));

        let bare = insert_at_anchor("# No front matter\n", "frontmatter", "version: \"1.0.0\"");
        assert!(bare.starts_with("---\nversion: \"1.0.0\"\n---"));
    }
}
