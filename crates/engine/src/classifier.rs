use sha2::{Digest, Sha256};
use skillevo_core::{Change, ChangeLevel, Finding, FindingKind, LevelRules, ProposalDraft, Timestamp};
use std::collections::BTreeMap;
use tracing::debug;

/// Front-matter block inserted for documents that lack evolution tracking.
const METADATA_BLOCK: &str = "evolution:\n  enabled: true\n  version: \"1.0.0\"\n  autoEvolve: patch";

/// Maps findings to proposal drafts using the declarative level ruleset.
/// Findings that cannot express a mechanically verifiable edit degrade to a
/// review change; nothing is ever dropped.
pub struct Classifier {
    rules: LevelRules,
}

impl Classifier {
    pub fn new(rules: LevelRules) -> Self {
        Self { rules }
    }

    /// One draft per target. Several findings for the same target merge into
    /// a single draft at the highest change level among them; each finding
    /// still contributes its own change items. `run_at` seeds the
    /// deterministic identifiers.
    pub fn classify(&self, findings: &[Finding], run_at: Timestamp) -> Vec<ProposalDraft> {
        let mut by_skill: BTreeMap<String, Vec<&Finding>> = BTreeMap::new();
        for finding in findings {
            by_skill.entry(finding.skill.clone()).or_default().push(finding);
        }

        let mut drafts = Vec::new();
        for (ordinal, (skill, group)) in by_skill.into_iter().enumerate() {
            let level = group
                .iter()
                .map(|f| self.rules.level_for(f.kind))
                .max()
                .unwrap_or(ChangeLevel::Minor);

            // The finding at the winning level names the proposal.
            let lead = group
                .iter()
                .find(|f| self.rules.level_for(f.kind) == level)
                .unwrap_or(&group[0]);

            let mut changes = Vec::new();
            let mut impact = Vec::new();
            let mut description_lines = Vec::new();
            for finding in &group {
                changes.extend(changes_for(finding));
                impact.push(finding.summary.clone());
                description_lines.push(format!("- {}: {}", finding.kind, finding.summary));
            }

            let draft = ProposalDraft {
                proposal_id: proposal_id(&skill, run_at, ordinal),
                skill: skill.clone(),
                change_level: level,
                source_trigger: lead.kind.as_str().to_string(),
                title: title_for(lead),
                description: description_lines.join("\n"),
                changes,
                impact,
            };
            debug!(
                skill = %draft.skill,
                proposal_id = %draft.proposal_id,
                level = %draft.change_level,
                findings = group.len(),
                "Classified findings into draft"
            );
            drafts.push(draft);
        }
        drafts
    }
}

fn title_for(finding: &Finding) -> String {
    match finding.kind {
        FindingKind::LowSuccessRate => format!("Fix failure patterns in {}", finding.skill),
        FindingKind::RepeatedSkips => format!("Improve {} trigger coverage", finding.skill),
        FindingKind::MissingMetadata => format!("Add evolution metadata to {}", finding.skill),
        FindingKind::MissingSection => format!("Add missing sections to {}", finding.skill),
        FindingKind::Unused => format!("Review unused skill {}", finding.skill),
    }
}

/// Concrete change items for one finding. Metadata and section gaps have a
/// mechanical fix; the usage-pattern kinds need a human and become reviews.
fn changes_for(finding: &Finding) -> Vec<Change> {
    match finding.kind {
        FindingKind::MissingMetadata => vec![Change::Add {
            anchor: "frontmatter".to_string(),
            content: METADATA_BLOCK.to_string(),
        }],
        FindingKind::MissingSection => finding
            .evidence
            .iter()
            .map(|section| Change::Add {
                anchor: "end".to_string(),
                content: format!("## {}\n\n_Not yet documented._", section),
            })
            .collect(),
        FindingKind::LowSuccessRate => {
            let mut note = format!("{}. Review the workflow and error handling.", finding.summary);
            if !finding.evidence.is_empty() {
                note.push_str(&format!(" Common errors: {}", finding.evidence.join("; ")));
            }
            vec![Change::Review { note }]
        }
        FindingKind::RepeatedSkips => {
            let mut note = format!("{}. Review trigger phrase coverage.", finding.summary);
            if !finding.evidence.is_empty() {
                note.push_str(&format!(" Attempted triggers: {}", finding.evidence.join("; ")));
            }
            vec![Change::Review { note }]
        }
        FindingKind::Unused => vec![Change::Review {
            note: format!(
                "{}. Consider improving triggers, merging, or archiving.",
                finding.summary
            ),
        }],
    }
}

/// Deterministic identifier: target plus a 6-hex suffix derived from the
/// run timestamp and the draft's ordinal within the run.
fn proposal_id(skill: &str, run_at: Timestamp, ordinal: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(skill.as_bytes());
    hasher.update(run_at.to_rfc3339().as_bytes());
    hasher.update(ordinal.to_le_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{}-{}", skill, &digest[..6])
}
