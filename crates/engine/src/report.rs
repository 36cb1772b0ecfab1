use chrono::Datelike;
use skillevo_core::{Finding, Paths, Proposal, Result, Timestamp};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

use crate::analyzer::SkillMetrics;

/// Renders one analysis run as a markdown digest and files it under
/// `reports/weekly-<year>-W<week>.md`, overwriting earlier runs from the
/// same ISO week.
pub struct ReportWriter {
    reports_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(paths: &Paths) -> Self {
        Self {
            reports_dir: paths.reports_dir(),
        }
    }

    pub fn save(
        &self,
        run_at: Timestamp,
        metrics: &BTreeMap<String, SkillMetrics>,
        findings: &[Finding],
        proposals: &[Proposal],
    ) -> Result<PathBuf> {
        let iso = run_at.iso_week();
        let path = self
            .reports_dir
            .join(format!("weekly-{}-W{:02}.md", iso.year(), iso.week()));
        std::fs::create_dir_all(&self.reports_dir)?;
        std::fs::write(&path, render(run_at, metrics, findings, proposals))?;
        info!(path = %path.display(), "Wrote analysis report");
        Ok(path)
    }
}

pub fn render(
    run_at: Timestamp,
    metrics: &BTreeMap<String, SkillMetrics>,
    findings: &[Finding],
    proposals: &[Proposal],
) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "# Skill Evolution Report\n\nGenerated: {}\n\n",
        run_at.format("%Y-%m-%d %H:%M %Z")
    ));

    out.push_str("## Usage\n\n");
    if metrics.is_empty() {
        out.push_str("No skills in the corpus.\n\n");
    } else {
        out.push_str("| Skill | Invocations | Success | Failures | Skips | Avg ms |\n");
        out.push_str("|---|---:|---:|---:|---:|---:|\n");
        for m in metrics.values() {
            let success = if m.invocation_count > 0 {
                format!("{:.0}%", m.success_rate())
            } else {
                "-".to_string()
            };
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} | {:.0} |\n",
                m.skill, m.invocation_count, success, m.failure_count, m.skip_count, m.avg_duration_ms
            ));
        }
        out.push('\n');
    }

    out.push_str("## Findings\n\n");
    if findings.is_empty() {
        out.push_str("No improvement opportunities detected.\n\n");
    } else {
        for finding in findings {
            out.push_str(&format!(
                "- **{}** `{}`: {}\n",
                finding.kind, finding.skill, finding.summary
            ));
            for line in &finding.evidence {
                out.push_str(&format!("  - {}\n", line));
            }
        }
        out.push('\n');
    }

    out.push_str("## Proposals\n\n");
    if proposals.is_empty() {
        out.push_str("No proposals created or updated this run.\n");
    } else {
        for proposal in proposals {
            out.push_str(&format!(
                "- `{}` ({}, {}) {} -- expires {}\n",
                proposal.proposal_id,
                proposal.change_level,
                proposal.status,
                proposal.title,
                proposal.expires_at.format("%Y-%m-%d")
            ));
        }
    }

    out
}
