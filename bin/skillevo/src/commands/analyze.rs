use skillevo_core::Paths;
use skillevo_engine::{AnalysisOptions, EvolutionService};

/// Run the full analysis pipeline.
pub async fn run(
    force: bool,
    days: Option<i64>,
    skill: Option<String>,
    dry_run: bool,
    json: bool,
) -> anyhow::Result<()> {
    let service = EvolutionService::open(Paths::new())?;
    let options = AnalysisOptions {
        force,
        days,
        skill,
        dry_run,
    };
    let outcome = service.run_analysis_with(&options).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    if outcome.skipped {
        println!("⏭  Analysis already ran today. Use --force to run again.");
        return Ok(());
    }

    println!();
    println!("🔍 Analysis complete");
    println!(
        "  Skills: {}  Events in window: {}  Findings: {}",
        outcome.skills_analyzed,
        outcome.events_in_window,
        outcome.findings.len()
    );

    if !outcome.findings.is_empty() {
        println!();
        println!("  Findings:");
        for finding in &outcome.findings {
            println!("    • [{}] {}: {}", finding.kind, finding.skill, finding.summary);
        }
    }

    if !outcome.created.is_empty() {
        println!();
        if dry_run {
            println!("  📝 Would create proposals (dry run):");
        } else {
            println!("  📝 Created proposals:");
        }
        for id in &outcome.created {
            let approved = if outcome.auto_approved.contains(id) {
                " (auto-approved)"
            } else {
                ""
            };
            println!("    • {}{}", id, approved);
        }
    }
    if !outcome.merged.is_empty() {
        println!();
        println!("  🔀 Merged into open proposals:");
        for id in &outcome.merged {
            println!("    • {}", id);
        }
    }
    if !outcome.deferred.is_empty() {
        println!();
        println!("  ⏸  Deferred (approved proposal already in flight):");
        for id in &outcome.deferred {
            println!("    • {}", id);
        }
    }
    if outcome.created.is_empty() && outcome.merged.is_empty() && outcome.findings.is_empty() {
        println!();
        println!("  ✅ No improvement opportunities detected.");
    }

    if let Some(path) = &outcome.report_path {
        println!();
        println!("  📄 Report: {}", path.display());
    }
    println!();
    Ok(())
}
