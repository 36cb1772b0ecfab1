use skillevo_core::{ChangeLevel, Paths};
use skillevo_engine::{ApplicationResult, EvolutionService};

pub async fn run(
    proposal_id: Option<&str>,
    all: bool,
    level: Option<&str>,
    dry_run: bool,
    json: bool,
) -> anyhow::Result<()> {
    let service = EvolutionService::open(Paths::new())?;
    let level = level
        .map(|l| l.parse::<ChangeLevel>())
        .transpose()
        .map_err(anyhow::Error::from)?;

    // --level alone means the whole batch at that level.
    match (proposal_id, all || level.is_some()) {
        (Some(id), false) => {
            if dry_run {
                let proposal = service.verify(id)?;
                println!(
                    "✅ {} verifies cleanly against {} ({} change, {} change items)",
                    proposal.proposal_id,
                    proposal.skill,
                    proposal.change_level,
                    proposal.changes.len()
                );
                return Ok(());
            }
            let result = service.apply(id).await?;
            report(&result, json)?;
        }
        (None, true) => {
            if dry_run {
                anyhow::bail!("--dry-run takes a single proposal ID");
            }
            let results = service.apply_eligible(level).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
                return Ok(());
            }
            if results.is_empty() {
                println!("(No eligible proposals)");
                return Ok(());
            }
            for result in &results {
                report(result, false)?;
            }
        }
        _ => anyhow::bail!("Pass a proposal ID, or --all/--level for a batch (not both)"),
    }
    Ok(())
}

fn report(result: &ApplicationResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    println!(
        "✅ Applied {} — {} v{} → v{}",
        result.proposal_id, result.skill, result.version_before, result.version_after
    );
    println!("   Backup: {}", result.backup_path.display());
    for note in &result.review_notes {
        println!("   👀 Needs review: {}", note);
    }
    Ok(())
}

pub async fn revert(proposal_id: &str, json: bool) -> anyhow::Result<()> {
    let service = EvolutionService::open(Paths::new())?;
    let result = service.revert(proposal_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    println!(
        "↩️  Rolled back {} — {} restored to v{}",
        result.proposal_id, result.skill, result.restored_version
    );
    Ok(())
}
