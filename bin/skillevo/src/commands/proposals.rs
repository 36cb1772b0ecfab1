use skillevo_core::{Paths, Proposal, ProposalStatus};
use skillevo_engine::EvolutionService;

pub async fn list(status: Option<&str>, json: bool) -> anyhow::Result<()> {
    let service = EvolutionService::open(Paths::new())?;
    let filter = status
        .map(|s| s.parse::<ProposalStatus>())
        .transpose()
        .map_err(anyhow::Error::from)?;
    let proposals = service.list(filter).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&proposals)?);
        return Ok(());
    }

    if proposals.is_empty() {
        println!("(No proposals)");
        return Ok(());
    }

    println!();
    println!("📋 Proposals ({})", proposals.len());
    for p in &proposals {
        println!(
            "  {} {} [{}] {} — {}",
            status_icon(p.status),
            p.proposal_id,
            p.change_level,
            p.status,
            p.title
        );
        println!(
            "      created {}  expires {}",
            p.created_at.format("%Y-%m-%d"),
            p.expires_at.format("%Y-%m-%d")
        );
    }
    println!();
    Ok(())
}

pub async fn show(proposal_id: &str, json: bool) -> anyhow::Result<()> {
    let service = EvolutionService::open(Paths::new())?;
    let proposal = service.show(proposal_id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&proposal)?);
        return Ok(());
    }

    print_proposal(&proposal);
    Ok(())
}

pub async fn approve(proposal_id: &str) -> anyhow::Result<()> {
    let service = EvolutionService::open(Paths::new())?;
    let proposal = service.approve(proposal_id).await?;
    println!(
        "✅ Approved {} ({} change to {})",
        proposal.proposal_id, proposal.change_level, proposal.skill
    );
    println!("   Apply with: skillevo apply {}", proposal.proposal_id);
    Ok(())
}

pub async fn reject(proposal_id: &str) -> anyhow::Result<()> {
    let service = EvolutionService::open(Paths::new())?;
    let proposal = service.reject(proposal_id).await?;
    println!("🚫 Rejected {}", proposal.proposal_id);
    Ok(())
}

pub async fn extend(proposal_id: &str, days: i64) -> anyhow::Result<()> {
    let service = EvolutionService::open(Paths::new())?;
    let proposal = service.extend(proposal_id, days)?;
    println!(
        "⏰ Extended {} to {}",
        proposal.proposal_id,
        proposal.expires_at.format("%Y-%m-%d")
    );
    Ok(())
}

fn print_proposal(p: &Proposal) {
    println!();
    println!("📋 {} {}", status_icon(p.status), p.proposal_id);
    println!("  Skill:   {}", p.skill);
    println!("  Level:   {}", p.change_level);
    println!("  Status:  {}", p.status);
    println!("  Trigger: {}", p.source_trigger);
    println!("  Title:   {}", p.title);
    println!("  Created: {}", p.created_at.format("%Y-%m-%d %H:%M"));
    println!("  Expires: {}", p.expires_at.format("%Y-%m-%d %H:%M"));
    if let Some(eligible) = p.eligible_at {
        println!("  Eligible: {}", eligible.format("%Y-%m-%d %H:%M"));
    }
    if let Some(backup) = &p.backup_path {
        println!("  Backup:  {}", backup.display());
    }

    if !p.description.is_empty() {
        println!();
        println!("  Description:");
        for line in p.description.lines() {
            println!("    {}", line);
        }
    }

    println!();
    println!("  Changes ({}):", p.changes.len());
    for change in &p.changes {
        match change {
            skillevo_core::Change::Edit { section, before, after } => {
                println!("    ✏️  edit [{}]", section);
                println!("        - {}", preview(before));
                println!("        + {}", preview(after));
            }
            skillevo_core::Change::Add { anchor, content } => {
                println!("    ➕ add @ {}", anchor);
                println!("        + {}", preview(content));
            }
            skillevo_core::Change::Remove { section, content } => {
                println!("    ➖ remove [{}]", section);
                println!("        - {}", preview(content));
            }
            skillevo_core::Change::Review { note } => {
                println!("    👀 review: {}", preview(note));
            }
        }
    }

    if !p.impact.is_empty() {
        println!();
        println!("  Impact:");
        for line in &p.impact {
            println!("    • {}", line);
        }
    }
    println!();
}

fn preview(text: &str) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() > 80 {
        let cut: String = flat.chars().take(77).collect();
        format!("{}...", cut)
    } else {
        flat
    }
}

fn status_icon(status: ProposalStatus) -> &'static str {
    match status {
        ProposalStatus::Pending => "🕐",
        ProposalStatus::Approved => "👍",
        ProposalStatus::Rejected => "🚫",
        ProposalStatus::Expired => "💤",
        ProposalStatus::Applied => "✅",
        ProposalStatus::RolledBack => "↩️",
    }
}
