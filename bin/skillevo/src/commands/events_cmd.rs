use skillevo_core::{Error, EventResult, Paths, UsageEvent};
use skillevo_engine::EvolutionService;

#[allow(clippy::too_many_arguments)]
pub async fn append(
    skill: &str,
    action: &str,
    result: Option<String>,
    duration_ms: Option<u64>,
    error: Option<String>,
    reason: Option<String>,
    session: Option<String>,
) -> anyhow::Result<()> {
    let service = EvolutionService::open(Paths::new())?;

    let mut event = match action {
        "invoked" => {
            let result = match result.as_deref() {
                Some("success") | None => EventResult::Success,
                Some("failure") => EventResult::Failure,
                Some("cancelled") => EventResult::Cancelled,
                Some(other) => {
                    return Err(Error::Validation(format!("Unknown result: {}", other)).into())
                }
            };
            UsageEvent::invoked(skill, result)
        }
        "skipped" => UsageEvent::skipped(skill, reason),
        other => return Err(Error::Validation(format!("Unknown action: {}", other)).into()),
    };
    event.duration_ms = duration_ms;
    event.error = error;
    event.session_id = session;

    service.record_event(&event)?;
    println!("✅ Recorded {} event for {}", action, skill);
    Ok(())
}

pub async fn list(days: i64, date: Option<&str>, json: bool) -> anyhow::Result<()> {
    let service = EvolutionService::open(Paths::new())?;
    let (events, scope) = match date {
        Some(date) => (service.events_on(date)?, date.to_string()),
        None => (service.recent_events(days)?, format!("past {} days", days)),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }

    if events.is_empty() {
        println!("(No events, {})", scope);
        return Ok(());
    }

    println!();
    println!("📊 Events — {} ({})", scope, events.len());
    for event in &events {
        let detail = event
            .result
            .map(|r| format!("{:?}", r).to_lowercase())
            .or_else(|| event.reason.clone())
            .or_else(|| {
                event
                    .version_after
                    .as_ref()
                    .map(|v| format!("→ v{}", v))
            })
            .unwrap_or_default();
        println!(
            "  {}  {:?}  {}  {}",
            event.timestamp.format("%Y-%m-%d %H:%M"),
            event.action,
            event.skill,
            detail
        );
    }
    println!();
    Ok(())
}
