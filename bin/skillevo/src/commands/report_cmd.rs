use skillevo_core::Paths;
use skillevo_engine::EvolutionService;

/// Print the current-window digest to stdout. The durable weekly copy is
/// written by `skillevo analyze`.
pub async fn run() -> anyhow::Result<()> {
    let service = EvolutionService::open(Paths::new())?;
    print!("{}", service.render_report()?);
    Ok(())
}
