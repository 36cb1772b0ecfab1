mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "skillevo")]
#[command(about = "Usage-driven evolution for skill documents", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit machine-readable JSON instead of human output
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the analysis pipeline and create/refresh proposals
    Analyze {
        /// Run even if an analysis already happened today
        #[arg(long)]
        force: bool,

        /// Analysis window in days (overrides config)
        #[arg(long)]
        days: Option<i64>,

        /// Restrict the run to one skill
        #[arg(long)]
        skill: Option<String>,

        /// Show findings and would-be proposals without persisting anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Manage evolution proposals
    Proposals {
        #[command(subcommand)]
        command: ProposalsCommands,
    },

    /// Apply an approved proposal (or all eligible ones)
    Apply {
        /// Proposal ID (omit with --all)
        proposal_id: Option<String>,

        /// Apply every approved proposal whose delay window has opened
        #[arg(long)]
        all: bool,

        /// With --all: only apply proposals at this level (patch/minor/major)
        #[arg(long)]
        level: Option<String>,

        /// Verify preconditions and content without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Roll an applied proposal back to its backup
    Revert {
        /// Proposal ID
        proposal_id: String,
    },

    /// Record and inspect usage events
    Events {
        #[command(subcommand)]
        command: EventsCommands,
    },

    /// Render the usage/findings digest for the current window
    Report,
}

#[derive(Subcommand)]
enum ProposalsCommands {
    /// List proposals, oldest first
    List {
        /// Filter by status (pending/approved/rejected/expired/applied/rolled_back)
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one proposal in full
    Show {
        /// Proposal ID
        proposal_id: String,
    },
    /// Approve a pending proposal (eligible immediately)
    Approve {
        /// Proposal ID
        proposal_id: String,
    },
    /// Reject a pending proposal
    Reject {
        /// Proposal ID
        proposal_id: String,
    },
    /// Push a pending proposal's expiry out
    Extend {
        /// Proposal ID
        proposal_id: String,
        /// Days to add
        #[arg(long, default_value = "7")]
        days: i64,
    },
}

#[derive(Subcommand)]
enum EventsCommands {
    /// Append one usage event to today's log
    Append {
        /// Target skill name
        skill: String,
        /// Event action (invoked/skipped)
        #[arg(long, default_value = "invoked")]
        action: String,
        /// Invocation result (success/failure/cancelled)
        #[arg(long)]
        result: Option<String>,
        /// Invocation duration in milliseconds
        #[arg(long)]
        duration_ms: Option<u64>,
        /// Error text for failed invocations
        #[arg(long)]
        error: Option<String>,
        /// Why the skill was skipped
        #[arg(long)]
        reason: Option<String>,
        /// Session identifier
        #[arg(long)]
        session: Option<String>,
    },
    /// Show recent events
    List {
        /// How many days back to read
        #[arg(long, default_value = "7")]
        days: i64,
        /// Read one date partition (YYYY-MM-DD) instead
        #[arg(long)]
        date: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("❌ {}", e);
        let code = e
            .downcast_ref::<skillevo_core::Error>()
            .map(skillevo_engine::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let json = cli.json;
    match cli.command {
        Commands::Analyze {
            force,
            days,
            skill,
            dry_run,
        } => {
            commands::analyze::run(force, days, skill, dry_run, json).await?;
        }

        Commands::Proposals { command } => match command {
            ProposalsCommands::List { status } => {
                commands::proposals::list(status.as_deref(), json).await?;
            }
            ProposalsCommands::Show { proposal_id } => {
                commands::proposals::show(&proposal_id, json).await?;
            }
            ProposalsCommands::Approve { proposal_id } => {
                commands::proposals::approve(&proposal_id).await?;
            }
            ProposalsCommands::Reject { proposal_id } => {
                commands::proposals::reject(&proposal_id).await?;
            }
            ProposalsCommands::Extend { proposal_id, days } => {
                commands::proposals::extend(&proposal_id, days).await?;
            }
        },

        Commands::Apply {
            proposal_id,
            all,
            level,
            dry_run,
        } => {
            commands::apply_cmd::run(proposal_id.as_deref(), all, level.as_deref(), dry_run, json)
                .await?;
        }

        Commands::Revert { proposal_id } => {
            commands::apply_cmd::revert(&proposal_id, json).await?;
        }

        Commands::Events { command } => match command {
            EventsCommands::Append {
                skill,
                action,
                result,
                duration_ms,
                error,
                reason,
                session,
            } => {
                commands::events_cmd::append(
                    &skill, &action, result, duration_ms, error, reason, session,
                )
                .await?;
            }
            EventsCommands::List { days, date } => {
                commands::events_cmd::list(days, date.as_deref(), json).await?;
            }
        },

        Commands::Report => {
            commands::report_cmd::run().await?;
        }
    }
    Ok(())
}
