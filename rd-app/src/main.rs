use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::debug;

use rd_app::app::{self, CreditOptions};
use rd_app::config::AppConfig;
use rd_app::logging;
use rd_core::calculations::CreditMethod;

// ─── CLI definition ──────────────────────────────────────────────────────────

/// R&D tax credit calculator.
///
/// Recalculates qualified research expenses from stored allocations and
/// computes the federal and state research credit.
#[derive(Debug, Parser)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database backend to use. Overrides the config file.
    #[arg(long)]
    backend: Option<String>,

    /// Database connection string. Overrides the config file.
    /// For SQLite this is a file path (e.g. `rd_credit.db`) or `:memory:`.
    #[arg(long)]
    db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Recompute every entity's QRE and write the results back.
    Recalculate {
        #[arg(long)]
        business_year: String,
    },

    /// Compute the federal and state credit of a business year.
    Credit {
        #[arg(long)]
        business_year: String,

        /// `asc` or `standard`.
        #[arg(long)]
        method: Option<String>,

        /// Apply the Section 280C reduction.
        #[arg(long)]
        use_280c: bool,

        /// Two-letter state code.
        #[arg(long)]
        state: Option<String>,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the time budget of a business year.
    Segments {
        #[arg(long)]
        business_year: String,

        /// Non-R&D percentage to lay out instead of the stored one.
        #[arg(long)]
        non_rd: Option<Decimal>,
    },
}

// ─── entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(backend) = cli.backend {
        config.database.backend = backend;
    }
    if let Some(db) = cli.db {
        config.database.connection_string = db;
    }

    logging::init_logging(&config.logging.level, config.logging.file.as_deref())?;

    debug!("connecting to {} backend", config.database.backend);
    let registry = app::build_registry();
    let repo = registry
        .create(&config.database)
        .await
        .context("Failed to open repository")?;

    match cli.command {
        Command::Recalculate { business_year } => {
            let report =
                app::recalculate_business_year(&*repo, &business_year, config.debounce()).await?;
            print!("{}", report);
        }
        Command::Credit {
            business_year,
            method,
            use_280c,
            state,
            json,
        } => {
            let method = match method {
                Some(value) => match CreditMethod::parse(&value) {
                    Some(method) => method,
                    None => bail!("unknown credit method '{}', expected asc or standard", value),
                },
                None => config.credit.method,
            };
            let options = CreditOptions {
                config: config.credit_config(),
                method,
                use_280c: use_280c || config.credit.use_280c,
                state: state
                    .or_else(|| config.credit.state.clone())
                    .map(|s| s.to_ascii_uppercase()),
            };

            let report = app::calculate_credits(&*repo, &business_year, &options).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report);
            }
        }
        Command::Segments {
            business_year,
            non_rd,
        } => {
            let report = app::segments(&*repo, &business_year, non_rd).await?;
            print!("{}", report);
        }
    }

    Ok(())
}
