use std::process::ExitCode;

use clap::{Parser, Subcommand};
use content_migrate::cli::counts::{self, CountsConfig};
use content_migrate::cli::migrate::{self, MigrateConfig};
use content_migrate::logging::{init_logging, DEFAULT_FILTER};
use content_migrate::util::env;
use tracing::error;

#[derive(Parser, Debug)]
#[command(
    name = "content-migrate",
    version,
    about = "Export legacy content and import it into the new schema"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    migrate: MigrateConfig,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Print destination row counts per entity table
    Counts,
}

#[tokio::main]
async fn main() -> ExitCode {
    // .env must be loaded before clap reads env-backed flags.
    env::init_env();
    let cli = Cli::parse();

    if let Err(e) = init_logging(DEFAULT_FILTER, cli.migrate.log_file.as_deref()) {
        eprintln!("{e:#}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Some(Commands::Counts) => {
            counts::run(CountsConfig {
                database_url: cli.migrate.database_url.clone(),
            })
            .await
        }
        None => migrate::run(cli.migrate).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "content migration failed");
            ExitCode::FAILURE
        }
    }
}
