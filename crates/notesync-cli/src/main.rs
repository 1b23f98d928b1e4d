//! notesync CLI - offline-first notes from the command line
//!
//! Records are written locally first; `sync` and `watch` reconcile them
//! with the remote API.

mod cli;
mod commands;
mod error;


use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::add::run_add;
use crate::commands::common::{resolve_config_path, resolve_db_path};
use crate::commands::delete::run_delete;
use crate::commands::edit::run_edit;
use crate::commands::list::run_list;
use crate::commands::show::run_show;
use crate::commands::status::run_status;
use crate::commands::sync::{run_resolve, run_sync, run_sync_conflicts};
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("notesync=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path)?;
    let config_path = resolve_config_path(cli.config)?;

    match cli.command {
        Some(Commands::Add { text }) => run_add(&text, &db_path).await?,
        Some(Commands::List {
            limit,
            state,
            search,
            json,
        }) => {
            run_list(limit, state, search.as_deref(), json, &db_path).await?;
        }
        Some(Commands::Show { id, json }) => run_show(&id, json, &db_path).await?,
        Some(Commands::Edit { id, title, content }) => {
            run_edit(&id, title, content, &db_path).await?;
        }
        Some(Commands::Delete { id }) => run_delete(&id, &db_path).await?,
        Some(Commands::Sync) => run_sync(&db_path, &config_path).await?,
        Some(Commands::Status { json }) => run_status(json, &db_path, &config_path).await?,
        Some(Commands::Conflicts { limit, open, json }) => {
            run_sync_conflicts(limit, open, json, &db_path).await?;
        }
        Some(Commands::Resolve { id, keep }) => {
            run_resolve(&id, keep, &db_path, &config_path).await?;
        }
        Some(Commands::Watch) => run_watch(&db_path, &config_path).await?,
        None => {
            // Quick capture mode: notesync "my thought"
            if cli.text.is_empty() {
                Cli::command().print_help().map_err(CliError::Io)?;
                println!();
            } else {
                run_add(&cli.text, &db_path).await?;
            }
        }
    }

    Ok(())
}
