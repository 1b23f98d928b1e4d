use std::path::Path;
use std::sync::Arc;

use notesync_core::sync::{SchedulerConfig, SyncScheduler, Trigger};

use crate::commands::common::{build_engine, format_outcome_line, load_settings};
use crate::error::CliError;

/// Run the scheduler in the foreground until Ctrl-C
pub async fn run_watch(db_path: &Path, config_path: &Path) -> Result<(), CliError> {
    let settings = load_settings(config_path)?;
    if !settings.sync_enabled {
        return Err(CliError::SyncDisabled(config_path.display().to_string()));
    }

    let engine = Arc::new(build_engine(db_path, &settings)?);
    let (handle, mut outcomes) =
        SyncScheduler::spawn(engine, SchedulerConfig::from_settings(&settings));
    handle.trigger(Trigger::Immediate);
    println!(
        "Syncing every {}s. Press Ctrl-C to stop.",
        settings.interval_secs
    );

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            outcome = outcomes.recv() => match outcome {
                Some(outcome) => println!("{}", format_outcome_line(&outcome)),
                None => break,
            },
        }
    }

    handle.shutdown().await;
    Ok(())
}
