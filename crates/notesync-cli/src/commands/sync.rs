use std::path::Path;

use notesync_core::sync::Resolution;
use notesync_core::SyncError;

use crate::cli::KeepSide;
use crate::commands::common::{
    build_engine, format_report_lines, format_sync_conflict_lines, load_settings,
    normalize_record_identifier, open_store, resolve_open_conflict, sync_conflict_to_item,
    SyncConflictItem,
};
use crate::error::CliError;

pub async fn run_sync(db_path: &Path, config_path: &Path) -> Result<(), CliError> {
    let settings = load_settings(config_path)?;
    let engine = build_engine(db_path, &settings)?;

    match engine.run_cycle().await {
        Ok(report) => {
            for line in format_report_lines(&report) {
                println!("{line}");
            }
            Ok(())
        }
        Err(SyncError::Offline) => {
            println!("{}", SyncError::Offline);
            Ok(())
        }
        Err(error) => Err(error.into()),
    }
}

pub async fn run_sync_conflicts(
    limit: usize,
    open_only: bool,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let conflicts = open_store(db_path)?.conflicts(limit, open_only).await?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(sync_conflict_to_item)
            .collect::<Vec<SyncConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_sync_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_resolve(
    id: &str,
    keep: KeepSide,
    db_path: &Path,
    config_path: &Path,
) -> Result<(), CliError> {
    let normalized_id = normalize_record_identifier(id)?;
    let settings = load_settings(config_path)?;
    let engine = build_engine(db_path, &settings)?;
    let open = resolve_open_conflict(&normalized_id, engine.store()).await?;

    let resolution = Resolution::from(keep);
    let resolved = engine.resolve_conflict(&open.record_id, resolution).await?;
    println!("{}", resolved.record_id);
    if resolution == Resolution::KeepLocal {
        println!("Local copy will be pushed on the next sync");
    }
    Ok(())
}
