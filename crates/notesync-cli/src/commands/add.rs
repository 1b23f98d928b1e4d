use std::path::Path;

use notesync_core::RecordDraft;

use crate::commands::common::{open_store, resolve_record_text};
use crate::error::CliError;

pub async fn run_add(text_parts: &[String], db_path: &Path) -> Result<(), CliError> {
    let text = resolve_record_text(text_parts)?;

    let store = open_store(db_path)?;
    let record = store.create(RecordDraft::from_text(&text)).await?;

    println!("{}", record.id);
    Ok(())
}
