use std::path::Path;

use notesync_core::{RecordDraft, RecordPatch};

use crate::commands::common::{
    capture_editor_input_with_initial, editable_text, normalize_record_identifier, open_store,
    patch_from_draft, resolve_record,
};
use crate::error::CliError;

pub async fn run_edit(
    id: &str,
    title: Option<String>,
    content: Option<String>,
    db_path: &Path,
) -> Result<(), CliError> {
    let normalized_id = normalize_record_identifier(id)?;
    let store = open_store(db_path)?;
    let record = resolve_record(&normalized_id, &store).await?;

    let patch = if title.is_none() && content.is_none() {
        let Some(edited_text) = capture_editor_input_with_initial(&editable_text(&record))? else {
            return Err(CliError::EmptyEditedContent);
        };
        patch_from_draft(&record, RecordDraft::from_text(&edited_text))
    } else {
        RecordPatch { title, content }
    };

    if patch.is_empty() {
        println!("{}", record.id);
        return Ok(());
    }

    let updated = store.update(&record.id, patch).await?;
    println!("{}", updated.id);
    Ok(())
}
