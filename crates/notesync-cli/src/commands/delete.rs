use std::path::Path;

use crate::commands::common::{normalize_record_identifier, open_store, resolve_record};
use crate::error::CliError;

pub async fn run_delete(id: &str, db_path: &Path) -> Result<(), CliError> {
    let normalized_id = normalize_record_identifier(id)?;
    let store = open_store(db_path)?;
    let record = resolve_record(&normalized_id, &store).await?;

    store.delete(&record.id).await?;
    println!("{}", record.id);
    Ok(())
}
