use std::path::Path;

use crate::commands::common::{
    format_record_detail, normalize_record_identifier, open_store, resolve_record,
};
use crate::error::CliError;

pub async fn run_show(id: &str, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let normalized_id = normalize_record_identifier(id)?;
    let store = open_store(db_path)?;
    let record = resolve_record(&normalized_id, &store).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        for line in format_record_detail(&record) {
            println!("{line}");
        }
    }
    Ok(())
}
