use std::path::Path;

use notesync_core::db::RecordQuery;
use notesync_core::SyncState;

use crate::commands::common::{
    format_record_lines, open_store, record_to_list_item, RecordListItem,
};
use crate::error::CliError;

pub async fn run_list(
    limit: usize,
    state: Option<SyncState>,
    search: Option<&str>,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let mut query = RecordQuery::recent(limit);
    if let Some(state) = state {
        query = query.with_states([state]);
    }
    if let Some(text) = search.map(str::trim).filter(|text| !text.is_empty()) {
        query = query.with_text(text);
    }
    let records = open_store(db_path)?.query(&query).await?;

    if as_json {
        let json_items = records
            .iter()
            .map(record_to_list_item)
            .collect::<Vec<RecordListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_record_lines(&records) {
            println!("{line}");
        }
    }

    Ok(())
}
