use std::path::Path;

use crate::commands::common::{format_status_lines, load_settings, open_store, status_to_item};
use crate::error::CliError;

pub async fn run_status(as_json: bool, db_path: &Path, config_path: &Path) -> Result<(), CliError> {
    let settings = load_settings(config_path)?;
    let status = open_store(db_path)?.status().await?;

    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&status_to_item(&status, &settings))?
        );
    } else {
        for line in format_status_lines(&status, &settings) {
            println!("{line}");
        }
    }
    Ok(())
}
