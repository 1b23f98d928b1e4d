use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use notesync_core::sync::{CycleCause, CycleOutcome, CycleReport, EngineConfig, Trigger};
use notesync_core::{
    HttpRemoteClient, ReconciliationEngine, Record, RecordDraft, RecordId, RecordPatch,
    RecordStore, StoreStatus, SyncConflict, SyncSettings, SyncState,
};
use serde::Serialize;

use crate::error::CliError;

const ENV_DB_PATH: &str = "NOTESYNC_DB_PATH";
const ENV_CONFIG_PATH: &str = "NOTESYNC_CONFIG_PATH";
const MAX_OPEN_CONFLICTS: usize = 500;

#[derive(Debug, Serialize)]
pub struct RecordListItem {
    pub id: String,
    pub title: String,
    pub preview: String,
    pub sync_state: SyncState,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_synced_at: Option<i64>,
    pub relative_time: String,
}

#[derive(Debug, Serialize)]
pub struct SyncConflictItem {
    pub id: i64,
    pub record_id: String,
    pub strategy: String,
    pub winner: Option<String>,
    pub local_updated_at: i64,
    pub remote_updated_at: i64,
    pub detected_at_iso: String,
    pub resolved_at: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct StatusItem {
    pub not_synced: usize,
    pub syncing: usize,
    pub synced: usize,
    pub sync_failed: usize,
    pub pending: usize,
    pub open_conflicts: usize,
    pub pull_watermark: i64,
    pub api_base_url: String,
    pub sync_enabled: bool,
}

pub fn open_store(db_path: &Path) -> Result<RecordStore, CliError> {
    Ok(RecordStore::open_path(db_path)?)
}

/// Settings file overlaid with `NOTESYNC_*` environment variables
pub fn load_settings(config_path: &Path) -> Result<SyncSettings, CliError> {
    let mut settings = SyncSettings::load_from_path(config_path)?;
    settings.apply_env()?;
    Ok(settings)
}

pub fn build_engine(
    db_path: &Path,
    settings: &SyncSettings,
) -> Result<ReconciliationEngine<HttpRemoteClient>, CliError> {
    let store = open_store(db_path)?;
    let client = HttpRemoteClient::from_settings(settings)?;
    tracing::debug!("Remote API at {}", client.base_url());
    Ok(ReconciliationEngine::new(
        store,
        client,
        EngineConfig::from_settings(settings),
    ))
}

pub async fn resolve_record(record_query: &str, store: &RecordStore) -> Result<Record, CliError> {
    if let Ok(record_id) = record_query.parse::<RecordId>() {
        if let Ok(record) = store.get(&record_id).await {
            return Ok(record);
        }
    }

    let matching_ids = store.find_by_prefix(record_query, 3).await?;

    match matching_ids.as_slice() {
        [] => Err(CliError::RecordNotFound(record_query.to_string())),
        [only] => {
            let resolved_id = only
                .parse::<RecordId>()
                .map_err(|_| CliError::RecordNotFound(record_query.to_string()))?;
            Ok(store.get(&resolved_id).await?)
        }
        _ => Err(ambiguous(record_query, &matching_ids)),
    }
}

/// Find the open conflict whose record id matches `record_query`
///
/// Conflicts can outlive the live record (a conflicting deletion), so this
/// matches against the conflict log rather than the records table.
pub async fn resolve_open_conflict(
    record_query: &str,
    store: &RecordStore,
) -> Result<SyncConflict, CliError> {
    let open = store.conflicts(MAX_OPEN_CONFLICTS, true).await?;
    let mut matches = open
        .into_iter()
        .filter(|conflict| conflict.record_id.to_string().starts_with(record_query))
        .collect::<Vec<_>>();

    match matches.len() {
        0 => Err(CliError::ConflictNotFound(record_query.to_string())),
        1 => Ok(matches.remove(0)),
        _ => {
            let ids = matches
                .iter()
                .map(|conflict| conflict.record_id.to_string())
                .collect::<Vec<_>>();
            Err(ambiguous(record_query, &ids))
        }
    }
}

fn ambiguous(record_query: &str, ids: &[String]) -> CliError {
    let options = ids
        .iter()
        .take(3)
        .map(|id| short_id(id))
        .collect::<Vec<_>>()
        .join(", ");

    CliError::AmbiguousRecordId(format!(
        "ID prefix '{record_query}' is ambiguous; matches: {options}"
    ))
}

pub fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

pub fn format_record_lines(records: &[Record]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let short_id = short_id(&record.id.to_string());
            let preview = record_preview(record, 40);
            let relative_time = format_relative_time(record.updated_at, now_ms);
            let state = record.sync_state.label();

            format!("{short_id:<13}  {preview:<40}  {relative_time:<10}  {state}")
        })
        .collect()
}

pub fn format_record_detail(record: &Record) -> Vec<String> {
    let last_synced = record
        .last_synced_at
        .map_or_else(|| "never".to_string(), format_sync_timestamp);

    let mut lines = vec![
        format!("id:          {}", record.id),
        format!("title:       {}", record.title),
        format!("state:       {}", record.sync_state.label()),
        format!("updated:     {}", format_sync_timestamp(record.updated_at)),
        format!("last synced: {last_synced}"),
    ];
    if !record.content.is_empty() {
        lines.push(String::new());
        lines.extend(record.content.lines().map(str::to_string));
    }
    lines
}

pub fn record_to_list_item(record: &Record) -> RecordListItem {
    let now_ms = Utc::now().timestamp_millis();

    RecordListItem {
        id: record.id.to_string(),
        title: record.title.clone(),
        preview: record_preview(record, 80),
        sync_state: record.sync_state,
        created_at: record.created_at,
        updated_at: record.updated_at,
        last_synced_at: record.last_synced_at,
        relative_time: format_relative_time(record.updated_at, now_ms),
    }
}

pub fn sync_conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    SyncConflictItem {
        id: conflict.id,
        record_id: conflict.record_id.to_string(),
        strategy: conflict.strategy.as_str().to_string(),
        winner: conflict.winner.map(|winner| winner.as_str().to_string()),
        local_updated_at: conflict.local_updated_at,
        remote_updated_at: conflict.remote_updated_at,
        detected_at_iso: format_sync_timestamp(conflict.detected_at),
        resolved_at: conflict.resolved_at,
    }
}

pub fn status_to_item(status: &StoreStatus, settings: &SyncSettings) -> StatusItem {
    StatusItem {
        not_synced: status.count(SyncState::NotSynced),
        syncing: status.count(SyncState::Syncing),
        synced: status.count(SyncState::Synced),
        sync_failed: status.count(SyncState::SyncFailed),
        pending: status.pending(),
        open_conflicts: status.open_conflicts,
        pull_watermark: status.pull_watermark,
        api_base_url: settings.api_base_url(),
        sync_enabled: settings.sync_enabled,
    }
}

/// Title, or the first content line when the title is blank
pub fn record_preview(record: &Record, max_chars: usize) -> String {
    let collapsed = record
        .title_preview(usize::MAX)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_sync_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            let outcome = conflict
                .winner
                .map_or("open", |winner| winner.as_str());
            format!(
                "{}  {:<6}  {:<6}  record={}  local={} remote={}",
                format_sync_timestamp(conflict.detected_at),
                conflict.strategy.as_str(),
                outcome,
                conflict.record_id,
                conflict.local_updated_at,
                conflict.remote_updated_at
            )
        })
        .collect()
}

pub fn format_status_lines(status: &StoreStatus, settings: &SyncSettings) -> Vec<String> {
    let watermark = if status.pull_watermark > 0 {
        format!("server change #{}", status.pull_watermark)
    } else {
        "never".to_string()
    };

    let mut lines = vec![
        format!("Remote:        {}", settings.api_base_url()),
        format!("Pending:       {}", status.pending()),
    ];
    lines.extend(
        SyncState::ALL
            .iter()
            .map(|state| format!("  {:<12} {}", state.label(), status.count(*state))),
    );
    lines.push(format!("Open conflicts: {}", status.open_conflicts));
    lines.push(format!("Last pull:     {watermark}"));
    if !settings.sync_enabled {
        lines.push("Automatic sync is disabled".to_string());
    }
    lines
}

pub fn format_report_lines(report: &CycleReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Pushed {}, pulled {}",
        report.pushed, report.pulled
    )];

    for (label, count) in [
        ("Conflicts", report.conflicts),
        ("Deferred", report.deferred),
        ("Purged", report.purged),
        ("Waiting", report.skipped),
        ("Superseded", report.superseded),
    ] {
        if count > 0 {
            lines.push(format!("{label}: {count}"));
        }
    }

    if !report.failed.is_empty() {
        lines.push(format!("Failed: {}", report.failed.len()));
        lines.extend(
            report
                .failed
                .iter()
                .map(|failure| format!("  {}  {}", short_id(&failure.id.to_string()), failure.reason)),
        );
    }
    if let Some(error) = &report.pull_error {
        lines.push(format!("Pull failed: {error}"));
    }

    lines.push(if report.is_clean() {
        "Sync completed".to_string()
    } else {
        "Sync completed with errors; failed work will be retried".to_string()
    });
    lines
}

pub const fn cause_label(cause: CycleCause) -> &'static str {
    match cause {
        CycleCause::Trigger(Trigger::Immediate) => "manual",
        CycleCause::Trigger(Trigger::RecordEdited) => "edit",
        CycleCause::Trigger(Trigger::Foreground) => "foreground",
        CycleCause::Interval => "interval",
        CycleCause::Retry => "retry",
    }
}

pub fn format_outcome_line(outcome: &CycleOutcome) -> String {
    let label = cause_label(outcome.cause);
    match &outcome.result {
        Ok(report) => format!(
            "[{label}] pushed {}, pulled {}, failed {}, conflicts {}",
            report.pushed,
            report.pulled,
            report.failed.len(),
            report.conflicts
        ),
        Err(error) => format!(
            "[{label}] {error} (failures in a row: {})",
            outcome.consecutive_failures
        ),
    }
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

/// Text handed to `$EDITOR`: title line, blank line, content
pub fn editable_text(record: &Record) -> String {
    if record.content.is_empty() {
        record.title.clone()
    } else {
        format!("{}\n\n{}", record.title, record.content)
    }
}

/// Patch holding only the fields that differ from `record`
pub fn patch_from_draft(record: &Record, draft: RecordDraft) -> RecordPatch {
    RecordPatch {
        title: (draft.title != record.title).then_some(draft.title),
        content: (draft.content != record.content).then_some(draft.content),
    }
}

pub fn resolve_record_text(text_parts: &[String]) -> Result<String, CliError> {
    if let Some(text) = normalize_content(&text_parts.join(" ")) {
        return Ok(text);
    }

    if let Some(text) = read_piped_stdin()? {
        return Ok(text);
    }

    if let Some(text) = capture_editor_input()? {
        return Ok(text);
    }

    Err(CliError::EmptyContent)
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn normalize_record_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyRecordId)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

pub fn capture_editor_input() -> Result<Option<String>, CliError> {
    capture_editor_input_with_initial("")
}

pub fn capture_editor_input_with_initial(
    initial_content: &str,
) -> Result<Option<String>, CliError> {
    let editor = preferred_editor();
    let temp_file = create_temp_record_file_path();
    std::fs::write(&temp_file, initial_content)?;

    let launch_result = launch_editor(&editor, &temp_file);
    let record_text = std::fs::read_to_string(&temp_file)?;
    let _ = std::fs::remove_file(&temp_file);

    launch_result?;
    Ok(normalize_content(&record_text))
}

pub fn launch_editor(editor: &str, file_path: &Path) -> Result<(), CliError> {
    match Command::new(editor).arg(file_path).status() {
        Ok(status) => {
            if status.success() {
                Ok(())
            } else {
                Err(CliError::EditorFailed(format!(
                    "`{editor}` exited with status {status}"
                )))
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            // EDITOR may carry arguments, e.g. "code --wait"
            let mut parts = editor.split_whitespace();
            let Some(program) = parts.next() else {
                return Err(CliError::EditorFailed("empty EDITOR command".into()));
            };

            let mut command = Command::new(program);
            command.args(parts).arg(file_path);

            let status = command.status()?;
            if status.success() {
                Ok(())
            } else {
                Err(CliError::EditorFailed(format!(
                    "`{editor}` exited with status {status}"
                )))
            }
        }
        Err(err) => Err(CliError::Io(err)),
    }
}

pub fn preferred_editor() -> String {
    env::var("VISUAL")
        .or_else(|_| env::var("EDITOR"))
        .unwrap_or_else(|_| default_editor().to_string())
}

pub const fn default_editor() -> &'static str {
    if cfg!(windows) {
        "notepad"
    } else {
        "vi"
    }
}

pub fn create_temp_record_file_path() -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    env::temp_dir().join(format!("notesync-{}-{now}.md", std::process::id()))
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    match cli_db_path.or_else(|| env::var_os(ENV_DB_PATH).map(PathBuf::from)) {
        Some(path) => Ok(path),
        None => default_db_path(),
    }
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("notesync").join("notesync.db"))
        .ok_or_else(|| CliError::Config("failed to resolve data directory".to_string()))
}

pub fn resolve_config_path(cli_config_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    match cli_config_path.or_else(|| env::var_os(ENV_CONFIG_PATH).map(PathBuf::from)) {
        Some(path) => Ok(path),
        None => default_config_path(),
    }
}

pub fn default_config_path() -> Result<PathBuf, CliError> {
    dirs::config_dir()
        .map(|dir| dir.join("notesync").join("config.json"))
        .ok_or_else(|| CliError::Config("failed to resolve config directory".to_string()))
}
