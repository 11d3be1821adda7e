//! Record encoding at the store boundary.
//!
//! Task and execution records are stored as flat string hashes. Scalars are
//! stored as their display form, lists and the date range as JSON strings,
//! timestamps as RFC 3339. The empty string is the "unset" sentinel for
//! optional timestamps, ids and messages. Nothing outside this module knows
//! about the hash representation.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::CodecError;
use crate::scheduler::execution::{DateRange, ExecutionRecord};
use crate::scheduler::task::{Priority, TaskRecord, TaskStatus};

/// Hash field names of a task record.
pub mod task_field {
    pub const TASK_ID: &str = "task_id";
    pub const PLUGIN_NAME: &str = "plugin_name";
    pub const TASK_TYPE: &str = "task_type";
    pub const TRADE_DATES: &str = "trade_dates";
    pub const STATUS: &str = "status";
    pub const PROGRESS: &str = "progress";
    pub const RECORDS_PROCESSED: &str = "records_processed";
    pub const ERROR_MESSAGE: &str = "error_message";
    pub const CREATED_AT: &str = "created_at";
    pub const STARTED_AT: &str = "started_at";
    pub const COMPLETED_AT: &str = "completed_at";
    pub const EXECUTION_ID: &str = "execution_id";
    pub const USER_ID: &str = "user_id";
    pub const PRIORITY: &str = "priority";
}

/// Hash field names of an execution record.
pub mod execution_field {
    pub const EXECUTION_ID: &str = "execution_id";
    pub const TRIGGER_TYPE: &str = "trigger_type";
    pub const STARTED_AT: &str = "started_at";
    pub const COMPLETED_AT: &str = "completed_at";
    pub const STATUS: &str = "status";
    pub const TOTAL_PLUGINS: &str = "total_plugins";
    pub const COMPLETED_PLUGINS: &str = "completed_plugins";
    pub const FAILED_PLUGINS: &str = "failed_plugins";
    pub const TASK_IDS: &str = "task_ids";
    pub const GROUP_NAME: &str = "group_name";
    pub const DATE_RANGE: &str = "date_range";
}

pub fn encode_timestamp(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.to_rfc3339()).unwrap_or_default()
}

pub fn encode_optional<T: ToString>(value: Option<&T>) -> String {
    value.map(ToString::to_string).unwrap_or_default()
}

/// Encodes every field of a task record.
pub fn encode_task(task: &TaskRecord) -> Vec<(&'static str, String)> {
    use task_field::*;

    vec![
        (TASK_ID, task.task_id.to_string()),
        (PLUGIN_NAME, task.plugin_name.clone()),
        (TASK_TYPE, task.task_type.to_string()),
        (TRADE_DATES, encode_json_list(&task.trade_dates)),
        (STATUS, task.status.to_string()),
        (PROGRESS, task.progress.to_string()),
        (RECORDS_PROCESSED, task.records_processed.to_string()),
        (ERROR_MESSAGE, task.error_message.clone().unwrap_or_default()),
        (CREATED_AT, encode_timestamp(Some(task.created_at))),
        (STARTED_AT, encode_timestamp(task.started_at)),
        (COMPLETED_AT, encode_timestamp(task.completed_at)),
        (EXECUTION_ID, encode_optional(task.execution_id.as_ref())),
        (USER_ID, task.user_id.clone().unwrap_or_default()),
        (PRIORITY, task.priority.as_u8().to_string()),
    ]
}

/// Decodes a task record from its hash fields.
///
/// An empty map means the record does not exist (or has expired) and decodes
/// to `Ok(None)`.
pub fn decode_task(fields: &HashMap<String, String>) -> Result<Option<TaskRecord>, CodecError> {
    use task_field::*;

    if fields.is_empty() {
        return Ok(None);
    }

    let priority_raw = required(fields, PRIORITY)?;
    let priority = priority_raw
        .parse::<u8>()
        .ok()
        .and_then(Priority::from_u8)
        .ok_or_else(|| CodecError::InvalidValue {
            field: PRIORITY,
            value: priority_raw.to_string(),
        })?;

    Ok(Some(TaskRecord {
        task_id: parse_field(fields, TASK_ID)?,
        plugin_name: required(fields, PLUGIN_NAME)?.to_string(),
        task_type: parse_field(fields, TASK_TYPE)?,
        trade_dates: decode_json_list(fields, TRADE_DATES)?,
        status: parse_field::<TaskStatus>(fields, STATUS)?,
        progress: parse_field_or(fields, PROGRESS, 0)?,
        records_processed: parse_field_or(fields, RECORDS_PROCESSED, 0)?,
        error_message: optional_string(fields, ERROR_MESSAGE),
        created_at: decode_timestamp(fields, CREATED_AT)?
            .ok_or(CodecError::MissingField(CREATED_AT))?,
        started_at: decode_timestamp(fields, STARTED_AT)?,
        completed_at: decode_timestamp(fields, COMPLETED_AT)?,
        execution_id: optional_parsed(fields, EXECUTION_ID)?,
        user_id: optional_string(fields, USER_ID),
        priority,
    }))
}

/// Encodes every field of an execution record.
pub fn encode_execution(exec: &ExecutionRecord) -> Vec<(&'static str, String)> {
    use execution_field::*;

    let date_range = exec
        .date_range
        .as_ref()
        .and_then(|range| serde_json::to_string(range).ok())
        .unwrap_or_default();

    vec![
        (EXECUTION_ID, exec.execution_id.to_string()),
        (TRIGGER_TYPE, exec.trigger_type.to_string()),
        (STARTED_AT, encode_timestamp(Some(exec.started_at))),
        (COMPLETED_AT, encode_timestamp(exec.completed_at)),
        (STATUS, exec.status.to_string()),
        (TOTAL_PLUGINS, exec.total_plugins.to_string()),
        (COMPLETED_PLUGINS, exec.completed_plugins.to_string()),
        (FAILED_PLUGINS, exec.failed_plugins.to_string()),
        (TASK_IDS, encode_json_list(&exec.task_ids)),
        (GROUP_NAME, exec.group_name.clone().unwrap_or_default()),
        (DATE_RANGE, date_range),
    ]
}

/// Encodes the derived fields rewritten by a stats refresh.
pub fn encode_execution_stats(exec: &ExecutionRecord) -> Vec<(&'static str, String)> {
    use execution_field::*;

    vec![
        (STATUS, exec.status.to_string()),
        (COMPLETED_PLUGINS, exec.completed_plugins.to_string()),
        (FAILED_PLUGINS, exec.failed_plugins.to_string()),
        (COMPLETED_AT, encode_timestamp(exec.completed_at)),
    ]
}

/// Decodes an execution record; an empty map decodes to `Ok(None)`.
pub fn decode_execution(
    fields: &HashMap<String, String>,
) -> Result<Option<ExecutionRecord>, CodecError> {
    use execution_field::*;

    if fields.is_empty() {
        return Ok(None);
    }

    let date_range = match fields.get(DATE_RANGE).map(String::as_str) {
        None | Some("") => None,
        Some(raw) => Some(
            serde_json::from_str::<DateRange>(raw).map_err(|source| CodecError::InvalidJson {
                field: DATE_RANGE,
                source,
            })?,
        ),
    };

    Ok(Some(ExecutionRecord {
        execution_id: parse_field(fields, EXECUTION_ID)?,
        trigger_type: parse_field(fields, TRIGGER_TYPE)?,
        started_at: decode_timestamp(fields, STARTED_AT)?
            .ok_or(CodecError::MissingField(STARTED_AT))?,
        completed_at: decode_timestamp(fields, COMPLETED_AT)?,
        status: parse_field(fields, STATUS)?,
        total_plugins: parse_field_or(fields, TOTAL_PLUGINS, 0)?,
        completed_plugins: parse_field_or(fields, COMPLETED_PLUGINS, 0)?,
        failed_plugins: parse_field_or(fields, FAILED_PLUGINS, 0)?,
        task_ids: decode_json_list(fields, TASK_IDS)?,
        group_name: optional_string(fields, GROUP_NAME),
        date_range,
    }))
}

fn encode_json_list<T: serde::Serialize>(items: &[T]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

fn decode_json_list<T: serde::de::DeserializeOwned>(
    fields: &HashMap<String, String>,
    field: &'static str,
) -> Result<Vec<T>, CodecError> {
    match fields.get(field).map(String::as_str) {
        None | Some("") => Ok(Vec::new()),
        Some(raw) => {
            serde_json::from_str(raw).map_err(|source| CodecError::InvalidJson { field, source })
        }
    }
}

fn required<'a>(
    fields: &'a HashMap<String, String>,
    field: &'static str,
) -> Result<&'a str, CodecError> {
    fields
        .get(field)
        .map(String::as_str)
        .ok_or(CodecError::MissingField(field))
}

fn parse_field<T: FromStr>(
    fields: &HashMap<String, String>,
    field: &'static str,
) -> Result<T, CodecError> {
    let raw = required(fields, field)?;
    raw.parse().map_err(|_| CodecError::InvalidValue {
        field,
        value: raw.to_string(),
    })
}

fn parse_field_or<T: FromStr>(
    fields: &HashMap<String, String>,
    field: &'static str,
    default: T,
) -> Result<T, CodecError> {
    match fields.get(field).map(String::as_str) {
        None | Some("") => Ok(default),
        Some(raw) => raw.parse().map_err(|_| CodecError::InvalidValue {
            field,
            value: raw.to_string(),
        }),
    }
}

fn optional_parsed<T: FromStr>(
    fields: &HashMap<String, String>,
    field: &'static str,
) -> Result<Option<T>, CodecError> {
    match fields.get(field).map(String::as_str) {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| CodecError::InvalidValue {
            field,
            value: raw.to_string(),
        }),
    }
}

fn optional_string(fields: &HashMap<String, String>, field: &'static str) -> Option<String> {
    fields.get(field).filter(|v| !v.is_empty()).cloned()
}

fn decode_timestamp(
    fields: &HashMap<String, String>,
    field: &'static str,
) -> Result<Option<DateTime<Utc>>, CodecError> {
    match fields.get(field).map(String::as_str) {
        None | Some("") => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|_| CodecError::InvalidValue {
                field,
                value: raw.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::execution::TriggerType;
    use crate::scheduler::task::{NewTask, TaskType};
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn to_map(fields: Vec<(&'static str, String)>) -> HashMap<String, String> {
        fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn test_task_hash_layout() {
        let task = TaskRecord::pending(
            Uuid::new_v4(),
            NewTask::backfill("tushare_daily", ["2026-01-05", "2026-01-06"])
                .with_priority(Priority::High),
            Utc::now(),
        );
        let map = to_map(encode_task(&task));

        assert_eq!(map["status"], "pending");
        assert_eq!(map["priority"], "0");
        assert_eq!(map["trade_dates"], r#"["2026-01-05","2026-01-06"]"#);
        assert_eq!(map["started_at"], "");
        assert_eq!(map["execution_id"], "");
        assert_eq!(map["error_message"], "");
    }

    #[test]
    fn test_task_decode_restores_record() {
        let mut task = TaskRecord::pending(
            Uuid::new_v4(),
            NewTask::new("akshare_index", TaskType::Full)
                .with_execution_id(Uuid::new_v4())
                .with_user_id("ops"),
            Utc::now(),
        );
        task.status = TaskStatus::Failed;
        task.error_message = Some("provider timeout".to_string());
        task.started_at = Some(Utc::now());
        task.completed_at = Some(Utc::now());

        let decoded = decode_task(&to_map(encode_task(&task)))
            .expect("decode should succeed")
            .expect("record should exist");

        assert_eq!(decoded, task);
    }

    #[test]
    fn test_decode_empty_hash_is_absent() {
        assert!(decode_task(&HashMap::new()).expect("decode").is_none());
        assert!(decode_execution(&HashMap::new())
            .expect("decode")
            .is_none());
    }

    #[test]
    fn test_task_decode_errors() {
        let task = TaskRecord::pending(Uuid::new_v4(), NewTask::incremental("p"), Utc::now());

        let mut map = to_map(encode_task(&task));
        map.insert("priority".to_string(), "9".to_string());
        assert!(matches!(
            decode_task(&map),
            Err(CodecError::InvalidValue {
                field: "priority",
                ..
            })
        ));

        let mut map = to_map(encode_task(&task));
        map.insert("trade_dates".to_string(), "not json".to_string());
        assert!(matches!(
            decode_task(&map),
            Err(CodecError::InvalidJson {
                field: "trade_dates",
                ..
            })
        ));

        let mut map = to_map(encode_task(&task));
        map.remove("status");
        assert!(matches!(
            decode_task(&map),
            Err(CodecError::MissingField("status"))
        ));
    }

    #[test]
    fn test_partial_hash_uses_defaults() {
        // a hash written by an older producer without progress counters
        let task = TaskRecord::pending(Uuid::new_v4(), NewTask::incremental("p"), Utc::now());
        let mut map = to_map(encode_task(&task));
        map.remove("progress");
        map.remove("records_processed");
        map.remove("trade_dates");

        let decoded = decode_task(&map).expect("decode").expect("present");
        assert_eq!(decoded.progress, 0);
        assert_eq!(decoded.records_processed, 0);
        assert!(decoded.trade_dates.is_empty());
    }

    #[test]
    fn test_execution_decode_restores_record() {
        let start = NaiveDate::from_ymd_opt(2026, 1, 5).expect("valid date");
        let end = NaiveDate::from_ymd_opt(2026, 1, 9).expect("valid date");
        let exec = ExecutionRecord::new(
            Uuid::new_v4(),
            vec![Uuid::new_v4(), Uuid::new_v4()],
            TriggerType::Scheduled,
            Some("nightly".to_string()),
            Some(DateRange::new(start, end)),
            Utc::now(),
        );

        let map = to_map(encode_execution(&exec));
        assert_eq!(map["status"], "running");
        assert_eq!(map["total_plugins"], "2");

        let decoded = decode_execution(&map)
            .expect("decode should succeed")
            .expect("record should exist");
        assert_eq!(decoded, exec);
    }
}
