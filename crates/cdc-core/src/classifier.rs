//! Envelope classification.
//!
//! Turns the raw key/value pair of a broker message into exactly one [`CdcEvent`]
//! variant. Classification never fails: every malformed input becomes
//! [`CdcEvent::Unrecognized`] carrying a non-empty reason.

use crate::event::{
    CdcEvent, DataChangeEvent, Operation, RawMessage, SchemaChangeEvent, SourceInfo, TableChange,
    TableChangeType, TransactionInfo,
};
use serde::Deserialize;
use serde_json::{Map, Value};

pub const UNKNOWN_FORMAT: &str = "unknown message format";

/// Classify a broker message.
pub fn classify_message(message: &RawMessage) -> CdcEvent {
    classify(message.key.as_deref(), message.value.as_deref())
}

/// Classify a raw key/value pair.
///
/// A key that is JSON `null` is present; tables without a primary key produce it.
pub fn classify(key: Option<&str>, value: Option<&str>) -> CdcEvent {
    let key = match parse_side("key", key) {
        Ok(v) => v,
        Err(e) => return CdcEvent::unrecognized(e),
    };
    let value = match parse_side("value", value) {
        Ok(Value::Null) => return CdcEvent::unrecognized("message value is null"),
        Ok(v) => v,
        Err(e) => return CdcEvent::unrecognized(e),
    };

    if is_schema_change(&key, &value) {
        return match schema_change(&key, value) {
            Ok(event) => CdcEvent::SchemaChange(event),
            Err(e) => CdcEvent::unrecognized(e),
        };
    }

    if is_data_change(&value) {
        return match data_change(value) {
            Ok(event) => CdcEvent::DataChange(event),
            Err(e) => CdcEvent::unrecognized(e),
        };
    }

    CdcEvent::unrecognized(UNKNOWN_FORMAT)
}

fn parse_side(side: &str, raw: Option<&str>) -> Result<Value, String> {
    let raw = raw.ok_or_else(|| format!("message {} is absent", side))?;
    let parsed: Value = serde_json::from_str(raw)
        .map_err(|e| format!("message {} is not valid JSON: {}", side, e))?;
    Ok(unwrap_payload(parsed))
}

/// Converters with embedded schemas wrap the envelope as `{"schema": .., "payload": ..}`.
fn unwrap_payload(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.len() == 2 && map.contains_key("schema") => {
            match map.remove("payload") {
                Some(payload) => payload,
                None => Value::Object(map),
            }
        }
        other => other,
    }
}

/// Schema-change shape: no `op`, a DDL statement or table-change list, and a key
/// naming the database.
fn is_schema_change(key: &Value, value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    if obj.contains_key("op") {
        return false;
    }
    let has_changes = obj.get("tableChanges").is_some_and(Value::is_array)
        || obj.get("ddl").is_some_and(Value::is_string);
    let has_database = key
        .get("databaseName")
        .is_some_and(Value::is_string);
    has_changes && has_database
}

/// Data-change shape: an `op` field plus at least one of `before`/`after`.
fn is_data_change(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    obj.get("op").is_some_and(Value::is_string)
        && (obj.contains_key("before") || obj.contains_key("after"))
}

#[derive(Deserialize)]
struct DataChangeEnvelope {
    before: Option<Map<String, Value>>,
    after: Option<Map<String, Value>>,
    #[serde(default)]
    source: Option<SourceEnvelope>,
    op: String,
    ts_ms: Option<i64>,
    #[serde(default)]
    transaction: Option<TransactionEnvelope>,
}

#[derive(Deserialize, Default)]
struct SourceEnvelope {
    db: Option<String>,
    table: Option<String>,
    version: Option<String>,
    #[serde(default)]
    snapshot: Option<Value>,
}

#[derive(Deserialize)]
struct TransactionEnvelope {
    id: String,
    total_order: Option<i64>,
    data_collection_order: Option<i64>,
}

fn data_change(value: Value) -> Result<DataChangeEvent, String> {
    let envelope: DataChangeEnvelope =
        serde_json::from_value(value).map_err(|e| format!("malformed change envelope: {}", e))?;

    let op = Operation::from_code(&envelope.op)
        .ok_or_else(|| format!("unsupported operation '{}'", envelope.op))?;

    let source = envelope.source.unwrap_or_default();
    let snapshot = source.snapshot.and_then(|s| match s {
        Value::String(s) => Some(s),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    });

    Ok(DataChangeEvent {
        before: envelope.before,
        after: envelope.after,
        source: SourceInfo {
            db: source.db,
            table: source.table,
            connector_version: source.version,
            snapshot,
        },
        op,
        ts_ms: envelope.ts_ms,
        transaction: envelope.transaction.map(|t| TransactionInfo {
            id: t.id,
            total_order: t.total_order,
            data_collection_order: t.data_collection_order,
        }),
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchemaChangeEnvelope {
    schema_name: Option<String>,
    ddl: Option<String>,
    #[serde(default)]
    table_changes: Vec<TableChangeEnvelope>,
}

#[derive(Deserialize)]
struct TableChangeEnvelope {
    #[serde(rename = "type")]
    change_type: TableChangeType,
    id: String,
    table: Option<Value>,
}

fn schema_change(key: &Value, value: Value) -> Result<SchemaChangeEvent, String> {
    let database_name = key
        .get("databaseName")
        .and_then(Value::as_str)
        .ok_or_else(|| "schema change key has no databaseName".to_string())?
        .to_string();

    let envelope: SchemaChangeEnvelope =
        serde_json::from_value(value).map_err(|e| format!("malformed schema change: {}", e))?;

    Ok(SchemaChangeEvent {
        database_name,
        schema_name: envelope.schema_name.filter(|s| !s.is_empty()),
        ddl: envelope.ddl,
        table_changes: envelope
            .table_changes
            .into_iter()
            .map(|t| TableChange {
                change_type: t.change_type,
                id: t.id,
                table: t.table,
            })
            .collect(),
    })
}
