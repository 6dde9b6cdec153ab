use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A message as handed over by the broker client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp_ms: Option<i64>,
    #[serde(default)]
    pub headers: Vec<(String, Option<String>)>,
    pub key: Option<String>,
    pub value: Option<String>,
}

impl RawMessage {
    /// Identity used for de-duplication within a session
    pub fn identity(&self) -> (String, i64) {
        (self.topic.clone(), self.offset)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Read,
    Truncate,
}

impl Operation {
    /// Accepts both the envelope's short codes and the long names.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "c" | "create" => Some(Self::Create),
            "u" | "update" => Some(Self::Update),
            "d" | "delete" => Some(Self::Delete),
            "r" | "read" => Some(Self::Read),
            "t" | "truncate" => Some(Self::Truncate),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Create => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Read => "snapshot",
            Self::Truncate => "truncate",
        }
    }
}

/// Classified change event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CdcEvent {
    DataChange(DataChangeEvent),
    SchemaChange(SchemaChangeEvent),
    Unrecognized(UnrecognizedEvent),
}

impl CdcEvent {
    pub fn unrecognized(parse_error: impl Into<String>) -> Self {
        Self::Unrecognized(UnrecognizedEvent {
            parse_error: parse_error.into(),
        })
    }

    pub fn is_unrecognized(&self) -> bool {
        matches!(self, Self::Unrecognized(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::DataChange(_) => "change",
            Self::SchemaChange(_) => "schema",
            Self::Unrecognized(_) => "unrecognized",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataChangeEvent {
    pub before: Option<Map<String, Value>>,
    pub after: Option<Map<String, Value>>,
    pub source: SourceInfo,
    pub op: Operation,
    pub ts_ms: Option<i64>,
    pub transaction: Option<TransactionInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceInfo {
    pub db: Option<String>,
    pub table: Option<String>,
    pub connector_version: Option<String>,
    pub snapshot: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionInfo {
    pub id: String,
    pub total_order: Option<i64>,
    pub data_collection_order: Option<i64>,
}

/// One column that differs between the before and after images
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub column: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

impl DataChangeEvent {
    /// Columns whose value changed. Inserts list every column of the after image,
    /// deletes every column of the before image.
    pub fn diff(&self) -> Vec<FieldChange> {
        let empty = Map::new();
        let before = self.before.as_ref().unwrap_or(&empty);
        let after = self.after.as_ref().unwrap_or(&empty);

        let mut columns: Vec<&String> = before.keys().chain(after.keys()).collect();
        columns.sort();
        columns.dedup();

        columns
            .into_iter()
            .filter_map(|column| {
                let old = before.get(column);
                let new = after.get(column);
                if old == new {
                    return None;
                }
                Some(FieldChange {
                    column: column.clone(),
                    before: old.cloned(),
                    after: new.cloned(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaChangeEvent {
    pub database_name: String,
    pub schema_name: Option<String>,
    pub ddl: Option<String>,
    pub table_changes: Vec<TableChange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TableChangeType {
    Create,
    Alter,
    Drop,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableChange {
    #[serde(rename = "type")]
    pub change_type: TableChangeType,
    pub id: String,
    pub table: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnrecognizedEvent {
    pub parse_error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(before: Value, after: Value, op: Operation) -> DataChangeEvent {
        DataChangeEvent {
            before: before.as_object().cloned(),
            after: after.as_object().cloned(),
            source: SourceInfo::default(),
            op,
            ts_ms: None,
            transaction: None,
        }
    }

    #[test]
    fn test_operation_codes() {
        assert_eq!(Operation::from_code("c"), Some(Operation::Create));
        assert_eq!(Operation::from_code("truncate"), Some(Operation::Truncate));
        assert_eq!(Operation::from_code("x"), None);
        assert_eq!(Operation::Read.display_name(), "snapshot");
        assert_eq!(Operation::Create.display_name(), "insert");
    }

    #[test]
    fn test_update_diff_only_lists_changed_columns() {
        let e = event(
            json!({"id": 1, "name": "a", "qty": 3}),
            json!({"id": 1, "name": "b", "qty": 3}),
            Operation::Update,
        );
        let diff = e.diff();
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].column, "name");
        assert_eq!(diff[0].before, Some(json!("a")));
        assert_eq!(diff[0].after, Some(json!("b")));
    }

    #[test]
    fn test_insert_and_delete_diff() {
        let insert = event(Value::Null, json!({"id": 7, "name": "x"}), Operation::Create);
        let diff = insert.diff();
        assert_eq!(diff.len(), 2);
        assert!(diff.iter().all(|c| c.before.is_none()));

        let delete = event(json!({"id": 7}), Value::Null, Operation::Delete);
        let diff = delete.diff();
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].after, None);
    }
}
