//! Data model shared by every pipeline stage
//!
//! - [`Record`]: one exported object, an ordered list of [`FieldValue`]s
//! - [`RunMetadata`]: run id, record count and field layout of one export run
//! - [`FieldStream`]: an open byte stream replacing a long-text sentinel
//! - [`QueryRequest`]: what the source is asked to export

pub mod query;
pub mod stream;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub use query::{DOCUMENT_ARTIFACT_TYPE_ID, FieldRef, ObjectTypeRef, QueryRequest};
pub use stream::FieldStream;

/// In-band marker returned in place of a long-text value that is too large
/// to inline and must be fetched through a separate stream.
pub const LONG_TEXT_SENTINEL: &str = "#KCURA99DF2F0FEB88420388879F1282A55760#";

/// Field type as reported by the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    FixedLengthText,
    LongText,
    WholeNumber,
    Decimal,
    Currency,
    YesNo,
    Date,
    Other,
}

impl FieldType {
    pub fn is_long_text(&self) -> bool {
        matches!(self, FieldType::LongText)
    }
}

/// Field description as returned by export initialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMetadata {
    pub name: String,
    pub field_type: FieldType,
}

/// Result of initializing an export on the source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportInitialization {
    pub run_id: Uuid,
    pub record_count: u64,
    pub field_data: Vec<FieldMetadata>,
}

/// Field name and type at a fixed position in every record of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
    pub index: usize,
}

/// Immutable description of one export run
///
/// Computed once from the initialization result and shared read-only by
/// all workers.
#[derive(Debug, Clone)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub record_count: u64,
    pub fields: Vec<FieldDescriptor>,
    pub long_text_indices: Vec<usize>,
}

impl RunMetadata {
    pub fn from_initialization(init: ExportInitialization) -> Self {
        let fields: Vec<FieldDescriptor> = init
            .field_data
            .into_iter()
            .enumerate()
            .map(|(index, meta)| FieldDescriptor {
                name: meta.name,
                field_type: meta.field_type,
                index,
            })
            .collect();

        let long_text_indices = fields
            .iter()
            .filter(|f| f.field_type.is_long_text())
            .map(|f| f.index)
            .collect();

        Self {
            run_id: init.run_id,
            record_count: init.record_count,
            fields,
            long_text_indices,
        }
    }

    pub fn field(&self, index: usize) -> Option<&FieldDescriptor> {
        self.fields.get(index)
    }
}

/// One value of a record
#[derive(Debug)]
pub enum FieldValue {
    Null,
    Scalar(JsonValue),
    Text(String),
    Stream(FieldStream),
}

impl FieldValue {
    /// The sentinel marker value
    pub fn pending() -> Self {
        FieldValue::Text(LONG_TEXT_SENTINEL.to_string())
    }

    /// Convert a JSON value as returned on the wire
    ///
    /// Strings become text (including the sentinel), `null` becomes
    /// [`FieldValue::Null`], everything else is kept as a scalar.
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => FieldValue::Null,
            JsonValue::String(s) => FieldValue::Text(s),
            other => FieldValue::Scalar(other),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, FieldValue::Text(s) if s == LONG_TEXT_SENTINEL)
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, FieldValue::Stream(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_stream_mut(&mut self) -> Option<&mut FieldStream> {
        match self {
            FieldValue::Stream(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => f.write_str("null"),
            FieldValue::Scalar(v) => write!(f, "{v}"),
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Stream(s) => write!(f, "<stream {}>", s.field()),
        }
    }
}

/// One exported object
///
/// Owned by exactly one pipeline stage at a time; values are mutated in
/// place as sentinel fields are replaced by streams.
#[derive(Debug)]
pub struct Record {
    pub artifact_id: i64,
    pub values: Vec<FieldValue>,
}

impl Record {
    pub fn new(artifact_id: i64, values: Vec<FieldValue>) -> Self {
        Self {
            artifact_id,
            values,
        }
    }

    /// Whether any of the given long-text positions holds the sentinel
    pub fn needs_stream(&self, long_text_indices: &[usize]) -> bool {
        self.pending_fields(long_text_indices).next().is_some()
    }

    /// Long-text positions still holding the sentinel
    pub fn pending_fields<'a>(
        &'a self,
        long_text_indices: &'a [usize],
    ) -> impl Iterator<Item = usize> + 'a {
        long_text_indices
            .iter()
            .copied()
            .filter(|&i| self.values.get(i).is_some_and(FieldValue::is_sentinel))
    }

    pub fn open_stream_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_stream()).count()
    }

    /// Close every open stream held by this record
    ///
    /// Closed positions are reset to [`FieldValue::Null`]. Returns the
    /// number of streams closed.
    pub fn close_streams(&mut self) -> usize {
        let mut closed = 0;
        for value in self.values.iter_mut() {
            if value.is_stream() {
                if let FieldValue::Stream(stream) = std::mem::replace(value, FieldValue::Null) {
                    stream.close();
                    closed += 1;
                }
            }
        }
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata() -> RunMetadata {
        RunMetadata::from_initialization(ExportInitialization {
            run_id: Uuid::new_v4(),
            record_count: 2,
            field_data: vec![
                FieldMetadata {
                    name: "Control Number".into(),
                    field_type: FieldType::FixedLengthText,
                },
                FieldMetadata {
                    name: "Extracted Text".into(),
                    field_type: FieldType::LongText,
                },
                FieldMetadata {
                    name: "Notes".into(),
                    field_type: FieldType::LongText,
                },
            ],
        })
    }

    #[test]
    fn test_long_text_indices_computed_once() {
        let meta = metadata();
        assert_eq!(meta.long_text_indices, vec![1, 2]);
        assert_eq!(meta.field(1).unwrap().name, "Extracted Text");
    }

    #[test]
    fn test_needs_stream_only_on_long_text_positions() {
        let meta = metadata();
        let sentinel_in_scalar = Record::new(
            1,
            vec![FieldValue::pending(), FieldValue::Text("a".into()), FieldValue::Null],
        );
        assert!(!sentinel_in_scalar.needs_stream(&meta.long_text_indices));

        let flagged = Record::new(
            2,
            vec![FieldValue::Text("B".into()), FieldValue::Null, FieldValue::pending()],
        );
        assert!(flagged.needs_stream(&meta.long_text_indices));
        assert_eq!(
            flagged.pending_fields(&meta.long_text_indices).collect::<Vec<_>>(),
            vec![2]
        );
    }

    #[test]
    fn test_from_json() {
        assert!(matches!(FieldValue::from_json(json!(null)), FieldValue::Null));
        assert!(FieldValue::from_json(json!(LONG_TEXT_SENTINEL)).is_sentinel());
        assert!(matches!(FieldValue::from_json(json!(3)), FieldValue::Scalar(_)));
    }

    #[test]
    fn test_close_streams_resets_values() {
        let mut record = Record::new(
            3,
            vec![
                FieldValue::Text("C".into()),
                FieldValue::Stream(FieldStream::from_bytes(3, "Extracted Text", b"x".to_vec())),
            ],
        );
        assert_eq!(record.open_stream_count(), 1);
        assert_eq!(record.close_streams(), 1);
        assert_eq!(record.open_stream_count(), 0);
        assert_eq!(record.close_streams(), 0);
    }
}
