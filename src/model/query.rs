//! Query description sent to the source when an export is initialized

use serde::{Deserialize, Serialize};

/// Artifact type id of documents, the default object type of a query
pub const DOCUMENT_ARTIFACT_TYPE_ID: i32 = 10;

/// Reference to a field by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRef {
    pub name: String,
}

impl FieldRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Reference to the object type being exported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectTypeRef {
    pub artifact_type_id: i32,
}

/// Export query: which objects and which of their fields
///
/// Records are delivered out of order, so a query should not rely on a
/// sort; ordering is left to the consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Object type to export; documents when absent
    #[serde(default)]
    pub object_type: Option<ObjectTypeRef>,

    /// Fields to return, in record value order
    #[serde(default)]
    pub fields: Vec<FieldRef>,

    /// Optional filter condition in the source's query syntax
    #[serde(default)]
    pub condition: Option<String>,

    /// Long-text values longer than this are returned as a sentinel
    #[serde(default)]
    pub max_characters_for_long_text: Option<u32>,
}

impl QueryRequest {
    /// Query over the named fields with no condition
    pub fn with_fields<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: names.into_iter().map(FieldRef::new).collect(),
            ..Self::default()
        }
    }

    /// Effective object type id
    pub fn artifact_type_id(&self) -> i32 {
        self.object_type
            .map(|t| t.artifact_type_id)
            .unwrap_or(DOCUMENT_ARTIFACT_TYPE_ID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_fields_preserves_order() {
        let query = QueryRequest::with_fields(["Control Number", "Extracted Text"]);
        assert_eq!(query.fields[1].name, "Extracted Text");
        assert_eq!(query.artifact_type_id(), DOCUMENT_ARTIFACT_TYPE_ID);
    }
}
