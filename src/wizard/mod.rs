// src/wizard/mod.rs
//! New/Edit source wizards.
//!
//! The wizards never touch the network. Every transition that needs the
//! backend returns a [`WizardEffect`]; the caller runs it and feeds the
//! result back through the matching `*_loaded` / `*_result` method.

pub mod edit_source;
pub mod new_source;
pub mod schema;

use serde_json::{Map, Value};
use std::path::PathBuf;

use crate::api::sources::{AnnotationRequest, FileObject, SourcePayload};
pub use edit_source::{EditSourceWizard, EditTab};
pub use new_source::{ConnectionStatus, NewSourceWizard, Step};
pub use schema::{AnnotationTicket, ColumnDraft, SchemaEditor, TableDraft};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WizardError {
    #[error("Select a source type first")]
    NoSourceType,

    #[error("Please upload at least one file")]
    FilesRequired,

    #[error("Please test the connection first")]
    ConnectionNotTested,

    #[error("Required fields missing: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("Select at least one table")]
    NoTablesSelected,

    #[error("Source name is required")]
    MissingName,

    #[error("Schema is still loading")]
    SchemaNotLoaded,

    #[error("Another request is still running")]
    Busy,

    #[error("Annotation for '{0}' arrived after the table changed; discarded")]
    StaleAnnotation(String),
}

/// Backend work requested by a wizard transition.
#[derive(Debug, Clone, PartialEq)]
pub enum WizardEffect {
    LoadSourceTypes,
    LoadTypeDetails(String),
    /// `test` identifies the attempt; only the latest one counts.
    TestConnectivity { source_type: String, connection: Map<String, Value>, test: u64 },
    /// `fetch` is the ticket from [`SchemaEditor::begin_fetch`].
    DiscoverSchema { source_type: String, connection: Map<String, Value>, fetch: u64 },
    LoadSource(i64),
    LoadSavedSchema { source_id: i64, fetch: u64 },
    UploadFile(PathBuf),
    Annotate { ticket: AnnotationTicket, request: AnnotationRequest },
    Create { source_type: String, payload: SourcePayload },
    Update { source_id: i64, payload: SourcePayload },
}

pub const FILE_OBJECTS: &str = "file_objects";

/// Uploaded files recorded in a connection map.
pub fn file_objects(connection: &Map<String, Value>) -> Vec<FileObject> {
    connection
        .get(FILE_OBJECTS)
        .cloned()
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default()
}

pub fn push_file_object(connection: &mut Map<String, Value>, file: FileObject) {
    let mut files = file_objects(connection);
    files.push(file);
    set_file_objects(connection, files);
}

pub fn remove_file_object(connection: &mut Map<String, Value>, index: usize) -> Option<FileObject> {
    let mut files = file_objects(connection);
    if index >= files.len() {
        return None;
    }
    let removed = files.remove(index);
    set_file_objects(connection, files);
    Some(removed)
}

fn set_file_objects(connection: &mut Map<String, Value>, files: Vec<FileObject>) {
    let value = serde_json::to_value(files).unwrap_or(Value::Array(Vec::new()));
    connection.insert(FILE_OBJECTS.to_string(), value);
}

/// Whether a connection field holds something usable.
pub fn field_is_set(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn file(name: &str) -> FileObject {
        FileObject {
            object_name: format!("obj/{}", name),
            media_type: "text/csv".into(),
            original_filename: name.into(),
        }
    }

    #[test]
    fn test_file_object_helpers() {
        let mut connection = Map::new();
        assert!(file_objects(&connection).is_empty());
        push_file_object(&mut connection, file("a.csv"));
        push_file_object(&mut connection, file("b.csv"));
        assert_eq!(connection["file_objects"][1]["original_filename"], "b.csv");

        assert_eq!(remove_file_object(&mut connection, 0), Some(file("a.csv")));
        assert_eq!(remove_file_object(&mut connection, 5), None);
        assert_eq!(file_objects(&connection), vec![file("b.csv")]);
    }

    #[test]
    fn test_field_is_set() {
        assert!(!field_is_set(None));
        assert!(!field_is_set(Some(&json!("  "))));
        assert!(field_is_set(Some(&json!(0))));
        assert!(field_is_set(Some(&json!("db"))));
    }
}
