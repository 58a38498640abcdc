// src/wizard/edit_source.rs

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;

use super::schema::{AnnotationTicket, SchemaEditor};
use super::{file_objects, push_file_object, remove_file_object, WizardEffect, WizardError};
use crate::api::sources::{text_for_lang, Annotation, EntitySchema, FileObject, LangText, SourceDetail, SourcePayload};
use crate::{log_debug, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditTab {
    ConfigureSource,
    ConfigureSchema,
}

impl EditTab {
    pub fn title(&self) -> &'static str {
        match self {
            EditTab::ConfigureSource => "Source",
            EditTab::ConfigureSchema => "Schema",
        }
    }

    pub fn toggled(&self) -> EditTab {
        match self {
            EditTab::ConfigureSource => EditTab::ConfigureSchema,
            EditTab::ConfigureSchema => EditTab::ConfigureSource,
        }
    }
}

/// Edits an existing source. The source and its saved schema are both
/// fetched on open, so a save always carries the full entity list.
#[derive(Debug, Clone)]
pub struct EditSourceWizard {
    source_id: i64,
    lang: String,
    pub tab: EditTab,
    source_type: Option<String>,
    pub name: String,
    pub description: String,
    pub is_private: bool,
    connection: Map<String, Value>,
    pub schema: SchemaEditor,
    source_loaded: bool,
    schema_loaded: bool,
    pub uploading: bool,
    pub saving: bool,
    pub error: Option<String>,
}

impl EditSourceWizard {
    pub fn open(source_id: i64, lang: &str) -> (Self, Vec<WizardEffect>) {
        let mut schema = SchemaEditor::new();
        let fetch = schema.begin_fetch();
        let wizard = Self {
            source_id,
            lang: lang.to_string(),
            tab: EditTab::ConfigureSource,
            source_type: None,
            name: String::new(),
            description: String::new(),
            is_private: false,
            connection: Map::new(),
            schema,
            source_loaded: false,
            schema_loaded: false,
            uploading: false,
            saving: false,
            error: None,
        };
        (wizard, vec![WizardEffect::LoadSource(source_id), WizardEffect::LoadSavedSchema { source_id, fetch }])
    }

    pub fn source_id(&self) -> i64 {
        self.source_id
    }

    pub fn source_type(&self) -> Option<&str> {
        self.source_type.as_deref()
    }

    pub fn connection(&self) -> &Map<String, Value> {
        &self.connection
    }

    pub fn files(&self) -> Vec<FileObject> {
        file_objects(&self.connection)
    }

    pub fn is_loading(&self) -> bool {
        !self.source_loaded || self.schema.loading
    }

    pub fn is_tabular_file(&self) -> bool {
        self.source_type.as_deref() == Some("tabularfile")
    }

    pub fn switch_tab(&mut self) {
        self.tab = self.tab.toggled();
    }

    pub fn source_loaded(&mut self, result: Result<SourceDetail, String>) {
        match result {
            Ok(source) => {
                self.name = source.source_name;
                self.description = text_for_lang(&source.description, &self.lang);
                self.is_private = source.is_private;
                self.connection = source.connection.unwrap_or_default();
                self.source_type = Some(source.source_type);
                self.source_loaded = true;
            }
            Err(e) => {
                log_warn!("Loading source {} failed: {}", self.source_id, e);
                self.error = Some("Failed to fetch source details. Please try again.".to_string());
            }
        }
    }

    pub fn schema_loaded(&mut self, fetch: u64, result: Result<Vec<EntitySchema>, String>) {
        if !self.schema.is_current_fetch(fetch) {
            log_debug!("Ignoring superseded schema load {} of source {}", fetch, self.source_id);
            return;
        }
        match result {
            Ok(entities) => {
                self.schema.load(&entities, &self.lang, true);
                self.schema_loaded = true;
            }
            Err(e) => {
                log_warn!("Loading schema of source {} failed: {}", self.source_id, e);
                self.schema.fail("Failed to fetch schema details. Please try again.");
            }
        }
    }

    /// Fetch the saved schema again, e.g. after a failed load.
    pub fn reload_schema(&mut self) -> WizardEffect {
        let fetch = self.schema.begin_fetch();
        WizardEffect::LoadSavedSchema { source_id: self.source_id, fetch }
    }

    pub fn set_field(&mut self, name: &str, value: Value) {
        self.connection.insert(name.to_string(), value);
    }

    pub fn attach_file(&mut self, path: PathBuf) -> Result<WizardEffect, WizardError> {
        if self.uploading {
            return Err(WizardError::Busy);
        }
        self.uploading = true;
        Ok(WizardEffect::UploadFile(path))
    }

    pub fn file_uploaded(&mut self, result: Result<FileObject, String>) {
        self.uploading = false;
        match result {
            Ok(file) => push_file_object(&mut self.connection, file),
            Err(e) => self.error = Some(format!("Upload failed: {}", e)),
        }
    }

    pub fn remove_file(&mut self, index: usize) {
        remove_file_object(&mut self.connection, index);
    }

    pub fn request_annotation(&mut self, table_id: &str) -> Option<WizardEffect> {
        let (ticket, request) =
            self.schema.annotation_request(table_id, &self.name, &self.description, &self.lang)?;
        Some(WizardEffect::Annotate { ticket, request })
    }

    pub fn annotation_result(
        &mut self,
        ticket: &AnnotationTicket,
        result: Result<HashMap<String, Annotation>, String>,
    ) -> Result<(), WizardError> {
        let lang = self.lang.clone();
        self.schema.apply_annotation(ticket, result, &lang)
    }

    pub fn payload(&self) -> SourcePayload {
        let connection_info = if self.is_tabular_file() {
            let mut only_files = Map::new();
            if let Some(files) = self.connection.get(super::FILE_OBJECTS) {
                only_files.insert(super::FILE_OBJECTS.to_string(), files.clone());
            }
            only_files
        } else {
            self.connection.clone()
        };

        SourcePayload {
            source_name: self.name.trim().to_string(),
            is_private: self.is_private,
            description: vec![LangText::new(&self.lang, &self.description)],
            connection_info,
            additional_details: String::new(),
            entities: self.schema.selected_entities(&self.lang),
        }
    }

    pub fn save(&mut self) -> Result<WizardEffect, WizardError> {
        if self.saving {
            return Err(WizardError::Busy);
        }
        if !self.source_loaded || !self.schema_loaded {
            return Err(WizardError::SchemaNotLoaded);
        }
        let result = if self.name.trim().is_empty() {
            Err(WizardError::MissingName)
        } else if self.is_tabular_file() && self.files().is_empty() {
            Err(WizardError::FilesRequired)
        } else {
            Ok(())
        };
        if let Err(e) = result {
            self.error = Some(e.to_string());
            return Err(e);
        }

        self.saving = true;
        self.error = None;
        Ok(WizardEffect::Update { source_id: self.source_id, payload: self.payload() })
    }

    /// Returns true when the wizard should close.
    pub fn save_result(&mut self, result: Result<(), String>) -> bool {
        self.saving = false;
        match result {
            Ok(()) => true,
            Err(e) => {
                self.error = Some(format!("Failed to save changes: {}", e));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detail(source_type: &str, connection: Value) -> SourceDetail {
        serde_json::from_value(json!({
            "id": 7,
            "source_name": "Sales",
            "source_type": source_type,
            "connection": connection,
            "is_private": true,
            "description": [{"lang": "en", "text": "monthly sales"}]
        }))
        .unwrap()
    }

    fn saved_schema() -> Vec<EntitySchema> {
        serde_json::from_value(json!([
            {"table_name": "sales", "columns": [{"column_name": "id", "type": "int"}],
             "primary_keys": ["id"], "domains": ["finance"], "_selected": true},
            {"table_name": "staging", "columns": [], "_selected": false}
        ]))
        .unwrap()
    }

    fn loaded(source_type: &str, connection: Value) -> EditSourceWizard {
        let (mut wizard, effects) = EditSourceWizard::open(7, "en");
        let fetch = schema_ticket(&effects[1]);
        assert_eq!(effects, vec![WizardEffect::LoadSource(7), WizardEffect::LoadSavedSchema { source_id: 7, fetch }]);
        assert!(wizard.is_loading());
        wizard.source_loaded(Ok(detail(source_type, connection)));
        wizard.schema_loaded(fetch, Ok(saved_schema()));
        wizard
    }

    fn schema_ticket(effect: &WizardEffect) -> u64 {
        match effect {
            WizardEffect::LoadSavedSchema { fetch, .. } => *fetch,
            other => panic!("expected schema load, got {:?}", other),
        }
    }

    #[test]
    fn test_preselects_saved_tables() {
        let wizard = loaded("postgres", json!({"host": "db"}));
        assert!(!wizard.is_loading());
        assert_eq!(wizard.description, "monthly sales");
        assert!(wizard.schema.is_selected("sales"));
        assert!(!wizard.schema.is_selected("staging"));
    }

    #[test]
    fn test_tabs_switch_freely() {
        let mut wizard = loaded("postgres", json!({}));
        wizard.switch_tab();
        assert_eq!(wizard.tab, EditTab::ConfigureSchema);
        wizard.switch_tab();
        assert_eq!(wizard.tab, EditTab::ConfigureSource);
    }

    #[test]
    fn test_save_builds_update() {
        let mut wizard = loaded("postgres", json!({"host": "db"}));
        wizard.schema.set_column_description("sales", "id", "sale id");
        let WizardEffect::Update { source_id, payload } = wizard.save().unwrap() else {
            panic!("expected update");
        };
        assert_eq!(source_id, 7);
        assert!(payload.is_private);
        assert_eq!(payload.connection_info["host"], "db");
        assert_eq!(payload.entities.len(), 1);
        assert_eq!(payload.entities[0].domains, vec!["finance".to_string()]);
        assert_eq!(payload.entities[0].columns[0].description[0].text, "sale id");
        assert_eq!(payload.entities[0].primary_keys, vec!["id".to_string()]);
    }

    #[test]
    fn test_tabular_file_needs_files() {
        let mut wizard = loaded("tabularfile", json!({"file_objects": [], "extra": 1}));
        assert_eq!(wizard.save(), Err(WizardError::FilesRequired));
        assert!(wizard.error.is_some());

        wizard.file_uploaded(Ok(FileObject {
            object_name: "o1".into(),
            media_type: "text/csv".into(),
            original_filename: "a.csv".into(),
        }));
        let WizardEffect::Update { payload, .. } = wizard.save().unwrap() else {
            panic!("expected update");
        };
        assert_eq!(payload.connection_info.len(), 1);
        assert_eq!(payload.connection_info["file_objects"][0]["object_name"], "o1");
    }

    #[test]
    fn test_save_waits_for_load_and_name() {
        let (mut wizard, _) = EditSourceWizard::open(7, "en");
        assert_eq!(wizard.save(), Err(WizardError::SchemaNotLoaded));

        let mut wizard = loaded("postgres", json!({}));
        wizard.name = "   ".into();
        assert_eq!(wizard.save(), Err(WizardError::MissingName));
    }

    #[test]
    fn test_reload_drops_earlier_schema_reply() {
        let (mut wizard, effects) = EditSourceWizard::open(7, "en");
        let first = schema_ticket(&effects[1]);
        wizard.source_loaded(Ok(detail("postgres", json!({}))));
        let second = schema_ticket(&wizard.reload_schema());

        wizard.schema_loaded(second, Ok(saved_schema()));
        let stale: Vec<EntitySchema> =
            serde_json::from_value(json!([{"table_name": "old", "columns": [], "_selected": true}])).unwrap();
        wizard.schema_loaded(first, Ok(stale));

        assert!(wizard.schema.table("old").is_none());
        assert!(wizard.schema.is_selected("sales"));
        assert!(wizard.save().is_ok());
    }

    #[test]
    fn test_save_failure_keeps_wizard_open() {
        let mut wizard = loaded("postgres", json!({}));
        wizard.save().unwrap();
        assert!(!wizard.save_result(Err("409".into())));
        assert!(wizard.error.as_deref().unwrap_or_default().contains("409"));
        assert!(!wizard.saving);
    }
}
