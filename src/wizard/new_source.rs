// src/wizard/new_source.rs
//! Four-step "add data source" flow.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use super::schema::{AnnotationTicket, SchemaEditor};
use super::{field_is_set, file_objects, push_file_object, remove_file_object, WizardEffect, WizardError};
use crate::api::sources::{Annotation, EntitySchema, FileObject, LangText, SourcePayload, SourceTypeInfo};
use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Step {
    SelectType = 0,
    ConfigureSource = 1,
    ConfigureSchema = 2,
    ReviewConfig = 3,
}

impl Step {
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn title(&self) -> &'static str {
        match self {
            Step::SelectType => "Select source type",
            Step::ConfigureSource => "Configure source",
            Step::ConfigureSchema => "Configure schema",
            Step::ReviewConfig => "Review",
        }
    }

    fn next(self) -> Option<Step> {
        match self {
            Step::SelectType => Some(Step::ConfigureSource),
            Step::ConfigureSource => Some(Step::ConfigureSchema),
            Step::ConfigureSchema => Some(Step::ReviewConfig),
            Step::ReviewConfig => None,
        }
    }

    fn prev(self) -> Option<Step> {
        match self {
            Step::SelectType => None,
            Step::ConfigureSource => Some(Step::SelectType),
            Step::ConfigureSchema => Some(Step::ConfigureSource),
            Step::ReviewConfig => Some(Step::ConfigureSchema),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Untested,
    Testing,
    Succeeded,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct NewSourceWizard {
    step: Step,
    admin_context: bool,
    lang: String,
    pub source_types: Vec<SourceTypeInfo>,
    source_type: Option<String>,
    type_details: Option<SourceTypeInfo>,
    connection: Map<String, Value>,
    pub field_errors: BTreeMap<String, String>,
    pub connection_status: ConnectionStatus,
    /// Number of the latest connectivity test.
    connection_test: u64,
    pub source_name: String,
    pub source_name_error: Option<String>,
    pub description: String,
    pub schema: SchemaEditor,
    pub uploading: bool,
    pub saving: bool,
    /// Inline status line: load, upload and save failures.
    pub status: Option<String>,
}

impl NewSourceWizard {
    /// A fresh wizard plus the effect that loads the type catalog.
    pub fn open(admin_context: bool, lang: &str) -> (Self, WizardEffect) {
        let wizard = Self {
            step: Step::SelectType,
            admin_context,
            lang: lang.to_string(),
            source_types: Vec::new(),
            source_type: None,
            type_details: None,
            connection: Map::new(),
            field_errors: BTreeMap::new(),
            connection_status: ConnectionStatus::Untested,
            connection_test: 0,
            source_name: String::new(),
            source_name_error: None,
            description: String::new(),
            schema: SchemaEditor::new(),
            uploading: false,
            saving: false,
            status: None,
        };
        (wizard, WizardEffect::LoadSourceTypes)
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn source_type(&self) -> Option<&str> {
        self.source_type.as_deref()
    }

    pub fn type_details(&self) -> Option<&SourceTypeInfo> {
        self.type_details.as_ref()
    }

    pub fn connection(&self) -> &Map<String, Value> {
        &self.connection
    }

    pub fn files(&self) -> Vec<FileObject> {
        file_objects(&self.connection)
    }

    pub fn lang(&self) -> &str {
        &self.lang
    }

    pub fn types_loaded(&mut self, result: Result<Vec<SourceTypeInfo>, String>) {
        match result {
            Ok(types) => self.source_types = types,
            Err(e) => self.status = Some(format!("Could not load source types: {}", e)),
        }
    }

    /// Pick a type. Changing it discards everything configured for the old one.
    pub fn select_type(&mut self, name: &str) -> Option<WizardEffect> {
        if self.source_type.as_deref() == Some(name) {
            return None;
        }
        self.source_type = Some(name.to_string());
        self.type_details = self.source_types.iter().find(|t| t.name == name).cloned();
        self.connection.clear();
        self.field_errors.clear();
        self.connection_status = ConnectionStatus::Untested;
        self.connection_test += 1;
        self.schema.clear();
        Some(WizardEffect::LoadTypeDetails(name.to_string()))
    }

    pub fn type_details_loaded(&mut self, result: Result<SourceTypeInfo, String>) {
        let details = match result {
            Ok(details) => details,
            Err(e) => {
                log_warn!("Source type details failed: {}", e);
                self.status = Some(format!("Could not load connection fields: {}", e));
                return;
            }
        };
        if self.source_type.as_deref() != Some(details.name.as_str()) {
            return;
        }
        for (name, spec) in &details.fields {
            if let Some(default) = &spec.default {
                self.connection.entry(name.clone()).or_insert_with(|| default.clone());
            }
        }
        self.type_details = Some(details);
    }

    /// Types whose connection is a set of uploaded files.
    pub fn is_file_based(&self) -> bool {
        self.source_type.as_deref() == Some("excel")
            || self.type_details.as_ref().is_some_and(SourceTypeInfo::has_file_uploader)
    }

    pub fn set_field(&mut self, name: &str, value: Value) {
        self.connection.insert(name.to_string(), value);
        self.field_errors.remove(name);
    }

    /// Check required connection fields, recording a message per field.
    pub fn validate_connection(&mut self) -> Result<(), WizardError> {
        self.field_errors.clear();
        let Some(details) = &self.type_details else {
            return Err(WizardError::NoSourceType);
        };

        for (name, spec) in details.fields.iter().filter(|(_, spec)| spec.required) {
            if spec.file_uploader {
                if file_objects(&self.connection).is_empty() {
                    self.field_errors.insert(name.clone(), "Please upload at least one file".to_string());
                }
            } else if !field_is_set(self.connection.get(name)) {
                self.field_errors.insert(name.clone(), "This field is required".to_string());
            }
        }

        if self.field_errors.is_empty() {
            Ok(())
        } else {
            Err(WizardError::MissingFields(self.field_errors.keys().cloned().collect()))
        }
    }

    pub fn test_connection(&mut self) -> Result<WizardEffect, WizardError> {
        if self.connection_status == ConnectionStatus::Testing {
            return Err(WizardError::Busy);
        }
        let source_type = self.source_type.clone().ok_or(WizardError::NoSourceType)?;
        self.validate_connection()?;
        self.connection_status = ConnectionStatus::Testing;
        self.connection_test += 1;
        Ok(WizardEffect::TestConnectivity {
            source_type,
            connection: self.connection.clone(),
            test: self.connection_test,
        })
    }

    pub fn connectivity_result(&mut self, test: u64, result: Result<(), String>) {
        if test != self.connection_test || self.connection_status != ConnectionStatus::Testing {
            log_debug!("Ignoring result of superseded connectivity test {}", test);
            return;
        }
        self.connection_status = match result {
            Ok(()) => ConnectionStatus::Succeeded,
            Err(e) => ConnectionStatus::Failed(e),
        };
    }

    pub fn attach_file(&mut self, path: PathBuf) -> Result<WizardEffect, WizardError> {
        if self.uploading {
            return Err(WizardError::Busy);
        }
        self.uploading = true;
        self.status = None;
        Ok(WizardEffect::UploadFile(path))
    }

    pub fn file_uploaded(&mut self, result: Result<FileObject, String>) {
        self.uploading = false;
        match result {
            Ok(file) => {
                if self.source_name.trim().is_empty() {
                    self.source_name = file.original_filename.clone();
                }
                push_file_object(&mut self.connection, file);
                self.field_errors.retain(|name, _| {
                    !self.type_details.as_ref().and_then(|d| d.field(name)).is_some_and(|s| s.file_uploader)
                });
            }
            Err(e) => self.status = Some(format!("Upload failed: {}", e)),
        }
    }

    pub fn remove_file(&mut self, index: usize) {
        remove_file_object(&mut self.connection, index);
    }

    /// Guard for leaving the current step.
    fn check_leave(&self) -> Result<(), WizardError> {
        match self.step {
            Step::SelectType if self.source_type.is_none() => Err(WizardError::NoSourceType),
            Step::ConfigureSource if self.is_file_based() => {
                if file_objects(&self.connection).is_empty() {
                    Err(WizardError::FilesRequired)
                } else {
                    Ok(())
                }
            }
            Step::ConfigureSource if self.connection_status != ConnectionStatus::Succeeded => {
                Err(WizardError::ConnectionNotTested)
            }
            Step::ConfigureSchema if !self.schema.has_selection() => Err(WizardError::NoTablesSelected),
            _ => Ok(()),
        }
    }

    /// Advance one step, or submit from the review step.
    pub fn next(&mut self) -> Result<Option<WizardEffect>, WizardError> {
        if self.step == Step::ReviewConfig {
            return self.submit().map(Some);
        }
        self.check_leave()?;
        let Some(next) = self.step.next() else {
            return Ok(None);
        };
        self.step = next;
        if next == Step::ConfigureSchema {
            return Ok(Some(self.discover_schema()?));
        }
        Ok(None)
    }

    pub fn back(&mut self) {
        if let Some(prev) = self.step.prev() {
            self.step = prev;
        }
    }

    /// Re-run schema discovery for the current connection.
    pub fn discover_schema(&mut self) -> Result<WizardEffect, WizardError> {
        let source_type = self.source_type.clone().ok_or(WizardError::NoSourceType)?;
        let fetch = self.schema.begin_fetch();
        Ok(WizardEffect::DiscoverSchema { source_type, connection: self.connection.clone(), fetch })
    }

    pub fn schema_loaded(&mut self, fetch: u64, result: Result<Vec<EntitySchema>, String>) {
        if !self.schema.is_current_fetch(fetch) {
            log_debug!("Ignoring schema from superseded discovery {}", fetch);
            return;
        }
        match result {
            Ok(entities) => self.schema.load(&entities, &self.lang, false),
            Err(e) => {
                log_warn!("Schema discovery failed: {}", e);
                self.schema.fail("Failed to load schema. Please check your connection settings.");
            }
        }
    }

    pub fn request_annotation(&mut self, table_id: &str) -> Option<WizardEffect> {
        let (ticket, request) =
            self.schema
                .annotation_request(table_id, &self.source_name, &self.description, &self.lang)?;
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

    pub fn set_source_name(&mut self, name: &str) {
        self.source_name = name.to_string();
        self.source_name_error = None;
    }

    pub fn payload(&self) -> SourcePayload {
        SourcePayload {
            source_name: self.source_name.trim().to_string(),
            is_private: !self.admin_context,
            description: vec![LangText::new(&self.lang, &self.description)],
            connection_info: self.connection.clone(),
            additional_details: String::new(),
            entities: self.schema.selected_entities(&self.lang),
        }
    }

    pub fn submit(&mut self) -> Result<WizardEffect, WizardError> {
        if self.saving {
            return Err(WizardError::Busy);
        }
        if self.source_name.trim().is_empty() {
            self.source_name_error = Some(WizardError::MissingName.to_string());
            return Err(WizardError::MissingName);
        }
        let source_type = self.source_type.clone().ok_or(WizardError::NoSourceType)?;
        self.saving = true;
        self.status = None;
        Ok(WizardEffect::Create { source_type, payload: self.payload() })
    }

    /// Returns true when the wizard should close.
    pub fn save_result(&mut self, result: Result<(), String>) -> bool {
        self.saving = false;
        match result {
            Ok(()) => {
                log_info!("Source '{}' created", self.source_name.trim());
                true
            }
            Err(e) => {
                self.status = Some(format!("Failed to create source: {}", e));
                false
            }
        }
    }
}
