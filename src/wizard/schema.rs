// src/wizard/schema.rs
//! Editable table/column drafts shared by both wizards.

use serde_json::Value;
use std::collections::{HashMap, HashSet};

use super::WizardError;
use crate::api::sources::{
    text_for_lang, Annotation, AnnotationRequest, ColumnSchema, EntitySchema, LangText,
};
use crate::log_warn;

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDraft {
    pub name: String,
    pub column_type: String,
    pub description: String,
    pub tags: String,
    pub is_primary_key: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDraft {
    /// Table name as discovered; stays stable while the draft is edited.
    pub id: String,
    pub name: String,
    pub file_type: String,
    pub media_type: String,
    pub object_name: String,
    pub sheet_name: String,
    pub original_file: String,
    pub description: String,
    pub domains: Vec<String>,
    pub tags: String,
    pub columns: Vec<ColumnDraft>,
    pub foreign_keys: Vec<Value>,
    /// Bumped on every local edit.
    revision: u64,
}

impl TableDraft {
    pub fn from_entity(entity: &EntitySchema, lang: &str) -> Self {
        let columns = entity
            .columns
            .iter()
            .map(|column| ColumnDraft {
                name: column.column_name.clone(),
                column_type: column.column_type.clone(),
                description: text_for_lang(&column.description, lang),
                tags: column.tags.clone(),
                is_primary_key: entity.primary_keys.contains(&column.column_name),
            })
            .collect();

        Self {
            id: entity.table_name.clone(),
            name: entity.table_name.clone(),
            file_type: entity.file_type.clone(),
            media_type: entity.media_type.clone(),
            object_name: entity.object_name.clone(),
            sheet_name: entity.sheet_name.clone(),
            original_file: entity.original_file.clone(),
            description: text_for_lang(&entity.description, lang),
            domains: entity.domains.clone(),
            tags: entity.tags.clone(),
            columns,
            foreign_keys: entity.foreign_keys.clone(),
            revision: 0,
        }
    }

    /// Rebuild the wire entity; `primary_keys` is regenerated from the
    /// column flags.
    pub fn to_entity(&self, lang: &str) -> EntitySchema {
        EntitySchema {
            table_name: self.name.clone(),
            file_type: self.file_type.clone(),
            original_file: self.original_file.clone(),
            object_name: self.object_name.clone(),
            sheet_name: self.sheet_name.clone(),
            media_type: self.media_type.clone(),
            description: vec![LangText::new(lang, &self.description)],
            domains: self.domains.clone(),
            tags: self.tags.clone(),
            columns: self
                .columns
                .iter()
                .map(|column| ColumnSchema {
                    column_name: column.name.clone(),
                    column_type: column.column_type.clone(),
                    description: vec![LangText::new(lang, &column.description)],
                    tags: column.tags.clone(),
                })
                .collect(),
            primary_keys: self.primary_keys(),
            foreign_keys: self.foreign_keys.clone(),
            selected: false,
        }
    }

    pub fn primary_keys(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.is_primary_key)
            .map(|c| c.name.clone())
            .collect()
    }

    fn matches(&self, needle: &str) -> bool {
        self.name.to_lowercase().contains(needle) || self.description.to_lowercase().contains(needle)
    }
}

/// Identifies one annotation request. A response is applied only while the
/// ticket still matches the table it was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationTicket {
    pub table_id: String,
    fetch: u64,
    revision: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SchemaEditor {
    tables: Vec<TableDraft>,
    selected: HashSet<String>,
    expanded: HashSet<String>,
    annotating: HashSet<String>,
    filter: String,
    /// Bumped whenever the drafts are replaced; annotation tickets carry it.
    fetch: u64,
    /// Ticket of the latest schema request.
    requested: u64,
    pub loading: bool,
    pub error: Option<String>,
}

impl SchemaEditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a schema request and return its ticket. Replies carrying an
    /// older ticket are dropped by the wizards.
    pub fn begin_fetch(&mut self) -> u64 {
        self.requested += 1;
        self.loading = true;
        self.error = None;
        self.requested
    }

    pub fn is_current_fetch(&self, ticket: u64) -> bool {
        ticket == self.requested
    }

    /// Drop all drafts and invalidate requests still in flight.
    pub fn clear(&mut self) {
        self.requested += 1;
        self.fetch += 1;
        self.tables.clear();
        self.selected.clear();
        self.expanded.clear();
        self.annotating.clear();
        self.filter.clear();
        self.loading = false;
        self.error = None;
    }

    /// Replace the drafts with a fresh fetch. Selection is reset, or taken
    /// from the persisted `_selected` flags when `preselect` is set.
    pub fn load(&mut self, entities: &[EntitySchema], lang: &str, preselect: bool) {
        self.fetch += 1;
        self.tables = entities.iter().map(|e| TableDraft::from_entity(e, lang)).collect();
        self.selected = if preselect {
            entities.iter().filter(|e| e.selected).map(|e| e.table_name.clone()).collect()
        } else {
            HashSet::new()
        };
        self.expanded.clear();
        self.annotating.clear();
        self.loading = false;
        self.error = None;
    }

    pub fn fail(&mut self, message: &str) {
        self.fetch += 1;
        self.tables.clear();
        self.selected.clear();
        self.expanded.clear();
        self.annotating.clear();
        self.loading = false;
        self.error = Some(message.to_string());
    }

    pub fn tables(&self) -> &[TableDraft] {
        &self.tables
    }

    pub fn table(&self, id: &str) -> Option<&TableDraft> {
        self.tables.iter().find(|t| t.id == id)
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.selected.contains(id)
    }

    pub fn is_expanded(&self, id: &str) -> bool {
        self.expanded.contains(id)
    }

    pub fn is_annotating(&self, id: &str) -> bool {
        self.annotating.contains(id)
    }

    pub fn selected_count(&self) -> usize {
        self.tables.iter().filter(|t| self.selected.contains(&t.id)).count()
    }

    pub fn has_selection(&self) -> bool {
        self.selected_count() > 0
    }

    pub fn all_selected(&self) -> bool {
        !self.tables.is_empty() && self.selected_count() == self.tables.len()
    }

    pub fn summary(&self) -> String {
        format!("{} of {} tables selected", self.selected_count(), self.tables.len())
    }

    pub fn toggle_selected(&mut self, id: &str) {
        if !self.selected.remove(id) {
            self.selected.insert(id.to_string());
        }
    }

    pub fn toggle_expanded(&mut self, id: &str) {
        if !self.expanded.remove(id) {
            self.expanded.insert(id.to_string());
        }
    }

    /// Select or clear every current table.
    pub fn select_all(&mut self, checked: bool) {
        self.selected = if checked {
            self.tables.iter().map(|t| t.id.clone()).collect()
        } else {
            HashSet::new()
        };
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn set_filter(&mut self, filter: &str) {
        self.filter = filter.to_string();
    }

    /// Tables whose name or description contains the filter, ignoring case.
    pub fn visible_tables(&self) -> Vec<&TableDraft> {
        let needle = self.filter.trim().to_lowercase();
        self.tables.iter().filter(|t| needle.is_empty() || t.matches(&needle)).collect()
    }

    fn table_mut(&mut self, id: &str) -> Option<&mut TableDraft> {
        let table = self.tables.iter_mut().find(|t| t.id == id)?;
        table.revision += 1;
        Some(table)
    }

    pub fn set_table_description(&mut self, id: &str, text: &str) {
        if let Some(table) = self.table_mut(id) {
            table.description = text.to_string();
        }
    }

    pub fn set_column_description(&mut self, id: &str, column: &str, text: &str) {
        if let Some(table) = self.table_mut(id) {
            if let Some(col) = table.columns.iter_mut().find(|c| c.name == column) {
                col.description = text.to_string();
            }
        }
    }

    pub fn remove_table(&mut self, id: &str) {
        self.tables.retain(|t| t.id != id);
        self.selected.remove(id);
        self.expanded.remove(id);
        self.annotating.remove(id);
    }

    pub fn remove_column(&mut self, id: &str, column: &str) {
        if let Some(table) = self.table_mut(id) {
            table.columns.retain(|c| c.name != column);
        }
    }

    /// Start an annotation for one table. `None` when the table is unknown
    /// or already being annotated.
    pub fn annotation_request(
        &mut self,
        id: &str,
        source_name: &str,
        source_description: &str,
        lang: &str,
    ) -> Option<(AnnotationTicket, AnnotationRequest)> {
        if self.annotating.contains(id) {
            return None;
        }
        let table = self.table(id)?;
        let mut entity = table.to_entity(lang);
        entity.foreign_keys.clear();

        let ticket = AnnotationTicket { table_id: id.to_string(), fetch: self.fetch, revision: table.revision };
        let request = AnnotationRequest {
            lang: vec![lang.to_string()],
            source_name: source_name.to_string(),
            source_description: vec![LangText::new(lang, source_description)],
            entity,
        };
        self.annotating.insert(id.to_string());
        Some((ticket, request))
    }

    /// Apply suggested descriptions. Column descriptions the service did
    /// not return are kept.
    pub fn apply_annotation(
        &mut self,
        ticket: &AnnotationTicket,
        response: Result<HashMap<String, Annotation>, String>,
        lang: &str,
    ) -> Result<(), WizardError> {
        if ticket.fetch != self.fetch {
            log_warn!("Discarding annotation for '{}' from an older schema fetch", ticket.table_id);
            return Err(WizardError::StaleAnnotation(ticket.table_id.clone()));
        }
        self.annotating.remove(&ticket.table_id);

        let Some(table) = self.tables.iter_mut().find(|t| t.id == ticket.table_id) else {
            return Err(WizardError::StaleAnnotation(ticket.table_id.clone()));
        };
        if table.revision != ticket.revision {
            log_warn!("Discarding annotation for '{}': edited while pending", ticket.table_id);
            return Err(WizardError::StaleAnnotation(ticket.table_id.clone()));
        }

        let annotation = match response {
            Ok(mut by_lang) => match by_lang.remove(lang) {
                Some(annotation) => annotation,
                None => {
                    log_warn!("Annotation for '{}' has no '{}' entry", ticket.table_id, lang);
                    self.error = Some(format!("Annotation failed: no descriptions in '{}'", lang));
                    return Ok(());
                }
            },
            Err(e) => {
                log_warn!("Annotation for '{}' failed: {}", ticket.table_id, e);
                self.error = Some(format!("Annotation failed: {}", e));
                return Ok(());
            }
        };

        table.description = annotation.table_description;
        for column in &mut table.columns {
            if let Some(text) = annotation.columns.get(&column.name).filter(|t| !t.is_empty()) {
                column.description = text.clone();
            }
        }
        table.revision += 1;
        Ok(())
    }

    /// Wire entities of the selected tables, in table order.
    pub fn selected_entities(&self, lang: &str) -> Vec<EntitySchema> {
        self.tables
            .iter()
            .filter(|t| self.selected.contains(&t.id))
            .map(|t| t.to_entity(lang))
            .collect()
    }
}
