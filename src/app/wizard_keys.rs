use ratatui::crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use serde_json::Value;
use std::path::PathBuf;

use super::{App, Wizard, WizardOverlay};
use crate::api::sources::ConnectionFieldSpec;
use crate::chat::model::value_as_text;
use crate::wizard::{EditTab, SchemaEditor, Step, WizardEffect, WizardError, FILE_OBJECTS};

/// One selectable line of the wizard overlay.
#[derive(Debug, Clone, PartialEq)]
pub enum WizardRow {
    SourceType(String),
    SourceName,
    Description,
    Field(String),
    AttachFile,
    File(usize),
    TestConnection,
    ReloadSchema,
    Filter,
    SelectAll,
    Table(String),
    Column(String, String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditTarget {
    SourceName,
    Description,
    Field(String),
    FilePath,
    Filter,
    TableDescription(String),
    ColumnDescription(String, String),
}

/// A line being typed into.
#[derive(Debug, Clone, PartialEq)]
pub struct TextEdit {
    pub target: EditTarget,
    pub buffer: String,
}

impl TextEdit {
    fn new(target: EditTarget, buffer: impl Into<String>) -> Self {
        Self { target, buffer: buffer.into() }
    }
}

fn schema_rows(schema: &SchemaEditor, rows: &mut Vec<WizardRow>) {
    if schema.error.is_some() {
        rows.push(WizardRow::ReloadSchema);
    }
    rows.push(WizardRow::Filter);
    rows.push(WizardRow::SelectAll);
    for table in schema.visible_tables() {
        rows.push(WizardRow::Table(table.id.clone()));
        if schema.is_expanded(&table.id) {
            rows.extend(table.columns.iter().map(|c| WizardRow::Column(table.id.clone(), c.name.clone())));
        }
    }
}

fn file_rows(count: usize, rows: &mut Vec<WizardRow>) {
    rows.push(WizardRow::AttachFile);
    rows.extend((0..count).map(WizardRow::File));
}

/// Rows shown for the wizard's current step or tab, top to bottom.
pub fn wizard_rows(wizard: &Wizard) -> Vec<WizardRow> {
    let mut rows = Vec::new();
    match wizard {
        Wizard::New(w) => match w.step() {
            Step::SelectType => {
                rows.extend(w.source_types.iter().map(|t| WizardRow::SourceType(t.name.clone())));
            }
            Step::ConfigureSource => {
                rows.push(WizardRow::SourceName);
                rows.push(WizardRow::Description);
                let mut has_uploader = false;
                if let Some(details) = w.type_details() {
                    for (name, spec) in &details.fields {
                        if spec.file_uploader {
                            has_uploader = true;
                            file_rows(w.files().len(), &mut rows);
                        } else {
                            rows.push(WizardRow::Field(name.clone()));
                        }
                    }
                }
                if w.is_file_based() && !has_uploader {
                    file_rows(w.files().len(), &mut rows);
                }
                if !w.is_file_based() {
                    rows.push(WizardRow::TestConnection);
                }
            }
            Step::ConfigureSchema => schema_rows(&w.schema, &mut rows),
            Step::ReviewConfig => {
                rows.push(WizardRow::SourceName);
                rows.push(WizardRow::Description);
            }
        },
        Wizard::Edit(w) => match w.tab {
            EditTab::ConfigureSource => {
                rows.push(WizardRow::SourceName);
                rows.push(WizardRow::Description);
                if w.is_tabular_file() {
                    file_rows(w.files().len(), &mut rows);
                } else {
                    rows.extend(
                        w.connection()
                            .keys()
                            .filter(|k| k.as_str() != FILE_OBJECTS)
                            .map(|k| WizardRow::Field(k.clone())),
                    );
                }
            }
            EditTab::ConfigureSchema => schema_rows(&w.schema, &mut rows),
        },
    }
    rows
}

fn schema_mut(wizard: &mut Wizard) -> &mut SchemaEditor {
    match wizard {
        Wizard::New(w) => &mut w.schema,
        Wizard::Edit(w) => &mut w.schema,
    }
}

fn field_spec<'a>(wizard: &'a Wizard, name: &str) -> Option<&'a ConnectionFieldSpec> {
    match wizard {
        Wizard::New(w) => w.type_details()?.field(name),
        Wizard::Edit(_) => None,
    }
}

fn field_current(wizard: &Wizard, name: &str) -> Option<Value> {
    match wizard {
        Wizard::New(w) => w.connection().get(name).cloned(),
        Wizard::Edit(w) => w.connection().get(name).cloned(),
    }
}

/// Typed text becomes a number when the field holds numbers.
fn field_value(previous: Option<&Value>, spec: Option<&ConnectionFieldSpec>, text: &str) -> Value {
    let numeric = previous.is_some_and(Value::is_number)
        || spec.and_then(|s| s.default.as_ref()).is_some_and(Value::is_number);
    if numeric {
        if let Ok(n) = text.trim().parse::<i64>() {
            return Value::from(n);
        }
    }
    Value::String(text.to_string())
}

/// What the App must do after a wizard key.
#[derive(Debug, Default, PartialEq)]
pub struct KeyResult {
    pub effects: Vec<WizardEffect>,
    pub close: bool,
}

impl KeyResult {
    fn effect(effect: WizardEffect) -> Self {
        Self { effects: vec![effect], close: false }
    }
}

/// Turn a guard failure into the overlay notice.
fn report<T>(notice: &mut Option<String>, result: Result<T, WizardError>) -> Option<T> {
    match result {
        Ok(value) => {
            *notice = None;
            Some(value)
        }
        Err(e) => {
            *notice = Some(e.to_string());
            None
        }
    }
}

fn commit_edit(overlay: &mut WizardOverlay, edit: TextEdit) -> KeyResult {
    let text = edit.buffer;
    match edit.target {
        EditTarget::SourceName => match &mut overlay.wizard {
            Wizard::New(w) => w.set_source_name(&text),
            Wizard::Edit(w) => w.name = text,
        },
        EditTarget::Description => match &mut overlay.wizard {
            Wizard::New(w) => w.description = text,
            Wizard::Edit(w) => w.description = text,
        },
        EditTarget::Field(name) => {
            let previous = field_current(&overlay.wizard, &name);
            let value = field_value(previous.as_ref(), field_spec(&overlay.wizard, &name), &text);
            match &mut overlay.wizard {
                Wizard::New(w) => w.set_field(&name, value),
                Wizard::Edit(w) => w.set_field(&name, value),
            }
        }
        EditTarget::FilePath => {
            let path = PathBuf::from(text.trim());
            if text.trim().is_empty() {
                return KeyResult::default();
            }
            let result = match &mut overlay.wizard {
                Wizard::New(w) => w.attach_file(path),
                Wizard::Edit(w) => w.attach_file(path),
            };
            if let Some(effect) = report(&mut overlay.notice, result) {
                return KeyResult::effect(effect);
            }
        }
        EditTarget::Filter => schema_mut(&mut overlay.wizard).set_filter(&text),
        EditTarget::TableDescription(id) => schema_mut(&mut overlay.wizard).set_table_description(&id, &text),
        EditTarget::ColumnDescription(id, column) => {
            schema_mut(&mut overlay.wizard).set_column_description(&id, &column, &text)
        }
    }
    KeyResult::default()
}

fn begin_edit(overlay: &WizardOverlay, row: &WizardRow) -> Option<TextEdit> {
    let (name, description) = match &overlay.wizard {
        Wizard::New(w) => (w.source_name.clone(), w.description.clone()),
        Wizard::Edit(w) => (w.name.clone(), w.description.clone()),
    };
    let schema = match &overlay.wizard {
        Wizard::New(w) => &w.schema,
        Wizard::Edit(w) => &w.schema,
    };
    let edit = match row {
        WizardRow::SourceName => TextEdit::new(EditTarget::SourceName, name),
        WizardRow::Description => TextEdit::new(EditTarget::Description, description),
        WizardRow::Field(field) => {
            let current = field_current(&overlay.wizard, field).map(|v| value_as_text(&v)).unwrap_or_default();
            TextEdit::new(EditTarget::Field(field.clone()), current)
        }
        WizardRow::AttachFile => TextEdit::new(EditTarget::FilePath, ""),
        WizardRow::Filter => TextEdit::new(EditTarget::Filter, schema.filter()),
        WizardRow::Column(id, column) => {
            let current = schema
                .table(id)
                .and_then(|t| t.columns.iter().find(|c| &c.name == column))
                .map(|c| c.description.clone())
                .unwrap_or_default();
            TextEdit::new(EditTarget::ColumnDescription(id.clone(), column.clone()), current)
        }
        _ => return None,
    };
    Some(edit)
}

/// Enter on a row that is not a plain text field.
fn activate(overlay: &mut WizardOverlay, row: &WizardRow) -> KeyResult {
    if let Some(edit) = begin_edit(overlay, row) {
        // fields with a fixed set of values cycle instead of taking text
        if let WizardRow::Field(name) = row {
            if let Some(allowed) = field_spec(&overlay.wizard, name).and_then(|s| s.allowed.clone()) {
                if !allowed.is_empty() {
                    let position = allowed.iter().position(|a| *a == edit.buffer);
                    let next = position.map_or(0, |p| (p + 1) % allowed.len());
                    if let Wizard::New(w) = &mut overlay.wizard {
                        w.set_field(name, Value::String(allowed[next].clone()));
                    }
                    return KeyResult::default();
                }
            }
        }
        overlay.edit = Some(edit);
        return KeyResult::default();
    }

    match (row, &mut overlay.wizard) {
        (WizardRow::SourceType(name), Wizard::New(w)) => {
            w.select_type(name).map(KeyResult::effect).unwrap_or_default()
        }
        (WizardRow::File(index), Wizard::New(w)) => {
            w.remove_file(*index);
            KeyResult::default()
        }
        (WizardRow::File(index), Wizard::Edit(w)) => {
            w.remove_file(*index);
            KeyResult::default()
        }
        (WizardRow::TestConnection, Wizard::New(w)) => {
            let result = w.test_connection();
            report(&mut overlay.notice, result).map(KeyResult::effect).unwrap_or_default()
        }
        (WizardRow::ReloadSchema, Wizard::New(w)) => {
            let result = w.discover_schema();
            report(&mut overlay.notice, result).map(KeyResult::effect).unwrap_or_default()
        }
        (WizardRow::ReloadSchema, Wizard::Edit(w)) => KeyResult::effect(w.reload_schema()),
        (WizardRow::SelectAll, wizard) => {
            let schema = schema_mut(wizard);
            let all = schema.all_selected();
            schema.select_all(!all);
            KeyResult::default()
        }
        (WizardRow::Table(id), wizard) => {
            schema_mut(wizard).toggle_expanded(id);
            KeyResult::default()
        }
        _ => KeyResult::default(),
    }
}

fn request_annotation(overlay: &mut WizardOverlay, id: &str) -> KeyResult {
    let effect = match &mut overlay.wizard {
        Wizard::New(w) => w.request_annotation(id),
        Wizard::Edit(w) => w.request_annotation(id),
    };
    match effect {
        Some(effect) => KeyResult::effect(effect),
        None => {
            overlay.notice = Some(format!("Annotation for '{}' is already running", id));
            KeyResult::default()
        }
    }
}

/// Apply one key to the wizard overlay.
pub fn handle_overlay_key(overlay: &mut WizardOverlay, key_event: KeyEvent) -> KeyResult {
    if let Some(edit) = overlay.edit.as_mut() {
        match key_event.code {
            KeyCode::Esc => overlay.edit = None,
            KeyCode::Enter => {
                if let Some(edit) = overlay.edit.take() {
                    return commit_edit(overlay, edit);
                }
            }
            KeyCode::Backspace => {
                edit.buffer.pop();
            }
            KeyCode::Char(ch) => edit.buffer.push(ch),
            _ => {}
        }
        return KeyResult::default();
    }

    let ctrl = key_event.modifiers.contains(KeyModifiers::CONTROL);
    let rows = wizard_rows(&overlay.wizard);
    overlay.cursor = overlay.cursor.min(rows.len().saturating_sub(1));
    let row = rows.get(overlay.cursor).cloned();

    match key_event.code {
        KeyCode::Esc => return KeyResult { effects: Vec::new(), close: true },
        KeyCode::Char('n') if ctrl => {
            if let Wizard::New(w) = &mut overlay.wizard {
                let result = w.next();
                if let Some(effect) = report(&mut overlay.notice, result) {
                    overlay.cursor = 0;
                    return KeyResult { effects: effect.into_iter().collect(), close: false };
                }
            }
        }
        KeyCode::Char('b') if ctrl => {
            if let Wizard::New(w) = &mut overlay.wizard {
                w.back();
                overlay.cursor = 0;
            }
        }
        KeyCode::Char('s') if ctrl => {
            let result = match &mut overlay.wizard {
                Wizard::New(w) if w.step() == Step::ReviewConfig => w.submit(),
                Wizard::New(_) => return KeyResult::default(),
                Wizard::Edit(w) => w.save(),
            };
            if let Some(effect) = report(&mut overlay.notice, result) {
                return KeyResult::effect(effect);
            }
        }
        KeyCode::Tab => {
            if let Wizard::Edit(w) = &mut overlay.wizard {
                w.switch_tab();
                overlay.cursor = 0;
            }
        }
        KeyCode::Up => overlay.cursor = overlay.cursor.saturating_sub(1),
        KeyCode::Down => {
            if overlay.cursor + 1 < rows.len() {
                overlay.cursor += 1;
            }
        }
        KeyCode::Enter => {
            if let Some(row) = row {
                return activate(overlay, &row);
            }
        }
        KeyCode::Char(' ') => match row {
            Some(WizardRow::Table(id)) => schema_mut(&mut overlay.wizard).toggle_selected(&id),
            Some(row @ WizardRow::SelectAll) => return activate(overlay, &row),
            _ => {}
        },
        KeyCode::Char('g') => {
            if let Some(WizardRow::Table(id)) = row {
                return request_annotation(overlay, &id);
            }
        }
        KeyCode::Char('e') => {
            if let Some(WizardRow::Table(id)) = row {
                let current = schema_mut(&mut overlay.wizard)
                    .table(&id)
                    .map(|t| t.description.clone())
                    .unwrap_or_default();
                overlay.edit = Some(TextEdit::new(EditTarget::TableDescription(id), current));
            }
        }
        KeyCode::Delete => match row {
            Some(WizardRow::Table(id)) => schema_mut(&mut overlay.wizard).remove_table(&id),
            Some(WizardRow::Column(id, column)) => schema_mut(&mut overlay.wizard).remove_column(&id, &column),
            _ => {}
        },
        _ => {}
    }
    KeyResult::default()
}

impl App {
    pub(super) fn handle_wizard_key(&mut self, key_event: KeyEvent) {
        let Some(overlay) = self.wizard.as_mut() else {
            return;
        };
        let result = handle_overlay_key(overlay, key_event);
        if result.close {
            self.wizard = None;
            return;
        }
        for effect in result.effects {
            self.run_wizard_effect(effect);
        }
    }
}
