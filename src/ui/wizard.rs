use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Clear, List, ListItem, ListState, Paragraph, StatefulWidget, Widget, Wrap},
};
use serde_json::{Map, Value};

use super::style::{cursor_style, error_style, hint_style, panel};
use crate::app::{wizard_rows, EditTarget, TextEdit, Wizard, WizardOverlay, WizardRow};
use crate::api::sources::FileObject;
use crate::chat::model::value_as_text;
use crate::wizard::{ConnectionStatus, EditTab, SchemaEditor, Step};

pub fn render_wizard(overlay: &WizardOverlay, area: Rect, buf: &mut Buffer) {
    Clear.render(area, buf);

    let title = match &overlay.wizard {
        Wizard::New(w) => format!("New source · step {}/4 · {}", w.step().index() + 1, w.step().title()),
        Wizard::Edit(w) => format!("Edit source #{} · {}", w.source_id(), w.tab.title()),
    };
    let block = panel(&title, true);
    let inner = block.inner(area);
    block.render(area, buf);

    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(2), Constraint::Min(3), Constraint::Length(2), Constraint::Length(1)])
        .split(inner);

    Paragraph::new(header_lines(&overlay.wizard))
        .wrap(Wrap { trim: true })
        .render(layout[0], buf);

    let rows = wizard_rows(&overlay.wizard);
    let items: Vec<ListItem> = rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let selected = i == overlay.cursor;
            let editing = overlay.edit.as_ref().filter(|_| selected);
            ListItem::new(row_line(&overlay.wizard, row, editing)).style(cursor_style(selected && editing.is_none()))
        })
        .collect();
    let mut state = ListState::default().with_selected(Some(overlay.cursor.min(rows.len().saturating_sub(1))));
    StatefulWidget::render(List::new(items), layout[1], buf, &mut state);

    let mut status = Vec::new();
    if let Some(notice) = &overlay.notice {
        status.push(Line::from(Span::styled(notice.clone(), error_style())));
    }
    if let Some(line) = busy_line(&overlay.wizard) {
        status.push(Line::from(Span::styled(line, Style::default().fg(Color::Yellow))));
    }
    Paragraph::new(status).render(layout[2], buf);

    Paragraph::new(key_hint(overlay)).style(hint_style()).render(layout[3], buf);
}

fn header_lines(wizard: &Wizard) -> Vec<Line<'static>> {
    match wizard {
        Wizard::New(w) => {
            let mut lines = Vec::new();
            if let Some(name) = w.type_details().map(|t| t.display_name()).or(w.source_type().map(str::to_string)) {
                lines.push(Line::from(vec![Span::styled("Type: ", hint_style()), Span::raw(name)]));
            }
            match w.step() {
                Step::ConfigureSource if !w.is_file_based() => {
                    lines.push(connection_line(&w.connection_status));
                }
                Step::ConfigureSchema | Step::ReviewConfig => {
                    lines.push(Line::from(Span::styled(w.schema.summary(), hint_style())));
                }
                _ => {}
            }
            if let Some(status) = &w.status {
                lines.push(Line::from(Span::styled(status.clone(), error_style())));
            }
            lines
        }
        Wizard::Edit(w) => {
            let mut lines = vec![Line::from(vec![
                Span::styled("Type: ", hint_style()),
                Span::raw(w.source_type().unwrap_or("…").to_string()),
                Span::styled(if w.is_private { "  private" } else { "  shared" }, hint_style()),
                Span::styled(format!("  {}", w.schema.summary()), hint_style()),
            ])];
            if let Some(error) = &w.error {
                lines.push(Line::from(Span::styled(error.clone(), error_style())));
            }
            lines
        }
    }
}

fn connection_line(status: &ConnectionStatus) -> Line<'static> {
    let (text, style) = match status {
        ConnectionStatus::Untested => ("Connection not tested".to_string(), hint_style()),
        ConnectionStatus::Testing => ("Testing connection…".to_string(), Style::default().fg(Color::Yellow)),
        ConnectionStatus::Succeeded => ("Connection OK".to_string(), Style::default().fg(Color::Green)),
        ConnectionStatus::Failed(e) => (format!("Connection failed: {}", e), error_style()),
    };
    Line::from(Span::styled(text, style))
}

fn busy_line(wizard: &Wizard) -> Option<String> {
    let (uploading, saving, schema) = match wizard {
        Wizard::New(w) => (w.uploading, w.saving, &w.schema),
        Wizard::Edit(w) => {
            if w.is_loading() && !w.schema.loading {
                return Some("Loading source…".to_string());
            }
            (w.uploading, w.saving, &w.schema)
        }
    };
    if saving {
        Some("Saving…".to_string())
    } else if uploading {
        Some("Uploading file…".to_string())
    } else if schema.loading {
        Some("Loading schema…".to_string())
    } else {
        None
    }
}

fn key_hint(overlay: &WizardOverlay) -> &'static str {
    if overlay.edit.is_some() {
        return "Enter confirm • Esc cancel";
    }
    match &overlay.wizard {
        Wizard::New(w) => match w.step() {
            Step::SelectType => "Enter choose • Esc close",
            Step::ConfigureSource => "Enter edit/test • Ctrl+N next • Ctrl+B back • Esc close",
            Step::ConfigureSchema => "Space select • Enter expand • e describe • g annotate • Del remove • Ctrl+N next",
            Step::ReviewConfig => "Enter edit • Ctrl+S create • Ctrl+B back • Esc close",
        },
        Wizard::Edit(w) => match w.tab {
            EditTab::ConfigureSource => "Enter edit • Tab schema • Ctrl+S save • Esc close",
            EditTab::ConfigureSchema => "Space select • Enter expand • e describe • g annotate • Tab source • Ctrl+S save",
        },
    }
}

fn labelled(label: String, value: String, error: Option<&String>) -> Line<'static> {
    let mut spans = vec![
        Span::styled(format!("{:<18}", label), Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(value),
    ];
    if let Some(error) = error {
        spans.push(Span::styled(format!("  {}", error), error_style()));
    }
    Line::from(spans)
}

fn editing_value(edit: Option<&TextEdit>, target: &EditTarget) -> Option<String> {
    edit.filter(|e| &e.target == target).map(|e| format!("{}█", e.buffer))
}

fn masked(name: &str, value: &Value) -> String {
    let text = value_as_text(value);
    if name.contains("password") || name.contains("secret") {
        "•".repeat(text.chars().count())
    } else {
        text
    }
}

fn row_line(wizard: &Wizard, row: &WizardRow, edit: Option<&TextEdit>) -> Line<'static> {
    let (connection, files, schema): (&Map<String, Value>, Vec<FileObject>, &SchemaEditor) = match wizard {
        Wizard::New(w) => (w.connection(), w.files(), &w.schema),
        Wizard::Edit(w) => (w.connection(), w.files(), &w.schema),
    };

    match row {
        WizardRow::SourceType(name) => {
            let (label, chosen) = match wizard {
                Wizard::New(w) => (
                    w.source_types
                        .iter()
                        .find(|t| &t.name == name)
                        .map(|t| t.display_name())
                        .unwrap_or_else(|| name.clone()),
                    w.source_type() == Some(name.as_str()),
                ),
                Wizard::Edit(_) => (name.clone(), false),
            };
            Line::from(format!("{} {}", if chosen { "◉" } else { "○" }, label))
        }
        WizardRow::SourceName => {
            let (value, error) = match wizard {
                Wizard::New(w) => (w.source_name.clone(), w.source_name_error.as_ref()),
                Wizard::Edit(w) => (w.name.clone(), None),
            };
            let value = editing_value(edit, &EditTarget::SourceName).unwrap_or(value);
            labelled("Name".to_string(), value, error)
        }
        WizardRow::Description => {
            let value = match wizard {
                Wizard::New(w) => w.description.clone(),
                Wizard::Edit(w) => w.description.clone(),
            };
            let value = editing_value(edit, &EditTarget::Description).unwrap_or(value);
            labelled("Description".to_string(), value, None)
        }
        WizardRow::Field(name) => {
            let (spec, error) = match wizard {
                Wizard::New(w) => (
                    w.type_details().and_then(|t| t.field(name)),
                    w.field_errors.get(name),
                ),
                Wizard::Edit(_) => (None, None),
            };
            let mut label = spec.and_then(|s| s.title.clone()).unwrap_or_else(|| name.clone());
            if spec.is_some_and(|s| s.required) {
                label.push('*');
            }
            let current = connection.get(name).map(|v| masked(name, v)).unwrap_or_default();
            let value = editing_value(edit, &EditTarget::Field(name.clone())).unwrap_or_else(|| {
                match spec.and_then(|s| s.allowed.as_ref()) {
                    Some(allowed) if !allowed.is_empty() => format!("‹ {} ›", current),
                    _ if current.is_empty() => spec
                        .and_then(|s| s.hint.clone())
                        .map(|h| format!("({})", h))
                        .unwrap_or_default(),
                    _ => current,
                }
            });
            labelled(label, value, error)
        }
        WizardRow::AttachFile => {
            let value = editing_value(edit, &EditTarget::FilePath).unwrap_or_else(|| "Enter a file path…".to_string());
            labelled("+ Attach file".to_string(), value, None)
        }
        WizardRow::File(index) => {
            let name = files
                .get(*index)
                .map(|f| if f.original_filename.is_empty() { f.object_name.clone() } else { f.original_filename.clone() })
                .unwrap_or_default();
            Line::from(vec![Span::raw("    - "), Span::raw(name), Span::styled("  (Del to remove)", hint_style())])
        }
        WizardRow::TestConnection => Line::from(Span::styled("[ Test connection ]", Style::default().fg(Color::Cyan))),
        WizardRow::ReloadSchema => Line::from(Span::styled(
            format!("[ Retry schema load ] {}", schema.error.clone().unwrap_or_default()),
            error_style(),
        )),
        WizardRow::Filter => {
            let value = editing_value(edit, &EditTarget::Filter).unwrap_or_else(|| schema.filter().to_string());
            labelled("Filter".to_string(), value, None)
        }
        WizardRow::SelectAll => {
            let mark = if schema.all_selected() { "[x]" } else { "[ ]" };
            Line::from(format!("{} Select all ({})", mark, schema.summary()))
        }
        WizardRow::Table(id) => table_line(schema, id, edit),
        WizardRow::Column(id, column) => column_line(schema, id, column, edit),
    }
}

fn table_line(schema: &SchemaEditor, id: &str, edit: Option<&TextEdit>) -> Line<'static> {
    let Some(table) = schema.table(id) else {
        return Line::from("");
    };
    let mark = if schema.is_selected(id) { "[x]" } else { "[ ]" };
    let fold = if schema.is_expanded(id) { "▾" } else { "▸" };
    let mut spans = vec![
        Span::raw(format!("{} {} ", mark, fold)),
        Span::styled(table.name.clone(), Style::default().add_modifier(Modifier::BOLD)),
        Span::styled(format!(" ({} columns)", table.columns.len()), hint_style()),
    ];
    if schema.is_annotating(id) {
        spans.push(Span::styled("  annotating…", Style::default().fg(Color::Yellow)));
    }
    let description = editing_value(edit, &EditTarget::TableDescription(id.to_string()))
        .unwrap_or_else(|| table.description.clone());
    if !description.is_empty() {
        spans.push(Span::raw(format!("  {}", description)));
    }
    Line::from(spans)
}

fn column_line(schema: &SchemaEditor, id: &str, column: &str, edit: Option<&TextEdit>) -> Line<'static> {
    let Some(col) = schema.table(id).and_then(|t| t.columns.iter().find(|c| c.name == column)) else {
        return Line::from("");
    };
    let key = if col.is_primary_key { "PK" } else { "  " };
    let description = editing_value(edit, &EditTarget::ColumnDescription(id.to_string(), column.to_string()))
        .unwrap_or_else(|| col.description.clone());
    Line::from(vec![
        Span::raw(format!("      {} ", key)),
        Span::raw(format!("{:<20}", col.name)),
        Span::styled(format!("{:<12}", col.column_type), Style::default().fg(Color::Magenta)),
        Span::raw(description),
    ])
}
