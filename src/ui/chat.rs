use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Paragraph, Widget, Wrap},
};
use serde_json::Value;

use super::style::{dim_unless_focused, error_style, hint_style, panel};
use crate::app::{App, Focus};
use crate::chat::model::{value_as_text, AgentKind, AgentResult, AssistantMessage, Message, UserMessage};

/// Rows of a data table drawn inline before truncating.
const MAX_TABLE_ROWS: usize = 20;
/// Width cap for a single table cell.
const MAX_CELL_WIDTH: usize = 24;

pub fn render_chat(app: &App, area: Rect, buf: &mut Buffer) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(5), Constraint::Length(3)])
        .split(area);

    let focused = app.focus == Focus::Chat;
    let title = app
        .chat
        .active_session()
        .map(|s| s.title())
        .unwrap_or_else(|| "Luna".to_string());

    let text = if app.chat.show_welcome && app.chat.transcript().is_empty() {
        welcome_text()
    } else {
        transcript_text(app)
    };

    // Scroll is counted from the bottom so new output stays in view.
    let inner_width = layout[0].width.saturating_sub(2).max(1) as usize;
    let inner_height = layout[0].height.saturating_sub(2);
    let total = wrapped_height(&text, inner_width);
    let max_offset = total.saturating_sub(inner_height);
    let offset = max_offset.saturating_sub(app.chat_scroll);

    Paragraph::new(text)
        .block(panel(&title, focused))
        .wrap(Wrap { trim: false })
        .scroll((offset, 0))
        .render(layout[0], buf);

    render_input(app, layout[1], buf);
}

fn render_input(app: &App, area: Rect, buf: &mut Buffer) {
    let focused = app.focus == Focus::Chat;
    let busy = app.chat.phase().in_flight();
    let title = if busy { "Waiting for reply…" } else { "Message (Enter to send)" };
    let cursor = if focused && !busy { "█" } else { "" };

    Paragraph::new(format!("{}{}", app.input, cursor))
        .style(dim_unless_focused(focused, Style::default()))
        .block(panel(title, focused))
        .render(area, buf);
}

fn welcome_text() -> Text<'static> {
    Text::from(vec![
        Line::from(Span::styled(
            "Welcome to Luna",
            Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from("Ask a question about your data in plain language."),
        Line::from("• Attach data sources from the panel on the right"),
        Line::from("• Toggle SOP guidance with Ctrl+O"),
        Line::from("• Start a fresh conversation with n in the session list"),
    ])
}

fn transcript_text(app: &App) -> Text<'static> {
    let mut lines = Vec::new();

    if app.chat.is_loading {
        lines.push(Line::from(Span::styled("Loading conversation…", hint_style())));
    }

    for message in app.chat.transcript() {
        match message {
            Message::User(user) => push_user(user, &mut lines),
            Message::Assistant(assistant) => {
                push_assistant(assistant, app.chat.turn_failed(&assistant.message_id), &mut lines)
            }
        }
        lines.push(Line::from(""));
    }

    if app.chat.is_thinking {
        let progress = app.chat.progress.clone().unwrap_or_else(|| "Thinking…".to_string());
        lines.push(Line::from(Span::styled(
            format!("⋯ {}", progress),
            Style::default().fg(Color::Yellow).add_modifier(Modifier::ITALIC),
        )));
    }

    if let Some(banner) = &app.chat.banner {
        lines.push(Line::from(Span::styled(format!("⚠ {}", banner), error_style())));
    }

    Text::from(lines)
}

fn push_user(user: &UserMessage, lines: &mut Vec<Line<'static>>) {
    let style = Style::default().fg(Color::Cyan);
    lines.push(Line::from(Span::styled("You", style.add_modifier(Modifier::BOLD))));
    for markdown in &user.markdowns {
        push_markdown(markdown, Style::default().fg(Color::White), lines);
    }
    if let Some(url) = &user.image_url {
        lines.push(Line::from(Span::styled(format!("  [image] {}", url), hint_style())));
    }
}

fn push_assistant(assistant: &AssistantMessage, failed: bool, lines: &mut Vec<Line<'static>>) {
    let mut header = vec![Span::styled(
        "Luna",
        Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
    )];
    if failed {
        header.push(Span::raw(" "));
        header.push(Span::styled("[failed]", error_style()));
    }
    lines.push(Line::from(header));

    for agent in &assistant.agents {
        push_agent(agent, lines);
    }
}

fn agent_label(kind: &AgentKind) -> String {
    match kind {
        AgentKind::Sql => "SQL".to_string(),
        AgentKind::Chat => "Chat".to_string(),
        AgentKind::Plotly => "Plot".to_string(),
        AgentKind::PythonData => "Python".to_string(),
        AgentKind::Other(role) => role.clone(),
    }
}

fn push_agent(agent: &AgentResult, lines: &mut Vec<Line<'static>>) {
    lines.push(Line::from(Span::styled(
        format!("  ▸ {}", agent_label(&agent.kind)),
        Style::default().fg(Color::Magenta),
    )));

    if agent.is_error {
        let message = if agent.error_message.is_empty() { "Agent failed" } else { agent.error_message.as_str() };
        lines.push(Line::from(vec![
            Span::raw("    "),
            Span::styled("error", Style::default().fg(Color::Black).bg(Color::Red)),
            Span::raw(" "),
            Span::styled(message.to_string(), Style::default().fg(Color::Red)),
        ]));
    }

    if let Some(query) = agent.executed_query() {
        lines.push(Line::from(Span::styled("    query:", hint_style())));
        for line in query.lines() {
            lines.push(Line::from(Span::styled(
                format!("      {}", line),
                Style::default().fg(Color::LightBlue),
            )));
        }
    }

    for markdown in &agent.markdowns {
        push_markdown(markdown, Style::default().fg(Color::White), lines);
    }

    if !agent.jsons.is_empty() {
        push_table(&agent.jsons, lines);
    }

    if let Some(markup) = agent.plot_markup() {
        lines.push(Line::from(Span::styled(
            format!("    [plot: {} bytes of markup, not drawn in the terminal]", markup.len()),
            hint_style(),
        )));
    }
}

/// Markdown drawn as plain text with headings and bullets picked out.
fn push_markdown(markdown: &str, base: Style, lines: &mut Vec<Line<'static>>) {
    for raw in markdown.lines() {
        let trimmed = raw.trim_start();
        let line = if let Some(heading) = trimmed.strip_prefix('#') {
            Line::from(Span::styled(
                format!("    {}", heading.trim_start_matches('#').trim()),
                base.add_modifier(Modifier::BOLD),
            ))
        } else if let Some(item) = trimmed.strip_prefix("- ").or_else(|| trimmed.strip_prefix("* ")) {
            Line::from(Span::styled(format!("    • {}", item), base))
        } else {
            Line::from(Span::styled(format!("    {}", raw), base))
        };
        lines.push(line);
    }
}

fn cell(value: Option<&Value>) -> String {
    let text = value.map(value_as_text).unwrap_or_default();
    if text.chars().count() > MAX_CELL_WIDTH {
        let cut: String = text.chars().take(MAX_CELL_WIDTH - 1).collect();
        format!("{}…", cut)
    } else {
        text
    }
}

fn push_table(records: &[Value], lines: &mut Vec<Line<'static>>) {
    let columns: Vec<String> = match records.first() {
        Some(Value::Object(first)) => first.keys().cloned().collect(),
        _ => Vec::new(),
    };
    if columns.is_empty() {
        for record in records.iter().take(MAX_TABLE_ROWS) {
            lines.push(Line::from(format!("    {}", value_as_text(record))));
        }
        return;
    }

    let shown = &records[..records.len().min(MAX_TABLE_ROWS)];
    let rows: Vec<Vec<String>> = shown
        .iter()
        .map(|r| columns.iter().map(|c| cell(r.get(c))).collect())
        .collect();
    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, name)| {
            rows.iter()
                .map(|r| r[i].chars().count())
                .chain(std::iter::once(name.chars().count().min(MAX_CELL_WIDTH)))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let format_row = |cells: Vec<String>| -> String {
        let padded: Vec<String> = cells
            .into_iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<width$}", c, width = w))
            .collect();
        format!("    {}", padded.join(" │ "))
    };

    let header: Vec<String> = columns.iter().map(|c| cell(Some(&Value::String(c.clone())))).collect();
    lines.push(Line::from(Span::styled(
        format_row(header),
        Style::default().add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
    )));
    for row in rows {
        lines.push(Line::from(format_row(row)));
    }
    if records.len() > MAX_TABLE_ROWS {
        lines.push(Line::from(Span::styled(
            format!("    … {} more rows", records.len() - MAX_TABLE_ROWS),
            hint_style(),
        )));
    }
}

/// Height of `text` once wrapped to `width` columns.
pub fn wrapped_height(text: &Text, width: usize) -> u16 {
    let rows: usize = text
        .lines
        .iter()
        .map(|line| line.width().max(1).div_ceil(width))
        .sum();
    u16::try_from(rows).unwrap_or(u16::MAX)
}
