use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{List, ListItem, Paragraph, Widget},
};

use super::chat::render_chat;
use super::style::{cursor_style, hint_style, panel};
use crate::app::{App, Focus};

pub fn render_home(app: &App, area: Rect, buf: &mut Buffer) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(5), Constraint::Length(1)])
        .split(area);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(22),
            Constraint::Percentage(56),
            Constraint::Percentage(22),
        ])
        .split(rows[0]);

    render_sessions(app, columns[0], buf);
    render_chat(app, columns[1], buf);
    render_sources(app, columns[2], buf);
    render_footer(app, rows[1], buf);
}

fn render_sessions(app: &App, area: Rect, buf: &mut Buffer) {
    let focused = app.focus == Focus::Sessions;
    let active = app.chat.active_id();

    let items: Vec<ListItem> = app
        .chat
        .sessions()
        .iter()
        .enumerate()
        .map(|(i, session)| {
            let marker = if Some(session.id) == active { "● " } else { "  " };
            let style = if focused && i == app.session_cursor {
                cursor_style(true)
            } else if Some(session.id) == active {
                Style::default().fg(Color::Green)
            } else {
                Style::default()
            };
            ListItem::new(Line::from(vec![
                Span::styled(marker, style),
                Span::styled(session.title(), style),
            ]))
        })
        .collect();

    let title = format!("Conversations ({})", app.chat.sessions().len());
    List::new(items).block(panel(&title, focused)).render(area, buf);
}

fn render_sources(app: &App, area: Rect, buf: &mut Buffer) {
    let focused = app.focus == Focus::Sources;
    let attached = app
        .chat
        .active_session()
        .map(|s| s.data_source_ids.clone())
        .unwrap_or_default();

    let items: Vec<ListItem> = app
        .sources
        .iter()
        .enumerate()
        .map(|(i, source)| {
            let checked = attached.contains(&source.id);
            let style = if focused && i == app.source_cursor {
                cursor_style(true)
            } else if checked {
                Style::default().fg(Color::Green)
            } else {
                Style::default()
            };
            let mut spans = vec![
                Span::styled(if checked { "[x] " } else { "[ ] " }, style),
                Span::styled(source.display_name(), style),
            ];
            if !source.is_private {
                spans.push(Span::styled(" (shared)", hint_style()));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();

    let title = format!("Sources ({} attached)", attached.len());
    List::new(items).block(panel(&title, focused)).render(area, buf);
}

fn render_footer(app: &App, area: Rect, buf: &mut Buffer) {
    let sop = if app.use_sop {
        Span::styled(" SOP on ", Style::default().fg(Color::Black).bg(Color::Green))
    } else {
        Span::styled(" SOP off ", Style::default().fg(Color::Black).bg(Color::DarkGray))
    };

    let keys = match app.focus {
        Focus::Sessions => "j/k move • Enter open • n new • d delete • a admin • L logout • q quit",
        Focus::Chat => "Enter send • ↑/↓ scroll • Esc sessions",
        Focus::Sources => "Space attach • n new • e edit • x delete • r refresh",
    };

    let mut spans = vec![sop, Span::raw(" ")];
    if let Some(status) = &app.status {
        spans.push(Span::styled(status.clone(), Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)));
        spans.push(Span::raw("  "));
    }
    spans.push(Span::styled(format!("Tab focus • {}", keys), hint_style()));

    Paragraph::new(Line::from(spans)).render(area, buf);
}
