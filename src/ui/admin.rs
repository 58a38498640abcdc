use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    text::{Line, Span},
    widgets::{List, ListItem, Paragraph, Tabs, Widget},
};

use super::style::{cursor_style, error_style, hint_style, panel};
use crate::app::{AdminTab, App};

pub fn render_admin(app: &App, area: Rect, buf: &mut Buffer) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(area);

    let is_admin = app.api.auth().is_admin();
    let mut titles = vec!["SOPs"];
    if is_admin {
        titles.push("Users");
    }
    let selected = match app.admin.tab {
        AdminTab::Sops => 0,
        AdminTab::Users => 1,
    };
    Tabs::new(titles)
        .select(selected)
        .highlight_style(Style::default().fg(Color::Cyan))
        .block(panel("Administration", true))
        .render(layout[0], buf);

    match app.admin.tab {
        AdminTab::Sops => render_sops(app, layout[1], layout[2], buf),
        AdminTab::Users => render_users(app, layout[1].union(layout[2]), buf),
    }

    let hint = if app.admin.search.is_some() {
        "Enter search • Esc cancel"
    } else {
        "Tab switch • / search • ←/→ page • r refresh • Esc back"
    };
    Paragraph::new(hint).style(hint_style()).render(layout[3], buf);
}

fn render_sops(app: &App, search_area: Rect, list_area: Rect, buf: &mut Buffer) {
    let admin = &app.admin;
    let searching = admin.search.is_some();
    let search_text = match &admin.search {
        Some(buffer) => format!("{}█", buffer),
        None if admin.query.search_condition.is_empty() => "press / to search".to_string(),
        None => admin.query.search_condition.clone(),
    };
    Paragraph::new(search_text).block(panel("Search", searching)).render(search_area, buf);

    let mut items: Vec<ListItem> = admin
        .sops
        .items
        .iter()
        .enumerate()
        .map(|(i, sop)| {
            ListItem::new(Line::from(vec![
                Span::styled(format!("#{:<5} ", sop.id), hint_style()),
                Span::raw(sop.display_name()),
            ]))
            .style(cursor_style(i == admin.cursor))
        })
        .collect();
    if let Some(error) = &admin.error {
        items.push(ListItem::new(Span::styled(error.clone(), error_style())));
    }

    let page = match admin.sops.total {
        Some(total) => {
            let pages = total.div_ceil(admin.query.page_size.max(1) as u64).max(1);
            format!("SOPs · page {}/{} · {} total", admin.query.page_num, pages, total)
        }
        None => format!("SOPs · page {}", admin.query.page_num),
    };
    List::new(items).block(panel(&page, !searching)).render(list_area, buf);
}

fn render_users(app: &App, area: Rect, buf: &mut Buffer) {
    let admin = &app.admin;
    let mut items: Vec<ListItem> = admin
        .users
        .iter()
        .enumerate()
        .map(|(i, user)| {
            let active = user.is_active.unwrap_or(true);
            let mut spans = vec![
                Span::raw(format!("{:<24}", user.username)),
                Span::styled(format!("{:<10}", user.role.as_deref().unwrap_or("user")), Style::default().fg(Color::Magenta)),
            ];
            if !active {
                spans.push(Span::styled("inactive", hint_style()));
            }
            ListItem::new(Line::from(spans)).style(cursor_style(i == admin.cursor))
        })
        .collect();
    if let Some(error) = &admin.error {
        items.push(ListItem::new(Span::styled(error.clone(), error_style())));
    }

    let title = format!("Users ({})", admin.users.len());
    List::new(items).block(panel(&title, true)).render(area, buf);
}
