use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Style, Stylize},
    text::{Line, Span},
    widgets::{Paragraph, Widget},
};

use super::centered_rect;
use super::style::{dim_unless_focused, error_style, hint_style, panel};
use crate::app::{App, LoginField};

pub fn render_login(app: &App, area: Rect, buf: &mut Buffer) {
    let area = centered_rect(50, 50, area);
    let form = &app.login;

    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(2),
            Constraint::Min(1),
        ])
        .split(area);

    Paragraph::new(format!("Luna · {}", app.api.base_url()))
        .alignment(Alignment::Center)
        .fg(Color::Green)
        .block(panel("Sign in", true))
        .render(layout[0], buf);

    let user_focused = form.field == LoginField::Username;
    Paragraph::new(form.username.as_str())
        .style(dim_unless_focused(user_focused, Style::default()))
        .block(panel("Username", user_focused))
        .render(layout[1], buf);

    Paragraph::new("•".repeat(form.password.chars().count()))
        .style(dim_unless_focused(!user_focused, Style::default()))
        .block(panel("Password", !user_focused))
        .render(layout[2], buf);

    let status = match (&form.error, form.busy) {
        (_, true) => Line::from("Signing in…"),
        (Some(error), false) => Line::from(Span::styled(error.as_str(), error_style())),
        (None, false) => Line::from(""),
    };
    Paragraph::new(status).alignment(Alignment::Center).render(layout[3], buf);

    Paragraph::new("Tab: switch field • Enter: sign in • Esc: quit")
        .style(hint_style())
        .alignment(Alignment::Center)
        .render(layout[4], buf);
}
