use ratatui::crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use super::{AdminTab, App, Focus, LoginField};
use crate::event::AppEvent;

fn is_ctrl(key_event: &KeyEvent, ch: char) -> bool {
    key_event.modifiers.contains(KeyModifiers::CONTROL) && key_event.code == KeyCode::Char(ch)
}

impl App {
    pub(super) fn handle_login_key(&mut self, key_event: KeyEvent) {
        if is_ctrl(&key_event, 'c') {
            self.events.send(AppEvent::Quit);
            return;
        }
        let form = &mut self.login;
        let field = match form.field {
            LoginField::Username => &mut form.username,
            LoginField::Password => &mut form.password,
        };
        match key_event.code {
            KeyCode::Esc => self.events.send(AppEvent::Quit),
            KeyCode::Tab | KeyCode::BackTab | KeyCode::Up | KeyCode::Down => {
                form.field = match form.field {
                    LoginField::Username => LoginField::Password,
                    LoginField::Password => LoginField::Username,
                };
            }
            KeyCode::Enter if form.field == LoginField::Username => form.field = LoginField::Password,
            KeyCode::Enter => self.login(),
            KeyCode::Backspace => {
                field.pop();
            }
            KeyCode::Char(ch) => field.push(ch),
            _ => {}
        }
    }

    pub(super) fn handle_home_key(&mut self, key_event: KeyEvent) {
        if is_ctrl(&key_event, 'c') {
            self.events.send(AppEvent::Quit);
            return;
        }
        if is_ctrl(&key_event, 'o') {
            self.use_sop = !self.use_sop;
            return;
        }
        if key_event.code == KeyCode::Tab {
            self.focus = self.focus.next();
            return;
        }

        match self.focus {
            Focus::Chat => self.handle_chat_key(key_event),
            Focus::Sessions => self.handle_sessions_key(key_event),
            Focus::Sources => self.handle_sources_key(key_event),
        }
    }

    fn handle_chat_key(&mut self, key_event: KeyEvent) {
        match key_event.code {
            KeyCode::Esc => self.focus = Focus::Sessions,
            KeyCode::Enter => self.submit_message(),
            KeyCode::Backspace => {
                self.input.pop();
            }
            KeyCode::Up => self.chat_scroll = self.chat_scroll.saturating_add(1),
            KeyCode::Down => self.chat_scroll = self.chat_scroll.saturating_sub(1),
            KeyCode::PageUp => self.chat_scroll = self.chat_scroll.saturating_add(10),
            KeyCode::PageDown => self.chat_scroll = self.chat_scroll.saturating_sub(10),
            KeyCode::Char(ch) => self.input.push(ch),
            _ => {}
        }
    }

    fn handle_sessions_key(&mut self, key_event: KeyEvent) {
        let count = self.chat.sessions().len();
        match key_event.code {
            KeyCode::Char('q') | KeyCode::Esc => self.events.send(AppEvent::Quit),
            KeyCode::Up | KeyCode::Char('k') => self.session_cursor = self.session_cursor.saturating_sub(1),
            KeyCode::Down | KeyCode::Char('j') => {
                if self.session_cursor + 1 < count {
                    self.session_cursor += 1;
                }
            }
            KeyCode::Enter => self.select_session(self.session_cursor),
            KeyCode::Char('n') => self.new_session(),
            KeyCode::Char('d') => self.delete_session(self.session_cursor),
            KeyCode::Char('r') => self.load_sessions(),
            KeyCode::Char('a') => self.open_admin(),
            KeyCode::Char('L') => self.logout(),
            _ => {}
        }
    }

    fn handle_sources_key(&mut self, key_event: KeyEvent) {
        let count = self.sources.len();
        match key_event.code {
            KeyCode::Esc => self.focus = Focus::Chat,
            KeyCode::Up | KeyCode::Char('k') => self.source_cursor = self.source_cursor.saturating_sub(1),
            KeyCode::Down | KeyCode::Char('j') => {
                if self.source_cursor + 1 < count {
                    self.source_cursor += 1;
                }
            }
            KeyCode::Char(' ') | KeyCode::Enter => self.toggle_source(self.source_cursor),
            KeyCode::Char('n') => self.open_new_source_wizard(),
            KeyCode::Char('e') => self.open_edit_source_wizard(self.source_cursor),
            KeyCode::Char('x') => self.delete_source(self.source_cursor),
            KeyCode::Char('r') => self.load_sources(),
            _ => {}
        }
    }

    pub(super) fn handle_admin_key(&mut self, key_event: KeyEvent) {
        if is_ctrl(&key_event, 'c') {
            self.events.send(AppEvent::Quit);
            return;
        }

        if let Some(search) = self.admin.search.as_mut() {
            match key_event.code {
                KeyCode::Esc => self.admin.search = None,
                KeyCode::Enter => {
                    self.admin.query.search_condition = search.trim().to_string();
                    self.admin.query.page_num = 1;
                    self.admin.search = None;
                    self.load_sops();
                }
                KeyCode::Backspace => {
                    search.pop();
                }
                KeyCode::Char(ch) => search.push(ch),
                _ => {}
            }
            return;
        }

        let rows = match self.admin.tab {
            AdminTab::Sops => self.admin.sops.items.len(),
            AdminTab::Users => self.admin.users.len(),
        };
        match key_event.code {
            KeyCode::Esc | KeyCode::Char('q') => self.screen = super::Screen::Home,
            KeyCode::Tab => {
                self.admin.tab = match self.admin.tab {
                    AdminTab::Sops if self.api.auth().is_admin() => AdminTab::Users,
                    _ => AdminTab::Sops,
                };
                self.admin.cursor = 0;
            }
            KeyCode::Up | KeyCode::Char('k') => self.admin.cursor = self.admin.cursor.saturating_sub(1),
            KeyCode::Down | KeyCode::Char('j') => {
                if self.admin.cursor + 1 < rows {
                    self.admin.cursor += 1;
                }
            }
            KeyCode::Char('/') if self.admin.tab == AdminTab::Sops => {
                self.admin.search = Some(self.admin.query.search_condition.clone());
            }
            KeyCode::Right if self.admin.tab == AdminTab::Sops => {
                self.admin.query = self.admin.query.next_page();
                self.admin.cursor = 0;
                self.load_sops();
            }
            KeyCode::Left if self.admin.tab == AdminTab::Sops => {
                self.admin.query = self.admin.query.prev_page();
                self.admin.cursor = 0;
                self.load_sops();
            }
            KeyCode::Char('r') => self.open_admin(),
            _ => {}
        }
    }
}
