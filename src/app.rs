use color_eyre::Result;
use ratatui::{
    crossterm::event::{KeyEvent, KeyEventKind},
    DefaultTerminal,
};
use std::future::Future;
use tokio::sync::mpsc;

use crate::api::admin::UserSummary;
use crate::api::sops::{SopPage, SopQuery};
use crate::api::sources::SourceSummary;
use crate::api::ApiClient;
use crate::chat::model::SessionId;
use crate::chat::stream::{open_stream, StreamHandle, StreamItem, StreamMessage};
use crate::chat::{ChatAction, ChatStore, Outcome};
use crate::config::AppConfig;
use crate::event::{AppEvent, Event, EventHandler, WizardReply};
use crate::wizard::{EditSourceWizard, NewSourceWizard, WizardEffect};
use crate::{log_error, log_info, log_warn};

mod keys;
mod wizard_keys;

pub use wizard_keys::{wizard_rows, EditTarget, TextEdit, WizardRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Login,
    Home,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Sessions,
    Chat,
    Sources,
}

impl Focus {
    pub fn next(self) -> Focus {
        match self {
            Focus::Sessions => Focus::Chat,
            Focus::Chat => Focus::Sources,
            Focus::Sources => Focus::Sessions,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginField {
    #[default]
    Username,
    Password,
}

#[derive(Debug, Default)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    pub field: LoginField,
    pub error: Option<String>,
    pub busy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminTab {
    Sops,
    Users,
}

#[derive(Debug)]
pub struct AdminView {
    pub tab: AdminTab,
    pub users: Vec<UserSummary>,
    pub sops: SopPage,
    pub query: SopQuery,
    pub search: Option<String>,
    pub cursor: usize,
    pub error: Option<String>,
}

impl Default for AdminView {
    fn default() -> Self {
        Self {
            tab: AdminTab::Sops,
            users: Vec::new(),
            sops: SopPage::default(),
            query: SopQuery::default(),
            search: None,
            cursor: 0,
            error: None,
        }
    }
}

#[derive(Debug)]
pub enum Wizard {
    New(NewSourceWizard),
    Edit(EditSourceWizard),
}

/// An open wizard plus its cursor and any line being edited.
#[derive(Debug)]
pub struct WizardOverlay {
    pub seq: u64,
    pub wizard: Wizard,
    pub cursor: usize,
    pub edit: Option<TextEdit>,
    pub notice: Option<String>,
}

/// Application.
#[derive(Debug)]
pub struct App {
    /// Is the application running?
    pub running: bool,
    pub screen: Screen,
    pub focus: Focus,
    pub config: AppConfig,
    pub api: ApiClient,
    /// Event handler.
    pub events: EventHandler,

    pub chat: ChatStore,
    stream: Option<StreamHandle>,
    pub input: String,
    pub use_sop: bool,
    pub session_cursor: usize,
    pub chat_scroll: u16,

    pub sources: Vec<SourceSummary>,
    pub source_cursor: usize,

    pub wizard: Option<WizardOverlay>,
    wizard_seq: u64,

    pub login: LoginForm,
    pub admin: AdminView,
    /// One-line status shown in the footer.
    pub status: Option<String>,
}

impl App {
    pub fn new(config: AppConfig) -> Result<Self> {
        let events = EventHandler::new();
        let sender = events.sender();
        let api = ApiClient::new(&config)?.with_unauthorized_hook(move || {
            let _ = sender.send(Event::App(AppEvent::Unauthorized));
        });

        let mut app = Self {
            running: true,
            screen: Screen::Login,
            focus: Focus::Chat,
            use_sop: config.use_sop,
            config,
            api,
            events,
            chat: ChatStore::new(),
            stream: None,
            input: String::new(),
            session_cursor: 0,
            chat_scroll: 0,
            sources: Vec::new(),
            source_cursor: 0,
            wizard: None,
            wizard_seq: 0,
            login: LoginForm::default(),
            admin: AdminView::default(),
            status: None,
        };

        if app.api.is_authenticated() {
            app.enter_home();
        }
        Ok(app)
    }

    /// Run the application's main loop.
    pub async fn run(mut self, mut terminal: DefaultTerminal) -> Result<()> {
        let mut needs_redraw = true;

        while self.running {
            if needs_redraw {
                terminal.draw(|frame| frame.render_widget(&self, frame.area()))?;
                needs_redraw = false;
            }

            match self.events.next().await? {
                Event::Tick => {}
                Event::Crossterm(ratatui::crossterm::event::Event::Key(key_event))
                    if key_event.kind == KeyEventKind::Press =>
                {
                    self.handle_key_events(key_event)?;
                    needs_redraw = true;
                }
                Event::Crossterm(ratatui::crossterm::event::Event::Resize(_, _)) => needs_redraw = true,
                Event::Crossterm(_) => {}
                Event::App(app_event) => {
                    self.handle_app_event(app_event);
                    needs_redraw = true;
                }
            }
        }

        self.stream = None;
        Ok(())
    }

    /// Handles the key events and updates the state of [`App`].
    pub fn handle_key_events(&mut self, key_event: KeyEvent) -> Result<()> {
        if self.wizard.is_some() {
            self.handle_wizard_key(key_event);
            return Ok(());
        }
        match self.screen {
            Screen::Login => self.handle_login_key(key_event),
            Screen::Home => self.handle_home_key(key_event),
            Screen::Admin => self.handle_admin_key(key_event),
        }
        Ok(())
    }

    /// Set running to false to quit the application.
    pub fn quit(&mut self) {
        self.running = false;
    }

    /// Run `task` with a clone of the client and post its result event.
    fn spawn<F, Fut>(&self, task: F)
    where
        F: FnOnce(ApiClient) -> Fut,
        Fut: Future<Output = AppEvent> + Send + 'static,
    {
        let sender = self.events.sender();
        let fut = task(self.api.clone());
        tokio::spawn(async move {
            let _ = sender.send(Event::App(fut.await));
        });
    }

    pub fn handle_app_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Quit => self.quit(),
            AppEvent::Unauthorized if self.screen != Screen::Login => {
                self.back_to_login("Session expired, please log in again")
            }
            AppEvent::Unauthorized => {}

            AppEvent::LoggedIn(Ok(auth)) => {
                log_info!("Logged in as {}", auth.username.as_deref().unwrap_or("?"));
                self.login = LoginForm::default();
                self.enter_home();
            }
            AppEvent::LoggedIn(Err(e)) => {
                self.login.busy = false;
                self.login.error = Some(e);
            }

            AppEvent::SessionsLoaded(Ok(sessions)) => {
                self.apply(ChatAction::SessionsLoaded(sessions));
                self.clamp_cursors();
            }
            AppEvent::SessionLoaded { id, result: Ok(detail) } => {
                let source_ids = detail.source_ids.clone();
                self.apply(ChatAction::SessionSelected { id, messages: detail.messages(), source_ids });
                self.chat_scroll = 0;
            }
            AppEvent::SessionDeleted { id, result: Ok(outcome) } => {
                log_info!("Session {} removed ({:?})", id, outcome);
                self.apply(ChatAction::SessionDeleted(id));
                self.clamp_cursors();
            }
            AppEvent::SendFinished { turn, result: Ok(handle) } => {
                self.apply(ChatAction::SendAccepted { turn, handle })
            }
            AppEvent::SendFinished { turn, result: Err(error) } => {
                self.apply(ChatAction::SendFailed { turn, error })
            }
            AppEvent::Stream(message) => self.on_stream(message),

            AppEvent::SourcesLoaded(Ok(sources)) => {
                self.sources = sources;
                self.clamp_cursors();
            }
            AppEvent::SourceDeleted(Ok(id)) => {
                self.status = Some(format!("Source {} deleted", id));
                let remaining: Vec<i64> = self
                    .chat
                    .active_session()
                    .map(|s| s.data_source_ids.iter().copied().filter(|&s| s != id).collect())
                    .unwrap_or_default();
                self.apply(ChatAction::SourcesChanged(remaining));
                self.load_sources();
            }

            AppEvent::Wizard { seq, reply } => self.on_wizard_reply(seq, reply),

            AppEvent::UsersLoaded(Ok(users)) => self.admin.users = users,
            AppEvent::SopsLoaded(Ok(page)) => self.admin.sops = page,
            AppEvent::UsersLoaded(Err(e)) | AppEvent::SopsLoaded(Err(e)) => self.admin.error = Some(e),

            AppEvent::SessionsLoaded(Err(e))
            | AppEvent::SessionLoaded { result: Err(e), .. }
            | AppEvent::SessionDeleted { result: Err(e), .. }
            | AppEvent::SourcesLoaded(Err(e))
            | AppEvent::SourceDeleted(Err(e)) => {
                log_warn!("Request failed: {}", e);
                self.status = Some(e);
            }
        }
    }

    /// Dispatch to the chat store and carry out what it asks for.
    pub fn apply(&mut self, action: ChatAction) {
        match self.chat.dispatch(action) {
            Ok(outcome) => self.follow(outcome),
            Err(e) => self.status = Some(e.to_string()),
        }
    }

    fn follow(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Unchanged | Outcome::Changed => {}
            Outcome::LoadSession(id) => self.load_session(id),
            Outcome::Send(request) => self.spawn(move |api| async move {
                let result = api
                    .send_message(request.session_id, &request.text, request.use_sop, &request.source_ids)
                    .await
                    .map_err(|e| e.to_string());
                AppEvent::SendFinished { turn: request.turn, result }
            }),
            Outcome::OpenStream(chat_id) => {
                self.stream = Some(open_stream(
                    &self.api,
                    &chat_id,
                    &self.config.stream_endpoint,
                    self.config.stream_idle_timeout(),
                    self.events.sender(),
                    |message| Event::App(AppEvent::Stream(message)),
                ));
            }
            Outcome::TurnFinished => {
                self.stream = None;
                self.load_sessions();
            }
        }
    }

    fn on_stream(&mut self, message: StreamMessage) {
        let StreamMessage { chat_id, item } = message;
        let action = match item {
            StreamItem::Event(event) => ChatAction::StreamEventReceived { chat_id, event },
            StreamItem::Done => ChatAction::StreamDone { chat_id },
            StreamItem::Failed(error) => ChatAction::StreamFailed { chat_id, error },
            StreamItem::TimedOut => ChatAction::StreamTimedOut { chat_id },
        };
        self.apply(action);
    }

    pub fn login(&mut self) {
        if self.login.busy {
            return;
        }
        let username = self.login.username.trim().to_string();
        let password = self.login.password.clone();
        if username.is_empty() || password.is_empty() {
            self.login.error = Some("Username and password are required".to_string());
            return;
        }
        self.login.busy = true;
        self.login.error = None;
        self.spawn(move |api| async move {
            AppEvent::LoggedIn(api.login(&username, &password).await.map_err(|e| e.to_string()))
        });
    }

    fn enter_home(&mut self) {
        self.screen = Screen::Home;
        self.focus = Focus::Chat;
        self.load_sessions();
        self.load_sources();
    }

    /// Drop everything tied to the old login.
    fn back_to_login(&mut self, reason: &str) {
        log_warn!("Returning to login: {}", reason);
        self.stream = None;
        self.wizard = None;
        self.chat = ChatStore::new();
        self.sources.clear();
        self.admin = AdminView::default();
        self.input.clear();
        self.screen = Screen::Login;
        self.login = LoginForm { error: Some(reason.to_string()), ..LoginForm::default() };
    }

    pub fn logout(&mut self) {
        self.api.logout();
        self.back_to_login("Logged out");
    }

    pub fn load_sessions(&self) {
        self.spawn(|api| async move {
            AppEvent::SessionsLoaded(api.list_sessions().await.map_err(|e| e.to_string()))
        });
    }

    pub fn load_sources(&self) {
        self.spawn(|api| async move {
            AppEvent::SourcesLoaded(api.list_sources().await.map_err(|e| e.to_string()))
        });
    }

    fn load_session(&self, id: SessionId) {
        self.spawn(move |api| async move {
            AppEvent::SessionLoaded { id, result: api.get_session(id).await.map_err(|e| e.to_string()) }
        });
    }

    /// Open the session under the cursor. Switching drops any open stream.
    pub fn select_session(&mut self, index: usize) {
        let Some(session) = self.chat.sessions().get(index).cloned() else {
            return;
        };
        self.stream = None;
        if session.id.is_unsaved() {
            self.apply(ChatAction::SessionSelected {
                id: session.id,
                messages: Vec::new(),
                source_ids: session.data_source_ids,
            });
        } else {
            self.load_session(session.id);
        }
        self.focus = Focus::Chat;
    }

    pub fn new_session(&mut self) {
        self.stream = None;
        self.apply(ChatAction::SessionCreated);
        self.session_cursor = self
            .chat
            .active_id()
            .and_then(|id| self.chat.sessions().iter().position(|s| s.id == id))
            .unwrap_or(0);
        self.chat_scroll = 0;
        self.focus = Focus::Chat;
    }

    pub fn delete_session(&mut self, index: usize) {
        let Some(id) = self.chat.sessions().get(index).map(|s| s.id) else {
            return;
        };
        if self.chat.active_id() == Some(id) {
            self.stream = None;
        }
        self.spawn(move |api| async move {
            AppEvent::SessionDeleted { id, result: api.delete_session_checked(id).await.map_err(|e| e.to_string()) }
        });
    }

    pub fn submit_message(&mut self) {
        let text = self.input.clone();
        match self.chat.dispatch(ChatAction::MessageSubmitted { text, use_sop: self.use_sop }) {
            Ok(outcome) => {
                self.input.clear();
                self.chat_scroll = 0;
                self.follow(outcome);
            }
            Err(e) => self.status = Some(e.to_string()),
        }
    }

    /// Attach or detach the source under the cursor for the active session.
    pub fn toggle_source(&mut self, index: usize) {
        let Some(source_id) = self.sources.get(index).map(|s| s.id) else {
            return;
        };
        if self.chat.active_session().is_none() {
            self.apply(ChatAction::SessionCreated);
        }
        let mut ids = self.chat.active_session().map(|s| s.data_source_ids.clone()).unwrap_or_default();
        match ids.iter().position(|&id| id == source_id) {
            Some(pos) => {
                ids.remove(pos);
            }
            None => ids.push(source_id),
        }
        self.apply(ChatAction::SourcesChanged(ids));
    }

    pub fn delete_source(&mut self, index: usize) {
        let Some(source_id) = self.sources.get(index).map(|s| s.id) else {
            return;
        };
        self.spawn(move |api| async move {
            AppEvent::SourceDeleted(api.delete_source(source_id).await.map(|_| source_id).map_err(|e| e.to_string()))
        });
    }

    pub fn open_admin(&mut self) {
        self.screen = Screen::Admin;
        self.admin.error = None;
        self.load_sops();
        if self.api.auth().is_admin() {
            self.spawn(|api| async move {
                AppEvent::UsersLoaded(api.list_users().await.map_err(|e| e.to_string()))
            });
        }
    }

    pub fn load_sops(&self) {
        let query = self.admin.query.clone();
        self.spawn(move |api| async move {
            AppEvent::SopsLoaded(api.list_sops(&query).await.map_err(|e| e.to_string()))
        });
    }

    fn clamp_cursors(&mut self) {
        self.session_cursor = self.session_cursor.min(self.chat.sessions().len().saturating_sub(1));
        self.source_cursor = self.source_cursor.min(self.sources.len().saturating_sub(1));
    }

    pub fn open_new_source_wizard(&mut self) {
        let (wizard, effect) = NewSourceWizard::open(self.api.auth().is_admin(), &self.config.app_lang);
        self.open_wizard(Wizard::New(wizard), vec![effect]);
    }

    pub fn open_edit_source_wizard(&mut self, index: usize) {
        let Some(source_id) = self.sources.get(index).map(|s| s.id) else {
            return;
        };
        let (wizard, effects) = EditSourceWizard::open(source_id, &self.config.app_lang);
        self.open_wizard(Wizard::Edit(wizard), effects);
    }

    fn open_wizard(&mut self, wizard: Wizard, effects: Vec<WizardEffect>) {
        self.wizard_seq += 1;
        self.wizard = Some(WizardOverlay { seq: self.wizard_seq, wizard, cursor: 0, edit: None, notice: None });
        for effect in effects {
            self.run_wizard_effect(effect);
        }
    }

    /// Execute a wizard effect; its reply is tagged with the wizard that
    /// asked so replies for a closed wizard are dropped.
    pub fn run_wizard_effect(&self, effect: WizardEffect) {
        let seq = self.wizard_seq;
        let sender: mpsc::UnboundedSender<Event> = self.events.sender();
        let api = self.api.clone();
        tokio::spawn(async move {
            let reply = execute_effect(&api, effect).await;
            let _ = sender.send(Event::App(AppEvent::Wizard { seq, reply }));
        });
    }

    fn on_wizard_reply(&mut self, seq: u64, reply: WizardReply) {
        let Some(overlay) = self.wizard.as_mut().filter(|w| w.seq == seq) else {
            log_warn!("Dropping reply for closed wizard {}", seq);
            return;
        };
        overlay.notice = None;

        let mut close = false;
        match (&mut overlay.wizard, reply) {
            (Wizard::New(w), WizardReply::TypesLoaded(r)) => w.types_loaded(r),
            (Wizard::New(w), WizardReply::TypeDetails(r)) => w.type_details_loaded(r),
            (Wizard::New(w), WizardReply::Connectivity { test, result }) => w.connectivity_result(test, result),
            (Wizard::New(w), WizardReply::Schema { fetch, result }) => w.schema_loaded(fetch, result),
            (Wizard::New(w), WizardReply::Uploaded(r)) => w.file_uploaded(r),
            (Wizard::New(w), WizardReply::Annotation { ticket, result }) => {
                if let Err(e) = w.annotation_result(&ticket, result) {
                    overlay.notice = Some(e.to_string());
                }
            }
            (Wizard::New(w), WizardReply::Saved(r)) => close = w.save_result(r),

            (Wizard::Edit(w), WizardReply::Source(r)) => w.source_loaded(r),
            (Wizard::Edit(w), WizardReply::Schema { fetch, result }) => w.schema_loaded(fetch, result),
            (Wizard::Edit(w), WizardReply::Uploaded(r)) => w.file_uploaded(r),
            (Wizard::Edit(w), WizardReply::Annotation { ticket, result }) => {
                if let Err(e) = w.annotation_result(&ticket, result) {
                    overlay.notice = Some(e.to_string());
                }
            }
            (Wizard::Edit(w), WizardReply::Saved(r)) => close = w.save_result(r),

            (_, reply) => log_error!("Wizard reply does not fit the open wizard: {:?}", reply),
        }

        if close {
            self.wizard = None;
            self.load_sources();
        }
    }
}

async fn execute_effect(api: &ApiClient, effect: WizardEffect) -> WizardReply {
    fn text<T>(result: crate::error::Result<T>) -> Result<T, String> {
        result.map_err(|e| e.to_string())
    }

    match effect {
        WizardEffect::LoadSourceTypes => WizardReply::TypesLoaded(text(api.list_source_types().await)),
        WizardEffect::LoadTypeDetails(name) => {
            WizardReply::TypeDetails(text(api.source_type_details(&name).await))
        }
        WizardEffect::TestConnectivity { source_type, connection, test } => WizardReply::Connectivity {
            test,
            result: text(api.test_connectivity(&source_type, &connection).await),
        },
        WizardEffect::DiscoverSchema { source_type, connection, fetch } => WizardReply::Schema {
            fetch,
            result: text(api.discover_entities(&source_type, &connection).await),
        },
        WizardEffect::LoadSource(id) => WizardReply::Source(text(api.get_source(id).await)),
        WizardEffect::LoadSavedSchema { source_id, fetch } => WizardReply::Schema {
            fetch,
            result: text(api.saved_entities(source_id).await),
        },
        WizardEffect::UploadFile(path) => WizardReply::Uploaded(text(api.upload_file(&path).await)),
        WizardEffect::Annotate { ticket, request } => WizardReply::Annotation {
            ticket,
            result: text(api.annotate_table(&request).await),
        },
        WizardEffect::Create { source_type, payload } => {
            WizardReply::Saved(text(api.create_source(&source_type, &payload).await).map(|_| ()))
        }
        WizardEffect::Update { source_id, payload } => {
            WizardReply::Saved(text(api.update_source(source_id, &payload).await).map(|_| ()))
        }
    }
}
