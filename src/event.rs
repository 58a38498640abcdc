use color_eyre::eyre::OptionExt;
use futures::{FutureExt, StreamExt};
use ratatui::crossterm::event::Event as CrosstermEvent;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::api::admin::UserSummary;
use crate::api::conversations::{ChatHandle, DeleteOutcome, SessionDetail};
use crate::api::sops::SopPage;
use crate::api::sources::{Annotation, EntitySchema, FileObject, SourceDetail, SourceSummary, SourceTypeInfo};
use crate::api::AuthState;
use crate::chat::model::{Session, SessionId};
use crate::chat::stream::StreamMessage;
use crate::wizard::AnnotationTicket;

/// The frequency at which tick events are emitted.
const TICK_FPS: f64 = 30.0;

/// Representation of all possible events.
#[derive(Clone, Debug)]
pub enum Event {
    /// An event that is emitted on a regular schedule.
    Tick,
    /// Crossterm events.
    Crossterm(CrosstermEvent),
    /// Application events.
    App(AppEvent),
}

/// Failures cross the channel as display text.
pub type Reply<T> = Result<T, String>;

/// Application events. Everything a spawned request produces comes back
/// through here so the loop stays the only writer of [`crate::app::App`].
#[derive(Debug, Clone)]
pub enum AppEvent {
    Quit,
    /// Some call came back 401; the token is already gone.
    Unauthorized,

    LoggedIn(Reply<AuthState>),
    SessionsLoaded(Reply<Vec<Session>>),
    SessionLoaded { id: SessionId, result: Reply<SessionDetail> },
    SessionDeleted { id: SessionId, result: Reply<DeleteOutcome> },
    SendFinished { turn: u64, result: Reply<ChatHandle> },
    Stream(StreamMessage),

    SourcesLoaded(Reply<Vec<SourceSummary>>),
    SourceDeleted(Reply<i64>),

    /// Reply for the wizard opened as number `seq`.
    Wizard { seq: u64, reply: WizardReply },

    UsersLoaded(Reply<Vec<UserSummary>>),
    SopsLoaded(Reply<SopPage>),
}

#[derive(Debug, Clone)]
pub enum WizardReply {
    TypesLoaded(Reply<Vec<SourceTypeInfo>>),
    TypeDetails(Reply<SourceTypeInfo>),
    Connectivity { test: u64, result: Reply<()> },
    Schema { fetch: u64, result: Reply<Vec<EntitySchema>> },
    Source(Reply<SourceDetail>),
    Uploaded(Reply<FileObject>),
    Annotation { ticket: AnnotationTicket, result: Reply<HashMap<String, Annotation>> },
    Saved(Reply<()>),
}

/// Terminal event handler.
#[derive(Debug)]
pub struct EventHandler {
    /// Event sender channel.
    sender: mpsc::UnboundedSender<Event>,
    /// Event receiver channel.
    receiver: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
    /// Constructs a new instance of [`EventHandler`] and spawns the terminal reader task.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let actor = EventTask::new(sender.clone());
        tokio::spawn(async { actor.run().await });
        Self { sender, receiver }
    }

    /// A handle for tasks that report back later.
    pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
        self.sender.clone()
    }

    /// Receives an event from the sender.
    pub async fn next(&mut self) -> color_eyre::Result<Event> {
        self.receiver
            .recv()
            .await
            .ok_or_eyre("Failed to receive event")
    }

    /// Queue an app event to be sent to the event receiver.
    pub fn send(&mut self, app_event: AppEvent) {
        let _ = self.sender.send(Event::App(app_event));
    }
}

impl Default for EventHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads crossterm events and emits ticks on a fixed schedule.
struct EventTask {
    /// Event sender channel.
    sender: mpsc::UnboundedSender<Event>,
}

impl EventTask {
    fn new(sender: mpsc::UnboundedSender<Event>) -> Self {
        Self { sender }
    }

    async fn run(self) -> color_eyre::Result<()> {
        let tick_rate = Duration::from_secs_f64(1.0 / TICK_FPS);
        let mut reader = crossterm::event::EventStream::new();
        let mut tick = tokio::time::interval(tick_rate);
        loop {
            let tick_delay = tick.tick();
            let crossterm_event = reader.next().fuse();
            tokio::select! {
              _ = self.sender.closed() => {
                break;
              }
              _ = tick_delay => {
                self.send(Event::Tick);
              }
              Some(Ok(evt)) = crossterm_event => {
                self.send(Event::Crossterm(evt));
              }
            };
        }
        Ok(())
    }

    fn send(&self, event: Event) {
        let _ = self.sender.send(event);
    }
}
