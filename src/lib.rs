pub mod api;
pub mod app;
pub mod chat;
pub mod config;
pub mod error;
pub mod event;
pub mod ui;
pub mod util;
pub mod wizard;

pub use api::ApiClient;
pub use config::AppConfig;
pub use error::{ConsoleError, Result};
