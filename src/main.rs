use std::fs::{create_dir_all, File};
use std::sync::Mutex;

use luna_console::app::App;
use luna_console::config::AppConfig;
use luna_console::util;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let config = AppConfig::load()?;
    config.validate()?;

    // The terminal belongs to ratatui, so both log streams go to files.
    create_dir_all(&config.log_dir)?;
    util::log::init(&config.log_dir);
    let trace_file = File::create(config.log_dir.join("trace.log"))?;
    tracing_subscriber::fmt()
        .with_writer(Mutex::new(trace_file))
        .with_ansi(false)
        .init();

    let app = App::new(config)?;
    let terminal = ratatui::init();
    let result = app.run(terminal).await;
    ratatui::restore();
    result
}
