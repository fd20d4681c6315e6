//! hesab - maintain the Hesab client cache and error queue from a terminal
//!
//! Runs one `cache` or `errors` command against the configured store and
//! error collector, printing the result as JSON.

use clap::Parser;
use std::io;

use hesab::app::App;
use hesab::cli::Cli;
use hesab::reporting::GlobalErrorHandler;
use hesab::{config, telemetry};

/// Triggers shutdown on Ctrl-C so pending retries are queued instead of awaited
fn setup_interrupt_handler(app: &App) {
    let shutdown = app.shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling in-flight deliveries");
            shutdown.trigger();
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let settings = config::load(&cli)?;
    telemetry::init(&settings.logging)?;

    let app = App::from_settings(settings)?;
    setup_interrupt_handler(&app);

    // Panics from here on are reported like any other client error
    let global_errors = GlobalErrorHandler::install(app.logger.clone());

    let mut stdout = io::stdout().lock();
    let result = app.run(cli.command, &mut stdout).await;

    global_errors.shutdown().await;
    result?;
    Ok(())
}
