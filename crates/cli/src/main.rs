//! Binary entry point: logging, trace id, error-to-exit-code boundary.

use std::process;

use mixer::{App, AppOptions};
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() {
    let debug = std::env::var("DEBUG").map(|v| v == "true").unwrap_or(false);
    let default_filter = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let trace_id = uuid::Uuid::new_v4();
    let result = App::new(AppOptions::mixer())
        .and_then(|app| app.run(&std::env::args().collect::<Vec<_>>()));
    if let Err(e) = result {
        if debug {
            error!("{e:?} [trace: {trace_id}]");
        } else {
            error!("{e:#} [trace: {trace_id}]");
        }
        process::exit(errs::exit_code(&e));
    }
}
