//! The `hollow` binary: one executable, three modes.
//!
//! ```text
//! hollow --server --world-name alpha -s 42
//! hollow --client --host play.example --player-name rowan
//! hollow -n 600 -t 10000        # standalone, bounded run
//! ```
//!
//! Exit codes: 0 success, 1 invalid arguments or configuration,
//! 2 runtime error.

use std::path::Path;

use hollow::runtime::{parse_args, Config};
use hollow::settings::Settings;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings = match Settings::load(Path::new("settings.toml")) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("{err}");
            return 1;
        }
    };

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match parse_args(Config::default().with_settings(&settings), &args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return 1;
        }
    };

    match hollow::app::run(config) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{err}");
            err.exit_code()
        }
    }
}
