pub mod commands;
pub mod config;
pub mod terminal;

/// Initialise `env_logger`, logging at `info` unless `RUST_LOG` says otherwise.
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    env_logger::init();
}
