//! Structured logging setup.
//!
//! Initialise `tracing-subscriber` from `RUST_LOG` (default `"info"`).  Set
//! `TWINLINK_LOG_FORMAT=json` to emit newline-delimited JSON logs suitable
//! for log aggregators; the CLI's user-facing output still uses `println!`.

pub fn init_tracing() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    if std::env::var("TWINLINK_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .compact()
            .init();
    }
}
