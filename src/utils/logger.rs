use env_logger::{Builder, Env, Target};
use std::io::Write;

/// Installs the global logger at `info`. `RUST_LOG` wins when set.
pub fn setup_logging() {
    setup_logging_at("info");
}

/// Same as [`setup_logging`] with a different fallback filter, e.g. `"debug"`.
pub fn setup_logging_at(default_filter: &str) {
    let mut builder = Builder::from_env(Env::default().default_filter_or(default_filter));

    builder
        .target(Target::Stdout)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} {}: {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
