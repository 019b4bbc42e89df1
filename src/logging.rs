//! Process-wide logger setup.

use std::io::Write;

use env_logger::{Builder, Env};

/// Filter used when `RUST_LOG` is not set.
pub fn default_filter(debug: bool) -> &'static str {
    if debug { "debug" } else { "info" }
}

/// Installs the `env_logger` backend. Call once, early in `main`.
///
/// Lines look like `2026-10-19T08:15:02Z ERROR     Connection error: ...`.
pub fn init(debug: bool) {
    Builder::from_env(Env::default().default_filter_or(default_filter(debug)))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<9} {}",
                buf.timestamp(),
                record.level(),
                record.args()
            )
        })
        .init();
}
