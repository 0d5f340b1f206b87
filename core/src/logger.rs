//! Console logging for the looplab front-ends.

use std::io::Write;
use std::time::Instant;

use once_cell::sync::Lazy;

/// The instant the process initialized logging; log lines carry the offset
/// from it.
pub static INIT_INSTANT: Lazy<Instant> = Lazy::new(Instant::now);

/// Seconds since [`INIT_INSTANT`].
#[must_use]
#[inline]
pub fn uptime() -> u64 {
    INIT_INSTANT.elapsed().as_secs()
}

/// Initializes the logger.
///
/// `RUST_LOG` takes precedence when set; otherwise only looplab's own crates
/// log at `filter`.
///
/// # Panics
///
/// Must only be called once.
#[allow(clippy::missing_inline_in_public_items)]
pub fn init_logger(filter: log::LevelFilter) {
    let now = Lazy::force(&INIT_INSTANT);

    let env = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| format!("off,looplab={filter},looplab_analysis={filter},looplab_core={filter}"));

    env_logger::Builder::new()
        .format(move |buf, record| {
            let level = match record.level() {
                log::Level::Error => "E",
                log::Level::Warn => "W",
                log::Level::Info => "I",
                log::Level::Debug => "D",
                log::Level::Trace => "T",
            };
            writeln!(
                buf,
                "{level} [{:>8.3}] {:>24} | {}",
                now.elapsed().as_secs_f32(),
                record.module_path().unwrap_or("?"),
                record.args(),
            )
        })
        .parse_filters(&env)
        .init();

    log::info!("logger initialized at level {filter}");
}
