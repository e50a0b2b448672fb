//! Stderr logger for the pipeline binaries.
//!
//! Lines look like `[  1.204s  INFO render] unit 3/12: needle_0`: elapsed
//! time, level, and the pipeline stage (the `surgsynth_*` crate that logged).
//! Records from other crates (mesh loader, image codecs) are held to `warn`
//! unless the level is `trace`.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

const CRATE_PREFIX: &str = "surgsynth";

struct StageLogger {
    level: LevelFilter,
    started: Instant,
}

impl Log for StageLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        admits(self.level, metadata)
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let elapsed = self.started.elapsed().as_secs_f64();
        let mut stderr = std::io::stderr();
        let _ = writeln!(
            stderr,
            "[{:7.3}s {:>5} {}] {}",
            elapsed,
            record.level(),
            stage(record.target()),
            record.args()
        );
    }

    fn flush(&self) {}
}

fn is_own(target: &str) -> bool {
    target.starts_with(CRATE_PREFIX)
}

fn admits(level: LevelFilter, metadata: &Metadata) -> bool {
    let ceiling = if is_own(metadata.target()) || level == LevelFilter::Trace {
        level
    } else {
        level.min(LevelFilter::Warn)
    };
    metadata.level() <= ceiling
}

/// `surgsynth_render::driver` -> `render`, `surgsynth::bin` -> `surgsynth`.
/// Foreign targets are kept whole.
fn stage(target: &str) -> &str {
    if !is_own(target) {
        return target;
    }
    let krate = target.split("::").next().unwrap_or(target);
    krate
        .strip_prefix("surgsynth_")
        .filter(|s| !s.is_empty())
        .unwrap_or(krate)
}

static LOGGER: OnceLock<StageLogger> = OnceLock::new();

/// Install the stderr logger with the provided level filter.
///
/// Calling this more than once is a no-op after the first successful
/// initialization.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let logger = LOGGER.get_or_init(|| StageLogger {
            level,
            started: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(level);
    }
    Ok(())
}

/// Parse a level name (`error`, `warn`, `info`, `debug`, `trace`, `off`),
/// plus the `quiet` and `verbose` shorthands of the command line.
pub fn parse_level(name: &str) -> Option<LevelFilter> {
    match name.to_ascii_lowercase().as_str() {
        "quiet" => Some(LevelFilter::Off),
        "verbose" => Some(LevelFilter::Debug),
        other => other.parse().ok(),
    }
}

/// Pipeline crates at `info`, everything else at `warn`.
#[cfg(feature = "tracing")]
const DEFAULT_DIRECTIVES: &str = "warn,surgsynth=info,surgsynth_core=info,surgsynth_annotate=info,\
surgsynth_render=info,surgsynth_composite=info,surgsynth_overlay=info";

/// Install a `tracing` subscriber instead of the stderr logger. `RUST_LOG`
/// overrides the default directives.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));
    if json {
        let _ = fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .json()
            .flatten_event(true)
            .finish()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use log::Level;

    fn meta(level: Level, target: &str) -> Metadata<'_> {
        Metadata::builder().level(level).target(target).build()
    }

    #[test]
    fn parses_level_names_case_insensitively() {
        assert_eq!(parse_level("debug"), Some(LevelFilter::Debug));
        assert_eq!(parse_level("WARN"), Some(LevelFilter::Warn));
        assert_eq!(parse_level("loud"), None);
        assert_eq!(parse_level("quiet"), Some(LevelFilter::Off));
        assert_eq!(parse_level("Verbose"), Some(LevelFilter::Debug));
    }

    #[test]
    fn stage_is_the_crate_without_prefix() {
        assert_eq!(stage("surgsynth_render::driver"), "render");
        assert_eq!(stage("surgsynth_overlay"), "overlay");
        assert_eq!(stage("surgsynth::bin"), "surgsynth");
        assert_eq!(stage("tobj"), "tobj");
    }

    #[test]
    fn foreign_records_are_held_to_warn_below_trace() {
        let debug = LevelFilter::Debug;
        assert!(admits(debug, &meta(Level::Debug, "surgsynth_composite::blend")));
        assert!(!admits(debug, &meta(Level::Info, "tobj")));
        assert!(admits(debug, &meta(Level::Warn, "tobj")));
        assert!(admits(LevelFilter::Trace, &meta(Level::Debug, "png::decoder")));
        assert!(!admits(LevelFilter::Error, &meta(Level::Warn, "tobj")));
    }
}
