use sketch_core::{DEFAULT_CANVAS_HEIGHT, DEFAULT_CANVAS_WIDTH, DEFAULT_INK_SAMPLES_PER_SECOND};
use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub words_directory: String,
    pub tick_interval_ms: u64,
    pub connection_timeout_seconds: u64,
    pub session: SessionSettings,
}

/// Knobs that shape every game hosted by this process.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub round_duration_seconds: u32,
    pub cycles_total: u32,
    pub ink_samples_per_second: u32,
    pub allow_fill_strokes: bool,
    pub canvas_width: u32,
    pub canvas_height: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            round_duration_seconds: 80,
            cycles_total: 3,
            ink_samples_per_second: DEFAULT_INK_SAMPLES_PER_SECOND,
            allow_fill_strokes: false,
            canvas_width: DEFAULT_CANVAS_WIDTH,
            canvas_height: DEFAULT_CANVAS_HEIGHT,
        }
    }
}

/// Reads `key`, falling back to `default` when unset or unparsable.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

impl Config {
    pub fn new() -> Self {
        let defaults = SessionSettings::default();
        Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env_or("PORT", 8080),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://sketch.db?mode=rwc".to_string()),
            words_directory: env::var("WORDS_DIRECTORY")
                .unwrap_or_else(|_| "./shared/words".to_string()),
            tick_interval_ms: env_or("TICK_INTERVAL_MS", 500),
            connection_timeout_seconds: env_or("CONNECTION_TIMEOUT_SECONDS", 300),
            session: SessionSettings {
                round_duration_seconds: env_or(
                    "ROUND_DURATION_SECONDS",
                    defaults.round_duration_seconds,
                ),
                cycles_total: env_or("CYCLES_TOTAL", defaults.cycles_total),
                ink_samples_per_second: env_or(
                    "INK_SAMPLES_PER_SECOND",
                    defaults.ink_samples_per_second,
                ),
                allow_fill_strokes: env_or("ALLOW_FILL_STROKES", defaults.allow_fill_strokes),
                canvas_width: env_or("CANVAS_WIDTH", defaults.canvas_width),
                canvas_height: env_or("CANVAS_HEIGHT", defaults.canvas_height),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
