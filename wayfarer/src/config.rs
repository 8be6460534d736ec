//! Engine configuration.
//!
//! Each component has a typed config struct with defaults and validation.
//! [`ConfigFile`] overlays values from an INI file at
//! `<config_dir>/wayfarer/config.ini` onto the defaults, so a missing or
//! partial file always yields a usable configuration.

use std::path::PathBuf;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

/// Default bounded-cache ceiling (64 MB).
pub const DEFAULT_CACHE_SIZE: u64 = 64 * 1024 * 1024;

/// Default cache entry time-to-live (1 hour).
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// Default maximum delivery attempts for a queued mutation.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default initial delay for exponential backoff (500ms).
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 500;

/// Default multiplier for exponential backoff.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Default maximum delay for exponential backoff (30 seconds).
pub const DEFAULT_MAX_DELAY_SECS: u64 = 30;

/// Default number of tile fetches in flight per batch.
pub const DEFAULT_TILE_BATCH_SIZE: usize = 5;

/// Default pause between tile batches (250ms) to respect upstream rate limits.
pub const DEFAULT_TILE_BATCH_PAUSE_MS: u64 = 250;

/// Default per-tile fetch timeout (30 seconds).
pub const DEFAULT_TILE_TIMEOUT_SECS: u64 = 30;

/// Ceiling on the per-zoom tile radius so a mistyped radius cannot enqueue
/// hundreds of thousands of fetches.
pub const DEFAULT_MAX_TILE_RADIUS: u32 = 64;

/// Errors from configuration loading or validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file exists but could not be read or parsed.
    #[error("failed to read config file: {0}")]
    Read(String),

    /// A field failed validation.
    #[error("invalid config: {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

/// Bounded cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum resident payload bytes.
    pub max_size_bytes: u64,
    /// TTL applied when the caller does not pass one explicitly.
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_CACHE_SIZE,
            default_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
        }
    }
}

/// Mutation queue retry settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum delivery attempts before a mutation is abandoned.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Backoff multiplier applied per attempt.
    pub backoff_factor: f64,
    /// Cap on the backoff delay.
    pub max_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
        }
    }
}

/// Tile store settings.
#[derive(Debug, Clone)]
pub struct TileConfig {
    /// Slippy URL template with `{z}`, `{x}`, `{y}` placeholders.
    pub url_template: String,
    /// Number of fetches in flight per batch.
    pub batch_size: usize,
    /// Pause between batches.
    pub batch_pause: Duration,
    /// Per-fetch HTTP timeout.
    pub fetch_timeout: Duration,
    /// Ceiling on the per-zoom tile radius of a region download.
    pub max_tile_radius: u32,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            url_template: "https://tile.openstreetmap.org/{z}/{x}/{y}.png".to_string(),
            batch_size: DEFAULT_TILE_BATCH_SIZE,
            batch_pause: Duration::from_millis(DEFAULT_TILE_BATCH_PAUSE_MS),
            fetch_timeout: Duration::from_secs(DEFAULT_TILE_TIMEOUT_SECS),
            max_tile_radius: DEFAULT_MAX_TILE_RADIUS,
        }
    }
}

/// Remote API settings.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Base URL of the favorites endpoint.
    pub base_url: String,
    /// HTTP timeout for favorites calls.
    pub timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.wayfarer.example/v1".to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory for all durable state.
    pub data_dir: PathBuf,
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub tiles: TileConfig,
    pub remote: RemoteConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            cache: CacheConfig::default(),
            queue: QueueConfig::default(),
            tiles: TileConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Validates cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.max_size_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "cache.max_size_bytes",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.cache.default_ttl.is_zero() {
            return Err(ConfigError::Invalid {
                field: "cache.default_ttl",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.queue.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "queue.max_attempts",
                reason: "must allow at least one attempt".to_string(),
            });
        }
        if self.queue.backoff_factor < 1.0 {
            return Err(ConfigError::Invalid {
                field: "queue.backoff_factor",
                reason: "must be >= 1.0 so delays never decrease".to_string(),
            });
        }
        if self.tiles.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "tiles.batch_size",
                reason: "must fetch at least one tile per batch".to_string(),
            });
        }
        if !self.tiles.url_template.contains("{z}")
            || !self.tiles.url_template.contains("{x}")
            || !self.tiles.url_template.contains("{y}")
        {
            return Err(ConfigError::Invalid {
                field: "tiles.url_template",
                reason: "must contain {z}, {x} and {y} placeholders".to_string(),
            });
        }
        Ok(())
    }
}

/// Default data directory: `<data_dir>/wayfarer`, falling back to the
/// current directory when the platform offers no data dir.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wayfarer")
}

/// Path of the user config file.
pub fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("wayfarer").join("config.ini"))
}

/// INI-backed configuration overlay.
pub struct ConfigFile;

impl ConfigFile {
    /// Loads `config.ini`, overlaying present values onto defaults.
    ///
    /// A missing file yields the defaults; a malformed file is an error so
    /// typos are not silently ignored.
    pub fn load() -> Result<EngineConfig, ConfigError> {
        match config_file_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(EngineConfig::default()),
        }
    }

    /// Loads configuration from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Result<EngineConfig, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Read(e.to_string()))?;
        let mut config = EngineConfig::default();

        if let Some(section) = ini.section(Some("engine")) {
            if let Some(dir) = section.get("data_dir") {
                config.data_dir = PathBuf::from(dir);
            }
        }

        if let Some(section) = ini.section(Some("cache")) {
            if let Some(mb) = parse_field::<u64>(section.get("max_size_mb"), "cache.max_size_mb")? {
                config.cache.max_size_bytes = mb * 1024 * 1024;
            }
            if let Some(secs) =
                parse_field::<u64>(section.get("default_ttl_secs"), "cache.default_ttl_secs")?
            {
                config.cache.default_ttl = Duration::from_secs(secs);
            }
        }

        if let Some(section) = ini.section(Some("queue")) {
            if let Some(n) = parse_field::<u32>(section.get("max_attempts"), "queue.max_attempts")? {
                config.queue.max_attempts = n;
            }
            if let Some(ms) =
                parse_field::<u64>(section.get("initial_delay_ms"), "queue.initial_delay_ms")?
            {
                config.queue.initial_delay = Duration::from_millis(ms);
            }
            if let Some(f) =
                parse_field::<f64>(section.get("backoff_factor"), "queue.backoff_factor")?
            {
                config.queue.backoff_factor = f;
            }
            if let Some(secs) =
                parse_field::<u64>(section.get("max_delay_secs"), "queue.max_delay_secs")?
            {
                config.queue.max_delay = Duration::from_secs(secs);
            }
        }

        if let Some(section) = ini.section(Some("tiles")) {
            if let Some(template) = section.get("url_template") {
                config.tiles.url_template = template.to_string();
            }
            if let Some(n) = parse_field::<usize>(section.get("batch_size"), "tiles.batch_size")? {
                config.tiles.batch_size = n;
            }
            if let Some(ms) =
                parse_field::<u64>(section.get("batch_pause_ms"), "tiles.batch_pause_ms")?
            {
                config.tiles.batch_pause = Duration::from_millis(ms);
            }
        }

        if let Some(section) = ini.section(Some("remote")) {
            if let Some(url) = section.get("base_url") {
                config.remote.base_url = url.to_string();
            }
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_field<T: std::str::FromStr>(
    value: Option<&str>,
    field: &'static str,
) -> Result<Option<T>, ConfigError> {
    match value {
        None => Ok(None),
        Some(raw) => raw.parse::<T>().map(Some).map_err(|_| ConfigError::Invalid {
            field,
            reason: format!("could not parse '{}'", raw),
        }),
    }
}

/// Formats a byte count for human display.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_zero_cache_size_rejected() {
        let mut config = EngineConfig::default();
        config.cache.max_size_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_factor_below_one_rejected() {
        let mut config = EngineConfig::default();
        config.queue.backoff_factor = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_url_template_requires_placeholders() {
        let mut config = EngineConfig::default();
        config.tiles.url_template = "https://tiles.example.com/all.png".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_overlays_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[cache]").unwrap();
        writeln!(file, "max_size_mb = 128").unwrap();
        writeln!(file, "[queue]").unwrap();
        writeln!(file, "max_attempts = 3").unwrap();
        drop(file);

        let config = ConfigFile::load_from(&path).unwrap();
        assert_eq!(config.cache.max_size_bytes, 128 * 1024 * 1024);
        assert_eq!(config.queue.max_attempts, 3);
        // Untouched fields keep their defaults
        assert_eq!(config.tiles.batch_size, DEFAULT_TILE_BATCH_SIZE);
    }

    #[test]
    fn test_load_from_rejects_unparseable_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "[queue]\nmax_attempts = lots\n").unwrap();

        assert!(matches!(
            ConfigFile::load_from(&path),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
        assert_eq!(format_size(2 * 1024 * 1024 * 1024), "2.00 GB");
    }
}
