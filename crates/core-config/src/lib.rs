//! Configuration loading and parsing.
//!
//! Parses `regmon.toml` (or an override path provided by the binary) into
//! `ConfigFile`. Every table and field is optional; absent values take the
//! defaults below and unknown fields are ignored so older binaries tolerate
//! newer files.
//!
//! The raw parsed values are retained alongside the effective limits computed
//! by `Config::apply_limits`, which keeps the viewport numbers mutually
//! consistent (a rendered-row cap smaller than one fetch window would evict
//! rows the moment they arrive).
//!
//! Choices made while running (the display format) live in a separate
//! `SessionState` file so the user-edited config is never rewritten.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ViewportConfig {
    #[serde(default = "ViewportConfig::default_visible_count")]
    pub visible_count: u32,
    #[serde(default = "ViewportConfig::default_prefetch")]
    pub prefetch_before: u32,
    #[serde(default = "ViewportConfig::default_prefetch")]
    pub prefetch_after: u32,
    /// Same unit as the scroll proximity signal.
    #[serde(default = "ViewportConfig::default_scroll_threshold")]
    pub scroll_threshold: u32,
    #[serde(default = "ViewportConfig::default_max_rendered_rows")]
    pub max_rendered_rows: usize,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            visible_count: Self::default_visible_count(),
            prefetch_before: Self::default_prefetch(),
            prefetch_after: Self::default_prefetch(),
            scroll_threshold: Self::default_scroll_threshold(),
            max_rendered_rows: Self::default_max_rendered_rows(),
        }
    }
}

impl ViewportConfig {
    const fn default_visible_count() -> u32 {
        30
    }
    const fn default_prefetch() -> u32 {
        50
    }
    const fn default_scroll_threshold() -> u32 {
        200
    }
    const fn default_max_rendered_rows() -> usize {
        300
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Fall back to interval polling when push delivery is unavailable.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "PollConfig::default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "PollConfig::default_count")]
    pub count: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: Self::default_interval_ms(),
            count: Self::default_count(),
        }
    }
}

impl PollConfig {
    const fn default_interval_ms() -> u64 {
        1000
    }
    const fn default_count() -> u32 {
        30
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    #[serde(default = "MonitorConfig::default_target")]
    pub default_target: String,
    /// Display format name (`U16`, `HEX`, ...); validated by the consumer.
    #[serde(default = "MonitorConfig::default_format")]
    pub format: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            default_target: Self::default_target(),
            format: Self::default_format(),
        }
    }
}

impl MonitorConfig {
    fn default_target() -> String {
        "D0".to_string()
    }
    fn default_format() -> String {
        "U16".to_string()
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub viewport: ViewportConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

/// Viewport numbers after consistency clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportLimits {
    pub visible_count: u32,
    pub prefetch_before: u32,
    pub prefetch_after: u32,
    pub scroll_threshold: u32,
    pub max_rendered_rows: usize,
}

impl ViewportLimits {
    /// Smallest rendered-row cap that still holds one full fetch window on
    /// both sides of the visible area.
    pub fn min_rendered_rows(&self) -> usize {
        (u64::from(self.visible_count)
            + u64::from(self.prefetch_before)
            + u64::from(self.prefetch_after))
        .try_into()
        .unwrap_or(usize::MAX)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub raw: Option<String>, // original file string (optional)
    pub file: ConfigFile,    // parsed (or default) data
    pub effective: ViewportLimits,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_file(None, ConfigFile::default())
    }
}

/// Best-effort config path: working directory first, then the platform config
/// dir (XDG / AppData Roaming).
pub fn discover() -> PathBuf {
    let local = PathBuf::from("regmon.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("regmon").join("regmon.toml");
    }
    PathBuf::from("regmon.toml")
}

/// Load configuration from `path` (or the discovered location). A missing or
/// malformed file yields defaults; the returned config has its limits applied.
pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    let Ok(content) = fs::read_to_string(&path) else {
        return Ok(Config::default());
    };
    match toml::from_str::<ConfigFile>(&content) {
        Ok(file) => Ok(Config::from_file(Some(content), file)),
        Err(e) => {
            warn!(target: "config", path = %path.display(), error = %e, "config_parse_failed");
            Ok(Config::default())
        }
    }
}

impl Config {
    fn from_file(raw: Option<String>, file: ConfigFile) -> Self {
        let mut cfg = Self {
            raw,
            effective: ViewportLimits {
                visible_count: file.viewport.visible_count,
                prefetch_before: file.viewport.prefetch_before,
                prefetch_after: file.viewport.prefetch_after,
                scroll_threshold: file.viewport.scroll_threshold,
                max_rendered_rows: file.viewport.max_rendered_rows,
            },
            file,
        };
        cfg.apply_limits();
        cfg
    }

    /// Recompute `effective` from the raw file values. Returns the effective
    /// rendered-row cap.
    pub fn apply_limits(&mut self) -> usize {
        let raw = &self.file.viewport;
        let mut limits = ViewportLimits {
            visible_count: raw.visible_count.max(1),
            prefetch_before: raw.prefetch_before,
            prefetch_after: raw.prefetch_after,
            scroll_threshold: raw.scroll_threshold,
            max_rendered_rows: raw.max_rendered_rows,
        };
        if limits.visible_count != raw.visible_count {
            info!(target: "config", raw = raw.visible_count, clamped = limits.visible_count, "visible_count_clamped");
        }
        let min = limits.min_rendered_rows();
        if limits.max_rendered_rows < min {
            info!(
                target: "config",
                raw = raw.max_rendered_rows,
                clamped = min,
                visible_count = limits.visible_count,
                prefetch_before = limits.prefetch_before,
                prefetch_after = limits.prefetch_after,
                "max_rendered_rows_clamped"
            );
            limits.max_rendered_rows = min;
        }
        self.effective = limits;
        limits.max_rendered_rows
    }

    /// Poll period, never below one millisecond.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.file.poll.interval_ms.max(1))
    }
}

/// Values remembered between runs.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct SessionState {
    /// Last display format chosen by the operator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Platform location of the session file (`<data dir>/regmon/state.toml`).
pub fn state_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("regmon").join("state.toml"))
}

/// Read session state. A missing or malformed file yields the default.
pub fn load_state(path: &Path) -> SessionState {
    let Ok(content) = fs::read_to_string(path) else {
        return SessionState::default();
    };
    toml::from_str(&content).unwrap_or_else(|e| {
        warn!(target: "config", path = %path.display(), error = %e, "state_parse_failed");
        SessionState::default()
    })
}

/// Write session state, creating the parent directory when needed.
pub fn save_state(path: &Path, state: &SessionState) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, toml::to_string(state)?)?;
    debug!(target: "config", path = %path.display(), format = ?state.format, "state_saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex, MutexGuard};
    use tracing::Level;
    use tracing::subscriber::with_default;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone)]
    struct BufferWriter {
        inner: Arc<Mutex<Vec<u8>>>,
    }

    impl BufferWriter {
        fn new() -> (Self, Arc<Mutex<Vec<u8>>>) {
            let buf = Arc::new(Mutex::new(Vec::new()));
            (Self { inner: buf.clone() }, buf)
        }
    }

    struct LockedWriter<'a> {
        guard: MutexGuard<'a, Vec<u8>>,
    }

    impl<'a> Write for LockedWriter<'a> {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.guard.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for BufferWriter {
        type Writer = LockedWriter<'a>;

        fn make_writer(&'a self) -> Self::Writer {
            LockedWriter {
                guard: self.inner.lock().expect("log buffer poisoned"),
            }
        }
    }

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), body).unwrap();
        tmp
    }

    #[test]
    fn default_config_when_missing_file() {
        let cfg = load_from(Some(PathBuf::from("__nonexistent_hopefully__.toml"))).unwrap();
        assert!(cfg.raw.is_none());
        assert_eq!(cfg.file.viewport, ViewportConfig::default());
        assert_eq!(cfg.effective.visible_count, 30);
        assert_eq!(cfg.effective.max_rendered_rows, 300);
        assert!(!cfg.file.poll.enabled);
        assert_eq!(cfg.poll_interval(), Duration::from_millis(1000));
        assert_eq!(cfg.file.monitor.default_target, "D0");
        assert_eq!(cfg.file.monitor.format, "U16");
    }

    #[test]
    fn parses_partial_tables() {
        let tmp = write_config(
            "[viewport]\nprefetch_after = 20\n[poll]\nenabled = true\ninterval_ms = 250\n[monitor]\ndefault_target = \"W10\"\n",
        );
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert!(cfg.raw.is_some());
        assert_eq!(cfg.effective.prefetch_after, 20);
        assert_eq!(cfg.effective.prefetch_before, 50);
        assert!(cfg.file.poll.enabled);
        assert_eq!(cfg.file.poll.count, 30);
        assert_eq!(cfg.poll_interval(), Duration::from_millis(250));
        assert_eq!(cfg.file.monitor.default_target, "W10");
        assert_eq!(cfg.file.monitor.format, "U16");
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let tmp = write_config("[viewport\nvisible_count = = 3\n");
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert!(cfg.raw.is_none());
        assert_eq!(cfg.effective.visible_count, 30);
    }

    #[test]
    fn small_row_cap_is_raised_to_one_window() {
        let tmp = write_config(
            "[viewport]\nvisible_count = 10\nprefetch_before = 5\nprefetch_after = 5\nmax_rendered_rows = 4\n",
        );
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(cfg.file.viewport.max_rendered_rows, 4);
        assert_eq!(cfg.effective.max_rendered_rows, 20);
    }

    #[test]
    fn zero_values_are_raised() {
        let tmp = write_config("[viewport]\nvisible_count = 0\n[poll]\ninterval_ms = 0\n");
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(cfg.effective.visible_count, 1);
        assert_eq!(cfg.poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn clamp_logging_uses_config_target() {
        let mut cfg = Config::default();
        cfg.file.viewport.max_rendered_rows = 10;
        let (writer, buffer) = BufferWriter::new();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(Level::INFO)
            .with_target(true)
            .with_ansi(false)
            .without_time()
            .with_writer(writer)
            .finish();

        let effective = with_default(subscriber, || cfg.apply_limits());

        let log_output = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(log_output.contains("INFO config:"));
        assert!(log_output.contains("max_rendered_rows_clamped"));
        assert_eq!(effective, 130);
        assert_eq!(cfg.effective.max_rendered_rows, 130);
    }

    #[test]
    fn session_state_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.toml");
        assert_eq!(load_state(&path), SessionState::default());

        let state = SessionState {
            format: Some("F32".into()),
        };
        save_state(&path, &state).unwrap();
        assert_eq!(load_state(&path), state);
    }

    #[test]
    fn malformed_session_state_is_ignored() {
        let tmp = write_config("format = [\n");
        assert_eq!(load_state(tmp.path()), SessionState::default());
    }
}
