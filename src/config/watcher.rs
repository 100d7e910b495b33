//! Hot reload of admission limits.
//!
//! Watches the config file and forwards the `[connections.limits]` section
//! whenever a change loads, validates, and actually differs from the limits
//! in force. Everything else in the file needs a restart.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::loader::{load_config, ConfigError};
use crate::config::schema::LimitsConfig;

/// Watches the config file for admission limit changes.
pub struct LimitsWatcher {
    path: PathBuf,
    current: LimitsConfig,
    limits_tx: mpsc::UnboundedSender<LimitsConfig>,
}

impl LimitsWatcher {
    /// `current` is the set of limits the manager started with. The receiver
    /// yields each new set of limits in order.
    pub fn new(path: &Path, current: LimitsConfig) -> (Self, mpsc::UnboundedReceiver<LimitsConfig>) {
        let (limits_tx, limits_rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            current,
            limits_tx,
        };
        (watcher, limits_rx)
    }

    /// Start watching. The returned handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self {
            path,
            mut current,
            limits_tx,
        } = self;
        let watched = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::error!(error = %e, "Config watch error");
                        return;
                    }
                };
                if !(event.kind.is_modify() || event.kind.is_create()) {
                    return;
                }
                match changed_limits(&path, &current) {
                    Ok(Some(limits)) => {
                        current = limits.clone();
                        let _ = limits_tx.send(limits);
                    }
                    Ok(None) => tracing::debug!(path = %path.display(), "Config changed, admission limits unchanged"),
                    Err(e) => tracing::error!(error = %e, "Config reload rejected, keeping current limits"),
                }
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&watched, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %watched.display(), "Watching config for admission limit changes");
        Ok(watcher)
    }
}

/// Load `path` and return its limits if they differ from `current`.
///
/// The whole file must still validate; a broken edit elsewhere in the file
/// rejects the reload.
pub fn changed_limits(path: &Path, current: &LimitsConfig) -> Result<Option<LimitsConfig>, ConfigError> {
    let limits = load_config(path)?.connections.limits;
    Ok((limits != *current).then_some(limits))
}
