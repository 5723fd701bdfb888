//! Settings file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::Settings;

/// Watches a settings file and forwards every valid reload.
pub struct SettingsWatcher {
    path: PathBuf,
    updates: mpsc::UnboundedSender<Settings>,
}

impl SettingsWatcher {
    /// Returns the watcher and the receiving end for reloaded settings.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<Settings>) {
        let (updates, rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                updates,
            },
            rx,
        )
    }

    /// Start watching. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self { path, updates } = self;
        let reload_path = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    tracing::info!(path = ?reload_path, "Settings changed, reloading");
                    match load_config(&reload_path) {
                        Ok(settings) => {
                            if updates.send(settings).is_err() {
                                tracing::debug!("Settings receiver dropped; ignoring reload");
                            }
                        }
                        Err(err) => tracing::error!(
                            error = %err,
                            "Failed to reload settings; keeping the current ones"
                        ),
                    }
                }
                Ok(_) => {}
                Err(err) => tracing::error!(error = ?err, "Settings watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?path, "Settings watcher started");
        Ok(watcher)
    }
}
