//! Configuration file watcher.
//!
//! Re-reads the configuration file when it changes (or on SIGHUP) and hands
//! the new configuration to a callback. The binary uses this to swap the
//! backend node list of a running balancer.

use crate::config::{load_config, Config};
use crate::util::ShutdownSignal;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Callback type for config reload.
pub type ReloadCallback = Box<dyn Fn(Config) + Send + Sync>;

/// Configuration file watcher.
pub struct ConfigWatcher {
    config_path: PathBuf,
    reload_callback: ReloadCallback,
}

impl ConfigWatcher {
    pub fn new(config_path: PathBuf, reload_callback: ReloadCallback) -> Self {
        Self {
            config_path,
            reload_callback,
        }
    }

    /// Watch until `shutdown` fires.
    pub async fn run(self, shutdown: ShutdownSignal) {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let watcher_result: Result<RecommendedWatcher, _> = Watcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            notify::Config::default(),
        );

        let mut watcher = match watcher_result {
            Ok(w) => w,
            Err(e) => {
                error!(error = %e, "failed to create file watcher");
                shutdown.wait().await;
                return;
            }
        };

        // Editors often replace the file, so watch the directory
        let dir = match self.config_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
            error!(error = %e, dir = %dir.display(), "failed to watch config directory");
            shutdown.wait().await;
            return;
        }

        #[cfg(unix)]
        let mut sighup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(error = %e, "failed to setup SIGHUP handler");
                None
            }
        };

        info!(path = %self.config_path.display(), "config watcher ready");

        loop {
            tokio::select! {
                Some(event) = rx.recv() => {
                    if self.should_reload(&event) {
                        self.try_reload();
                    }
                }

                _ = async {
                    #[cfg(unix)]
                    {
                        match sighup.as_mut() {
                            Some(sig) => sig.recv().await,
                            None => std::future::pending::<Option<()>>().await,
                        }
                    }
                    #[cfg(not(unix))]
                    {
                        std::future::pending::<Option<()>>().await
                    }
                } => {
                    info!("received SIGHUP, reloading configuration");
                    self.try_reload();
                }

                _ = shutdown.wait() => {
                    info!("config watcher shutting down");
                    break;
                }
            }
        }
    }

    /// Whether this event touches the config file with new content.
    fn should_reload(&self, event: &Event) -> bool {
        let is_our_file = event
            .paths
            .iter()
            .any(|p| p.file_name() == self.config_path.file_name());

        let is_modify_or_create = matches!(
            event.kind,
            notify::EventKind::Modify(_) | notify::EventKind::Create(_)
        );

        is_our_file && is_modify_or_create
    }

    fn try_reload(&self) {
        match load_config(&self.config_path) {
            Ok(config) => {
                info!(nodes = config.nodes.len(), "configuration reloaded");
                (self.reload_callback)(config);
            }
            Err(e) => {
                error!(error = %e, "failed to reload config, keeping current");
            }
        }
    }
}
