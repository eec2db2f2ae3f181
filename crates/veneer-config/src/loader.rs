//! Config loading and hot-reload.
//!
//! [`load`] turns a file path into a validated [`RuntimeConfig`]:
//! read, overlay merge, `@env` resolution, typed parse, cross-validation.
//!
//! [`ConfigLoader`] owns the published snapshot. Snapshots are
//! `Arc`-reference-counted and immutable: a request captures
//! [`ConfigLoader::current`] once and keeps that snapshot until it
//! completes, regardless of reloads happening meanwhile. [`ConfigLoader::watch`]
//! spawns a `notify` watcher whose events are debounced on a tokio task;
//! a reload parses and validates the changed file and publishes only on
//! success, so the engine never serves a partially-loaded config.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use notify::{RecursiveMode, Watcher};
use parking_lot::RwLock;
use veneer_error::{Result, VeneerError};

use crate::env::{self, ENVIRONMENT_VAR};
use crate::merge;
use crate::model::{HostMode, RuntimeConfig};
use crate::validate;

/// Quiet window required before a file event triggers a reload.
///
/// Editor save-storms (write + rename + chmod) coalesce into one reload.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Maximum read attempts per reload before giving up.
const MAX_READ_ATTEMPTS: u32 = 5;

/// Initial back-off delay; doubles per attempt.
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Callback invoked with the freshly published snapshot after a successful
/// hot-reload. Used by the engine to drop per-snapshot caches and drain
/// connection pools.
pub type ReloadCallback = dyn Fn(Arc<RuntimeConfig>) + Send + Sync;

/// Load and validate a config file.
///
/// Applies the `VENEER_ENVIRONMENT` overlay files, resolves `@env('...')`
/// tokens, applies the `VENEER_CONNSTRING` override, deserializes, and
/// cross-validates.
///
/// # Errors
///
/// `ErrorInInitialization` for unreadable files, malformed JSON, unknown
/// keys, unresolved env vars, and validation violations.
pub fn load(path: &Path) -> Result<RuntimeConfig> {
    let mut tree = read_json(path)?;

    if let Ok(environment) = std::env::var(ENVIRONMENT_VAR) {
        for overlay_path in merge::overlay_paths(path, &environment) {
            if overlay_path.exists() {
                tracing::info!(overlay = %overlay_path.display(), "applying config overlay");
                merge::deep_merge(&mut tree, read_json(&overlay_path)?);
            }
        }
    }

    env::resolve_env_tokens(&mut tree)?;
    env::apply_connstring_override(&mut tree);

    let config: RuntimeConfig = serde_json::from_value(tree)
        .map_err(|e| VeneerError::init(format!("Config file does not match the schema: {e}")))?;

    validate::validate(&config)?;
    Ok(config)
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        VeneerError::init(format!("Cannot read config file '{}': {e}", path.display()))
    })?;
    serde_json::from_str(&text)
        .map_err(|e| VeneerError::init(format!("Config file '{}' is not valid JSON: {e}", path.display())))
}

/// Owner of the published config snapshot.
pub struct ConfigLoader {
    path: PathBuf,
    current: RwLock<Arc<RuntimeConfig>>,
    generation: AtomicU64,
}

impl ConfigLoader {
    /// Load the file at `path` and publish the first snapshot.
    ///
    /// # Errors
    ///
    /// Propagates [`load`] failures; a loader is never constructed around an
    /// invalid config.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = load(&path)?;
        Ok(Self {
            path,
            current: RwLock::new(Arc::new(config)),
            generation: AtomicU64::new(0),
        })
    }

    /// Construct a loader around an already-built config (tests, embedders).
    #[must_use]
    pub fn from_config(config: RuntimeConfig) -> Self {
        Self {
            path: PathBuf::new(),
            current: RwLock::new(Arc::new(config)),
            generation: AtomicU64::new(0),
        }
    }

    /// The currently published snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<RuntimeConfig> {
        self.current.read().clone()
    }

    /// Monotonic counter bumped on every publish.
    ///
    /// Per-snapshot caches key on this to know when to rebuild.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Atomically publish a new snapshot.
    pub fn publish(&self, config: RuntimeConfig) -> Arc<RuntimeConfig> {
        let snapshot = Arc::new(config);
        *self.current.write() = snapshot.clone();
        self.generation.fetch_add(1, Ordering::AcqRel);
        snapshot
    }

    /// Re-load the config file and publish it if it is valid and allowed.
    ///
    /// Reload rules:
    /// - skipped entirely when the current snapshot runs in production mode;
    /// - a new config that would change the host mode is logged and ignored;
    /// - read IO errors are retried with exponential back-off
    ///   (≤ [`MAX_READ_ATTEMPTS`]); parse and validation errors are not
    ///   retried (they are deterministic);
    /// - any failure leaves the previous snapshot published.
    pub async fn reload(&self, on_reload: Option<&ReloadCallback>) {
        let previous = self.current();

        if previous.runtime.host.mode == HostMode::Production {
            tracing::warn!("config file changed but hot-reload is disabled in production mode");
            return;
        }

        match self.load_with_retry().await {
            Ok(config) => {
                if config.runtime.host.mode != previous.runtime.host.mode {
                    tracing::warn!(
                        "config reload would change the host mode; change ignored, \
                         previous snapshot kept"
                    );
                    return;
                }
                let entity_count = config.entities.len();
                let snapshot = self.publish(config);
                tracing::info!(entities = entity_count, "config hot-reload published");
                if let Some(callback) = on_reload {
                    callback(snapshot);
                }
            }
            Err(error) => {
                tracing::warn!(%error, "config reload failed; previous snapshot kept");
            }
        }
    }

    async fn load_with_retry(&self) -> Result<RuntimeConfig> {
        let mut delay = INITIAL_BACKOFF;
        let mut attempt = 1;
        loop {
            match load(&self.path) {
                Ok(config) => return Ok(config),
                // Retry IO-flavored failures only; parse/validation errors are
                // deterministic and would fail identically on every attempt.
                Err(error) if is_read_error(&error) && attempt < MAX_READ_ATTEMPTS => {
                    tracing::warn!(%error, attempt, "config read failed; retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Watch the config file and hot-reload on changes.
    ///
    /// The parent directory is watched so that editor rename-replace saves
    /// and overlay file edits are seen too. Events are debounced with a
    /// [`DEBOUNCE_WINDOW`] quiet period.
    ///
    /// # Errors
    ///
    /// Fails when the filesystem watcher cannot be installed.
    pub fn watch(
        self: &Arc<Self>,
        on_reload: Option<Box<ReloadCallback>>,
    ) -> Result<WatchHandle> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();

        let mut watcher =
            notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
                if event.is_ok() {
                    // A full channel or closed receiver just drops the nudge.
                    let _ = tx.send(());
                }
            })
            .map_err(|e| VeneerError::init(format!("Cannot create config watcher: {e}")))?;

        let watch_root = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        watcher
            .watch(watch_root, RecursiveMode::NonRecursive)
            .map_err(|e| VeneerError::init(format!("Cannot watch config directory: {e}")))?;

        let loader = Arc::clone(self);
        let task = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                // Debounce: keep absorbing events until the quiet window
                // passes without a new one.
                loop {
                    match tokio::time::timeout(DEBOUNCE_WINDOW, rx.recv()).await {
                        Ok(Some(())) => {}
                        Ok(None) => return,
                        Err(_) => break,
                    }
                }
                loader.reload(on_reload.as_deref()).await;
            }
        });

        Ok(WatchHandle {
            _watcher: watcher,
            task,
        })
    }
}

impl std::fmt::Debug for ConfigLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigLoader")
            .field("path", &self.path)
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

fn is_read_error(error: &VeneerError) -> bool {
    // read_json wraps IO failures as Initialization with the file path in
    // the message; parse errors mention JSON instead.
    matches!(error, VeneerError::Initialization { message } if message.starts_with("Cannot read"))
}

/// Keeps the filesystem watcher and debounce task alive.
///
/// Dropping the handle stops watching.
pub struct WatchHandle {
    _watcher: notify::RecommendedWatcher,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
