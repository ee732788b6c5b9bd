use std::sync::Arc;

use parking_lot::RwLock;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "dirsess_registry" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines on stdout instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid filter directive: {0}")]
    Filter(String),

    #[error("failed to reload log filter: {0}")]
    Reload(#[from] reload::Error),
}

/// Handle for adjusting logging after startup.
pub struct TelemetryGuard {
    log_level: Level,
    level_filter: Arc<RwLock<Vec<(String, Level)>>>,
    reload: Option<reload::Handle<EnvFilter, Registry>>,
}

impl TelemetryGuard {
    /// Change the log level for a specific module at runtime.
    pub fn set_module_level(&self, module: &str, level: Level) -> Result<(), TelemetryError> {
        let directives = {
            let mut levels = self.level_filter.write();
            if let Some(entry) = levels.iter_mut().find(|(m, _)| m == module) {
                entry.1 = level;
            } else {
                levels.push((module.to_string(), level));
            }
            filter_directives(self.log_level, &levels)
        };
        if let Some(handle) = &self.reload {
            let filter =
                EnvFilter::try_new(&directives).map_err(|e| TelemetryError::Filter(e.to_string()))?;
            handle.reload(filter)?;
        }
        Ok(())
    }

    /// Get current per-module log level overrides.
    pub fn module_levels(&self) -> Vec<(String, Level)> {
        self.level_filter.read().clone()
    }
}

/// Build an `EnvFilter` directive string from a base level and overrides.
pub fn filter_directives(base: Level, modules: &[(String, Level)]) -> String {
    let mut filter = base.to_string().to_lowercase();
    for (module, level) in modules {
        filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter
}

/// Initialize the telemetry subsystem. Call once at startup.
///
/// A second call leaves the existing subscriber in place and returns a guard
/// that only tracks levels.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let level_filter = Arc::new(RwLock::new(config.module_levels.clone()));

    let filter_str = filter_directives(config.log_level, &config.module_levels);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));
    let (filter_layer, reload_handle) = reload::Layer::new(env_filter);

    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
    });
    let text_layer = (!config.json).then(|| tracing_subscriber::fmt::layer().with_target(true));

    let installed = tracing_subscriber::registry()
        .with(filter_layer)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .is_ok();
    if !installed {
        eprintln!("dirsess-telemetry: subscriber already installed");
    }

    TelemetryGuard {
        log_level: config.log_level,
        level_filter,
        reload: installed.then_some(reload_handle),
    }
}
