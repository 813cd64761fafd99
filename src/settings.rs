use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Settings {
    /// When enabled the logger is initialised at debug level and `RUST_LOG`
    /// is honoured.
    #[serde(default)]
    pub debug_logging: bool,
    /// Optional file receiving log output in addition to stdout.
    #[serde(default)]
    pub log_file: Option<String>,
    /// Maximum number of work items run per pump step. `None` runs everything
    /// queued when the step starts.
    #[serde(default)]
    pub drain_batch_limit: Option<usize>,
    #[serde(default = "default_dispatch_thread_name")]
    pub dispatch_thread_name: String,
    #[serde(default = "default_timer_thread_name")]
    pub timer_thread_name: String,
}

fn default_dispatch_thread_name() -> String {
    "host-dispatch".into()
}

fn default_timer_thread_name() -> String {
    crate::synchronizer::DEFAULT_TIMER_THREAD_NAME.into()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug_logging: false,
            log_file: None,
            drain_batch_limit: None,
            dispatch_thread_name: default_dispatch_thread_name(),
            timer_thread_name: default_timer_thread_name(),
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).unwrap_or_default();
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        self.log_file.as_ref().map(PathBuf::from)
    }
}
