use chrono::Duration;
use pos_core::gatekeeper::DEFAULT_UNLOCK_DELAY_HOURS;
use pos_storage::DB_NAME;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// `None` keeps everything in memory.
    pub db_path: Option<PathBuf>,
    pub db_name: String,
    pub build_id: String,
    pub gatekeeper_delay_hours: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            db_name: DB_NAME.to_string(),
            build_id: env!("CARGO_PKG_VERSION").to_string(),
            gatekeeper_delay_hours: DEFAULT_UNLOCK_DELAY_HOURS,
        }
    }
}

impl EngineConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn at(path: impl AsRef<Path>) -> Self {
        Self {
            db_path: Some(path.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    /// Defaults overridden by `POS_DB_PATH`, `POS_DB_NAME`, `POS_BUILD_ID`
    /// and `POS_GATEKEEPER_DELAY_HOURS`. Blank or unparsable values are
    /// ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let value = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();
        if let Some(path) = value("POS_DB_PATH") {
            config.db_path = Some(PathBuf::from(path.trim()));
        }
        if let Some(name) = value("POS_DB_NAME") {
            config.db_name = name.trim().to_string();
        }
        if let Some(build_id) = value("POS_BUILD_ID") {
            config.build_id = build_id.trim().to_string();
        }
        if let Some(hours) = value("POS_GATEKEEPER_DELAY_HOURS")
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .filter(|hours| *hours >= 0)
        {
            config.gatekeeper_delay_hours = hours;
        }
        config
    }

    pub fn gatekeeper_delay(&self) -> Duration {
        Duration::hours(self.gatekeeper_delay_hours)
    }

    pub(crate) fn describe_db(&self) -> String {
        match &self.db_path {
            Some(path) => path.display().to_string(),
            None => ":memory:".to_string(),
        }
    }
}
