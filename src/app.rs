use directories::BaseDirs;
use log::warn;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::api::client::ApiClient;
use crate::error::{Error, Result};
use crate::session::ChatSession;
use crate::storage::MessageCache;

/// Edges requested per page.
pub const PAGE_SIZE: u32 = 20;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:4000/graphql";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub endpoint: String,
    pub page_size: u32,
    /// Keep the last page in a local SQLite cache.
    pub cache: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            page_size: PAGE_SIZE,
            cache: true,
        }
    }
}

impl AppConfig {
    fn toml_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        Some(base.config_dir().join("gqlchat.toml"))
    }

    /// Config file, then `GQLCHAT_*` environment overrides. An unreadable
    /// file falls back to defaults; a missing one is written with them.
    pub fn load() -> Self {
        let from_file = match Self::toml_path() {
            Some(path) => Self::load_or_create(&path),
            None => Self::default(),
        };
        from_file.with_env(|key| std::env::var(key).ok())
    }

    pub fn load_or_create(path: &Path) -> Self {
        if !path.exists() {
            let config = Self::default();
            if let Err(e) = config.save_to(path) {
                warn!("could not write {}: {e}", path.display());
            }
            return config;
        }
        Self::load_from(path).unwrap_or_else(|e| {
            warn!("ignoring {}: {e}", path.display());
            Self::default()
        })
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let toml = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, toml)?;
        Ok(())
    }

    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(endpoint) = lookup("GQLCHAT_ENDPOINT") {
            self.endpoint = endpoint;
        }
        if let Some(size) = lookup("GQLCHAT_PAGE_SIZE") {
            match size.parse() {
                Ok(size) => self.page_size = size,
                Err(_) => warn!("GQLCHAT_PAGE_SIZE={size} is not a number"),
            }
        }
        self
    }

    pub fn endpoint_url(&self) -> String {
        crate::utils::normalize_endpoint(&self.endpoint)
    }

    pub fn effective_page_size(&self) -> u32 {
        if self.page_size == 0 { PAGE_SIZE } else { self.page_size }
    }
}

pub type Session = ChatSession<ApiClient>;

static SESSION: OnceCell<Arc<Session>> = OnceCell::new();

/// Build the process-wide client and session. Later calls return the first session.
pub fn init(config: &AppConfig) -> Result<Arc<Session>> {
    SESSION
        .get_or_try_init(|| {
            let client = ApiClient::new(&config.endpoint_url())?;
            let mut session = ChatSession::new(Arc::new(client), config.effective_page_size());
            if config.cache {
                match MessageCache::open_default() {
                    Ok(cache) => session = session.with_cache(cache),
                    Err(e) => warn!("message cache unavailable: {e}"),
                }
            }
            Ok(Arc::new(session))
        })
        .cloned()
}
