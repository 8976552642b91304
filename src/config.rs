use anyhow::{Context, Result};
use log::debug;
use reqwest::{
    Client,
    header::{AUTHORIZATION, HeaderMap, HeaderValue},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::runtime::Runtime;

/// Overrides the installation root.
pub const ROOT_ENV: &str = "PKGMAN_ROOT";

/// Bearer token sent with every catalog and artifact request.
pub const TOKEN_ENV: &str = "PKGMAN_TOKEN";

const SETTINGS_DIR: &str = "pkgman";
const SETTINGS_FILE: &str = "settings.json";
const DEFAULT_ROOT_DIR: &str = ".pkgman";

/// Persisted user settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Catalog source URLs in priority order.
    #[serde(default)]
    pub sources: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_root: Option<PathBuf>,
}

impl Settings {
    pub fn path<R: Runtime + ?Sized>(runtime: &R) -> Result<PathBuf> {
        let dir = runtime
            .config_dir()
            .context("Could not find the configuration directory")?;
        Ok(dir.join(SETTINGS_DIR).join(SETTINGS_FILE))
    }

    /// Read the settings, or the defaults when nothing was saved yet.
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime + ?Sized>(runtime: &R) -> Result<Self> {
        let path = Self::path(runtime)?;
        if !runtime.exists(&path) {
            debug!("No settings at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let text = runtime.read_to_string(&path)?;
        serde_json::from_str(&text).with_context(|| format!("Failed to parse settings {:?}", path))
    }

    #[tracing::instrument(skip(self, runtime))]
    pub fn save<R: Runtime + ?Sized>(&self, runtime: &R) -> Result<()> {
        let path = Self::path(runtime)?;
        if let Some(parent) = path.parent() {
            runtime.create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        let tmp_path = path.with_extension("json.tmp");
        runtime.write(&tmp_path, json.as_bytes())?;
        runtime.rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Append a source. Returns false if it is already configured.
    pub fn add_source(&mut self, url: &str) -> bool {
        if self.sources.iter().any(|s| s == url) {
            return false;
        }
        self.sources.push(url.to_string());
        true
    }

    pub fn remove_source(&mut self, url: &str) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| s != url);
        self.sources.len() != before
    }
}

/// Pick the installation root: explicit path, then `PKGMAN_ROOT`, then the
/// saved settings, then `~/.pkgman`.
#[tracing::instrument(skip(runtime, settings))]
pub fn install_root<R: Runtime + ?Sized>(
    runtime: &R,
    explicit: Option<PathBuf>,
    settings: &Settings,
) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    if let Ok(path) = runtime.env_var(ROOT_ENV)
        && !path.is_empty()
    {
        return Ok(PathBuf::from(path));
    }
    if let Some(path) = &settings.install_root {
        return Ok(path.clone());
    }
    let home = runtime.home_dir().context("Could not find home directory")?;
    Ok(home.join(DEFAULT_ROOT_DIR))
}

/// HTTP client used for catalog sources and downloads.
pub fn http_client<R: Runtime + ?Sized>(runtime: &R) -> Result<Client> {
    let mut headers = HeaderMap::new();
    if let Ok(token) = runtime.env_var(TOKEN_ENV)
        && !token.is_empty()
    {
        let mut auth_value = HeaderValue::from_str(&format!("Bearer {}", token))?;
        auth_value.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth_value);
        debug!("Using {} for authentication", TOKEN_ENV);
    }

    let client = Client::builder()
        .user_agent(concat!("pkgman/", env!("PKGMAN_VERSION")))
        .default_headers(headers)
        .build()?;
    Ok(client)
}
