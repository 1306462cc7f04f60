//! Process-wide deployment configuration.
//!
//! Built once at startup from defaults, an optional TOML file and the
//! environment, then shared read-only as `Arc<DeployConfig>`.

use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use tracing::info;

use crate::error::{DeployError, Result};

pub const CONFIG_PATH_ENV: &str = "SITE_DEPLOY_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "site_deploy.toml";

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DeployConfig {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub bucket: String,
    pub region: String,
    pub site_host: String,
    pub webhook_secret: Option<String>,
    pub key_prefix: String,
    pub output_subdir: String,
    pub work_dir: PathBuf,
    pub archive_url: Option<String>,
    pub hugo_bin: String,
    pub s3_endpoint: Option<String>,
    pub force_path_style: bool,
    pub bind_address: String,
    pub log_dir: Option<PathBuf>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            owner: "santrancisco".to_string(),
            repo: "ebfe_site".to_string(),
            branch: "master".to_string(),
            bucket: "www.ebfe.pw".to_string(),
            region: "us-east-1".to_string(),
            site_host: "www.ebfe.pw".to_string(),
            webhook_secret: None,
            key_prefix: String::new(),
            output_subdir: "public".to_string(),
            work_dir: PathBuf::from("/tmp/temp"),
            archive_url: None,
            hugo_bin: "hugo".to_string(),
            s3_endpoint: None,
            force_path_style: false,
            bind_address: "127.0.0.1:8888".to_string(),
            log_dir: None,
        }
    }
}

impl DeployConfig {
    /// Load configuration the way the binary does at startup: defaults,
    /// then the TOML file (if any), then environment overrides.
    pub fn load() -> Result<Self> {
        let explicit = std::env::var(CONFIG_PATH_ENV).ok().filter(|v| !v.is_empty());
        let path = explicit
            .clone()
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        let mut config = if Path::new(&path).exists() {
            info!("Loading config from {:?}", path);
            Self::from_file(&path)?
        } else if explicit.is_some() {
            return Err(DeployError::ConfigError(format!(
                "Config file '{}' does not exist",
                path
            )));
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file. Missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path).map_err(|e| {
            DeployError::ConfigError(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        Self::from_toml(&config_str)
    }

    pub fn from_toml(config_str: &str) -> Result<Self> {
        Ok(toml::from_str(config_str)?)
    }

    /// Override fields from the environment. Empty values count as unset.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = get("OWNER") {
            self.owner = v;
        }
        if let Some(v) = get("REPONAME") {
            self.repo = v;
        }
        if let Some(v) = get("BRANCH") {
            self.branch = v;
        }
        if let Some(v) = get("BUCKETNAME") {
            self.bucket = v;
        }
        if let Some(v) = get("REGION") {
            self.region = v;
        }
        if let Some(v) = get("SITEHOST") {
            self.site_host = v;
        }
        if let Some(v) = get("WEBHOOK_SECRET") {
            self.webhook_secret = Some(v);
        }
        if let Some(v) = get("KEY_PREFIX") {
            self.key_prefix = v;
        }
        if let Some(v) = get("WORK_DIR") {
            self.work_dir = PathBuf::from(v);
        }
        if let Some(v) = get("ARCHIVE_URL") {
            self.archive_url = Some(v);
        }
        if let Some(v) = get("HUGO_BIN") {
            self.hugo_bin = v;
        }
        if let Some(v) = get("S3_ENDPOINT") {
            self.s3_endpoint = Some(v);
        }
        if let Some(v) = get("S3_FORCE_PATH_STYLE") {
            self.force_path_style = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = get("BIND_ADDRESS") {
            self.bind_address = v;
        }
        if let Some(v) = get("LOG_DIR") {
            self.log_dir = Some(PathBuf::from(v));
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("owner", &self.owner),
            ("repo", &self.repo),
            ("branch", &self.branch),
            ("bucket", &self.bucket),
            ("output_subdir", &self.output_subdir),
        ] {
            if value.trim().is_empty() {
                return Err(DeployError::ConfigError(format!("'{}' must not be empty", field)));
            }
        }

        let subdir = Path::new(&self.output_subdir);
        let escapes = subdir
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(DeployError::ConfigError(format!(
                "'output_subdir' must be a relative path inside the source tree, got '{}'",
                self.output_subdir
            )));
        }

        // The work dir is removed recursively before every fetch.
        let has_name = self
            .work_dir
            .components()
            .any(|c| matches!(c, Component::Normal(_)));
        let has_dots = self
            .work_dir
            .components()
            .any(|c| matches!(c, Component::CurDir | Component::ParentDir));
        if !has_name || has_dots {
            return Err(DeployError::ConfigError(format!(
                "'work_dir' must name a dedicated directory, got '{}'",
                self.work_dir.display()
            )));
        }
        Ok(())
    }

    /// Archive URL for the tracked branch, unless overridden.
    pub fn archive_url(&self) -> String {
        self.archive_url.clone().unwrap_or_else(|| {
            format!(
                "https://github.com/{}/{}/archive/{}.zip",
                self.owner, self.repo, self.branch
            )
        })
    }

    /// Returns the secret only when it is set and non-empty.
    pub fn secret(&self) -> Option<&str> {
        self.webhook_secret.as_deref().filter(|s| !s.is_empty())
    }
}
