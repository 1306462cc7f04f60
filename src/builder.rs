//! Static-site build step.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{error, info};

use crate::error::{DeployError, Result};

/// Result of a successful build.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildOutput {
    pub dir: PathBuf,
    pub log: String,
}

#[async_trait]
pub trait SiteBuilder: Send + Sync {
    /// Build the site rooted at `source_dir`. The output directory is only
    /// meaningful when this returns `Ok`.
    async fn build(&self, source_dir: &Path) -> Result<BuildOutput>;
}

/// Runs the `hugo` binary against the snapshot. `bin` may carry leading
/// arguments (`"hugo --minify"`), split on whitespace.
#[derive(Debug, Clone)]
pub struct HugoBuilder {
    pub bin: String,
    pub output_subdir: String,
}

impl HugoBuilder {
    pub fn new(bin: impl Into<String>, output_subdir: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            output_subdir: output_subdir.into(),
        }
    }

    pub fn output_dir(&self, source_dir: &Path) -> PathBuf {
        source_dir.join(&self.output_subdir)
    }
}

#[async_trait]
impl SiteBuilder for HugoBuilder {
    async fn build(&self, source_dir: &Path) -> Result<BuildOutput> {
        let output_dir = self.output_dir(source_dir);
        info!(
            "Running (cwd = '{}'): {} -s {} -d {}",
            source_dir.display(),
            self.bin,
            source_dir.display(),
            output_dir.display()
        );

        let mut parts = self.bin.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| DeployError::Build("hugo command is empty".to_string()))?;

        let output = Command::new(program)
            .args(parts)
            .current_dir(source_dir)
            .arg("-s")
            .arg(source_dir)
            .arg("-d")
            .arg(&output_dir)
            .output()
            .await
            .map_err(|e| {
                error!("{} failed to start: {}", self.bin, e);
                DeployError::Build(format!("{} failed to start: {}", self.bin, e))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let msg = format!(
                "{} exited with {}:\n{}",
                self.bin,
                output.status,
                String::from_utf8_lossy(&output.stderr)
            );
            error!("{}", msg);
            return Err(DeployError::Build(msg));
        }
        info!("{} finished with {}", self.bin, output.status);

        if !output_dir.is_dir() {
            return Err(DeployError::Build(format!(
                "build succeeded but '{}' was not produced",
                output_dir.display()
            )));
        }

        Ok(BuildOutput {
            dir: output_dir,
            log: stdout,
        })
    }
}
