//! Fetch → build → sync orchestration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, info_span, Instrument};

use crate::builder::SiteBuilder;
use crate::config::DeployConfig;
use crate::deployment::{Deployment, DeploymentHistory};
use crate::error::Result;
use crate::fetch::ArchiveFetcher;
use crate::storage::ObjectStore;
use crate::sync::{self, SyncReport};

const DEFAULT_MAX_DEPLOYMENTS: usize = 24;

/// One async mutex per bucket name. Deployments to the same bucket run
/// one at a time; the guard covers the whole pipeline since the work dir
/// is shared as well.
#[derive(Default)]
pub struct DeployLocks {
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DeployLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, bucket: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks
                .entry(bucket.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentReport {
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
    pub sync: SyncReport,
}

pub struct Pipeline {
    config: Arc<DeployConfig>,
    fetcher: ArchiveFetcher,
    builder: Arc<dyn SiteBuilder>,
    store: Arc<dyn ObjectStore>,
    locks: DeployLocks,
    history: Arc<Mutex<DeploymentHistory>>,
}

impl Pipeline {
    pub fn new(
        config: Arc<DeployConfig>,
        builder: Arc<dyn SiteBuilder>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            config,
            fetcher: ArchiveFetcher::new(),
            builder,
            store,
            locks: DeployLocks::new(),
            history: Arc::new(Mutex::new(DeploymentHistory::new(DEFAULT_MAX_DEPLOYMENTS))),
        }
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    pub fn history(&self) -> Arc<Mutex<DeploymentHistory>> {
        Arc::clone(&self.history)
    }

    /// Run fetch, build and sync in order under the bucket lock, stopping
    /// at the first error.
    pub async fn run(&self) -> Result<DeploymentReport> {
        let _guard = self.locks.acquire(self.store.bucket()).await;
        self.run_steps().await
    }

    /// The pipeline body. Callers must hold the bucket lock. Nothing
    /// touches the bucket unless fetch and build both succeeded.
    async fn run_steps(&self) -> Result<DeploymentReport> {
        let url = self.config.archive_url();
        info!(step = "fetch", "Fetching {}", url);
        let snapshot = self.fetcher.fetch(&url, &self.config.work_dir).await?;
        let source_dir = snapshot.source_dir();

        info!(step = "build", "Building site using {}", self.config.hugo_bin);
        let output = self.builder.build(&source_dir).await?;
        debug!(step = "build", "Build log:\n{}", output.log);

        let report = sync::sync(&output.dir, self.store.as_ref(), &self.config.key_prefix).await?;

        Ok(DeploymentReport {
            source_dir,
            output_dir: output.dir,
            sync: report,
        })
    }

    /// Fire-and-forget form of `run`: the outcome is logged and recorded in
    /// the history, never returned as an error. The record stays `queued`
    /// while another deployment holds the bucket.
    pub async fn run_logged(&self, mut deployment: Deployment) -> Deployment {
        let deployment_id = deployment.id.clone();
        let span = info_span!("deployment", deployment_id = %deployment_id, bucket = %self.store.bucket());

        async move {
            self.history.lock().await.add(deployment.clone());
            info!("Deployment {} queued", deployment_id);

            let _guard = self.locks.acquire(self.store.bucket()).await;
            deployment.mark_running();
            let running = deployment.clone();
            self.history
                .lock()
                .await
                .update(&deployment_id, move |d| *d = running);
            info!("Deployment {} started", deployment_id);

            match self.run_steps().await {
                Ok(report) => {
                    info!(
                        "Deployment {} completed: {} objects deleted, {} files uploaded",
                        deployment_id,
                        report.sync.deleted,
                        report.sync.uploaded.len()
                    );
                    deployment.mark_success(&report.sync);
                }
                Err(e) => {
                    error!(error_kind = e.kind(), "Deployment {} failed: {}", deployment_id, e);
                    deployment.mark_failed(&e);
                }
            }

            let finished = deployment.clone();
            self.history
                .lock()
                .await
                .update(&deployment_id, move |d| *d = finished);
            deployment
        }
        .instrument(span)
        .await
    }
}
