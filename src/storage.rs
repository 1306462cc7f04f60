//! Object storage boundary: list, batch delete and put.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::config::DeployConfig;
use crate::error::{DeployError, Result};

/// Largest batch a single DeleteObjects request accepts.
pub const MAX_DELETE_BATCH: usize = 1000;

/// Outcome of one batch delete. Per-key failures are reported, not raised.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteReport {
    pub deleted: usize,
    /// `(key, reason)` for every object the backend refused to delete.
    pub failed: Vec<(String, String)>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// Every key currently in the bucket.
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Delete up to `MAX_DELETE_BATCH` keys. An `Err` means the whole batch
    /// request failed.
    async fn delete_batch(&self, keys: &[String]) -> Result<DeleteReport>;

    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: Option<&str>) -> Result<()>;
}

/// S3-backed store.
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    pub async fn new(config: &DeployConfig) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));
        if let Some(endpoint) = &config.s3_endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared_config = loader.load().await;

        let mut s3_builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if config.force_path_style {
            s3_builder = s3_builder.force_path_style(true);
        }
        info!(
            "Using S3 bucket '{}' in region '{}'",
            config.bucket, config.region
        );
        Self {
            client: Client::from_conf(s3_builder.build()),
            bucket: config.bucket.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page
                .map_err(|e| DeployError::StorageList(DisplayErrorContext(&e).to_string()))?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );
        }
        debug!("Listed {} objects in '{}'", keys.len(), self.bucket);
        Ok(keys)
    }

    async fn delete_batch(&self, keys: &[String]) -> Result<DeleteReport> {
        if keys.is_empty() {
            return Ok(DeleteReport::default());
        }
        let objects = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| DeployError::StorageDelete(e.to_string()))?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|e| DeployError::StorageDelete(e.to_string()))?;

        let output = self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| DeployError::StorageDelete(DisplayErrorContext(&e).to_string()))?;

        let failed: Vec<(String, String)> = output
            .errors()
            .iter()
            .map(|err| {
                (
                    err.key().unwrap_or_default().to_string(),
                    err.message().or(err.code()).unwrap_or("unknown").to_string(),
                )
            })
            .collect();
        Ok(DeleteReport {
            deleted: keys.len().saturating_sub(failed.len()),
            failed,
        })
    }

    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: Option<&str>) -> Result<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body));
        if let Some(content_type) = content_type {
            request = request.content_type(content_type);
        }
        request
            .send()
            .await
            .map_err(|e| DeployError::StorageUpload {
                failed: vec![format!("{}: {}", key, DisplayErrorContext(&e))],
                uploaded: 0,
            })?;
        Ok(())
    }
}

/// Operations recorded by `MemoryStore`, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    List,
    Delete(Vec<String>),
    Put(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

/// In-process bucket. Used by tests and by `--dry-run`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    bucket: String,
    objects: Mutex<BTreeMap<String, StoredObject>>,
    ops: Mutex<Vec<StoreOp>>,
    fail_list: bool,
    fail_delete_batch: bool,
    fail_delete_keys: HashSet<String>,
    fail_put_keys: HashSet<String>,
}

impl MemoryStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Self::default()
        }
    }

    pub fn with_object(self, key: &str, body: &[u8]) -> Self {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(
                key.to_string(),
                StoredObject {
                    body: body.to_vec(),
                    content_type: None,
                },
            );
        }
        self
    }

    pub fn failing_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    pub fn failing_delete_batch(mut self) -> Self {
        self.fail_delete_batch = true;
        self
    }

    pub fn failing_delete_of(mut self, key: &str) -> Self {
        self.fail_delete_keys.insert(key.to_string());
        self
    }

    pub fn failing_put_of(mut self, key: &str) -> Self {
        self.fail_put_keys.insert(key.to_string());
        self
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .ok()
            .and_then(|objects| objects.get(key).cloned())
    }

    pub fn contents(&self) -> BTreeMap<String, Vec<u8>> {
        self.objects
            .lock()
            .map(|objects| {
                objects
                    .iter()
                    .map(|(k, v)| (k.clone(), v.body.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn ops(&self) -> Vec<StoreOp> {
        self.ops.lock().map(|ops| ops.clone()).unwrap_or_default()
    }

    fn record(&self, op: StoreOp) {
        if let Ok(mut ops) = self.ops.lock() {
            ops.push(op);
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        self.record(StoreOp::List);
        if self.fail_list {
            return Err(DeployError::StorageList("listing disabled".to_string()));
        }
        Ok(self.keys())
    }

    async fn delete_batch(&self, keys: &[String]) -> Result<DeleteReport> {
        self.record(StoreOp::Delete(keys.to_vec()));
        if self.fail_delete_batch {
            return Err(DeployError::StorageDelete("batch rejected".to_string()));
        }
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| DeployError::StorageDelete("memory store lock poisoned".to_string()))?;
        let mut report = DeleteReport::default();
        for key in keys {
            if self.fail_delete_keys.contains(key) {
                report
                    .failed
                    .push((key.clone(), "AccessDenied".to_string()));
                continue;
            }
            objects.remove(key);
            report.deleted += 1;
        }
        Ok(report)
    }

    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: Option<&str>) -> Result<()> {
        self.record(StoreOp::Put(key.to_string()));
        if self.fail_put_keys.contains(key) {
            return Err(DeployError::StorageUpload {
                failed: vec![key.to_string()],
                uploaded: 0,
            });
        }
        self.objects
            .lock()
            .map_err(|_| DeployError::StorageUpload {
                failed: vec![key.to_string()],
                uploaded: 0,
            })?
            .insert(
                key.to_string(),
                StoredObject {
                    body,
                    content_type: content_type.map(str::to_string),
                },
            );
        Ok(())
    }
}
