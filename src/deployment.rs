use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use uuid::Uuid;

use crate::error::DeployError;
use crate::sync::SyncReport;
use crate::webhook::PushPayload;

/// Maximum length of a stored commit message
const MAX_COMMIT_MSG_LEN: usize = 500;

/// Represents the status of a deployment
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Queued,
    Running,
    Success,
    Failed,
}

/// What started a deployment
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Push,
    Manual,
}

/// One run of the fetch, build and sync pipeline
#[derive(Debug, Clone, Serialize)]
pub struct Deployment {
    pub id: String,
    pub trigger: Trigger,
    pub branch: Option<String>,
    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
    pub pusher: Option<String>,
    pub status: DeploymentStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub objects_deleted: usize,
    pub files_uploaded: usize,
    pub error_kind: Option<String>,
    pub error: Option<String>,
}

impl Deployment {
    /// Create a deployment not tied to any webhook delivery
    pub fn manual() -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            trigger: Trigger::Manual,
            branch: None,
            commit_sha: None,
            commit_message: None,
            pusher: None,
            status: DeploymentStatus::Queued,
            started_at: Utc::now(),
            completed_at: None,
            objects_deleted: 0,
            files_uploaded: 0,
            error_kind: None,
            error: None,
        }
    }

    /// Create a deployment from a verified push payload
    pub fn from_push(push: &PushPayload) -> Self {
        let commit_message = push.head_commit.as_ref().map(|c| {
            if c.message.len() > MAX_COMMIT_MSG_LEN {
                let mut end = MAX_COMMIT_MSG_LEN;
                while !c.message.is_char_boundary(end) {
                    end -= 1;
                }
                format!("{}... (truncated)", &c.message[..end])
            } else {
                c.message.clone()
            }
        });
        Self {
            trigger: Trigger::Push,
            branch: Some(push.branch().to_string()),
            commit_sha: push.after.clone(),
            commit_message,
            pusher: push.pusher.as_ref().map(|p| p.name.clone()),
            ..Self::manual()
        }
    }

    pub fn mark_running(&mut self) {
        self.status = DeploymentStatus::Running;
    }

    pub fn mark_success(&mut self, report: &SyncReport) {
        self.status = DeploymentStatus::Success;
        self.completed_at = Some(Utc::now());
        self.objects_deleted = report.deleted;
        self.files_uploaded = report.uploaded.len();
    }

    pub fn mark_failed(&mut self, error: &DeployError) {
        self.status = DeploymentStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_kind = Some(error.kind().to_string());
        self.error = Some(error.to_string());
        if let DeployError::StorageUpload { uploaded, .. } = error {
            self.files_uploaded = *uploaded;
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            DeploymentStatus::Success | DeploymentStatus::Failed
        )
    }
}

/// Bounded in-memory record of recent deployments, newest last
pub struct DeploymentHistory {
    deployments: VecDeque<Deployment>,
    max: usize,
}

impl DeploymentHistory {
    pub fn new(max: usize) -> Self {
        Self {
            deployments: VecDeque::with_capacity(max),
            max,
        }
    }

    pub fn add(&mut self, deployment: Deployment) {
        if self.max == 0 {
            return;
        }
        while self.deployments.len() >= self.max {
            self.deployments.pop_front();
        }
        self.deployments.push_back(deployment);
    }

    pub fn update<F>(&mut self, id: &str, f: F)
    where
        F: FnOnce(&mut Deployment),
    {
        if let Some(d) = self.deployments.iter_mut().find(|d| d.id == id) {
            f(d);
        }
    }

    pub fn get(&self, id: &str) -> Option<&Deployment> {
        self.deployments.iter().find(|d| d.id == id)
    }

    /// The deployment currently running, if any
    pub fn current(&self) -> Option<&Deployment> {
        self.deployments
            .iter()
            .rev()
            .find(|d| d.status == DeploymentStatus::Running)
    }

    /// Up to `n` deployments, newest first
    pub fn recent(&self, n: usize) -> Vec<Deployment> {
        self.deployments.iter().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.deployments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deployments.is_empty()
    }
}
