//! Maps a classified delivery to a response and, for pushes, a deployment.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::deployment::Deployment;
use crate::pipeline::Pipeline;
use crate::transport::{ApiGatewayProxyResponse, WebhookEvent};
use crate::webhook::{self, Outcome};

pub const REJECTED_BODY: &str = "Not expecting this type of request";
pub const COMPLETED_BODY: &str = "Completed";

/// How a triggered deployment runs relative to the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Spawn the deployment and answer right away.
    Background,
    /// Run the deployment to completion before answering.
    Inline,
}

/// Classify `event` and start a deployment when it is a verified push.
/// Every POST is answered 200; deployment results only reach the logs.
pub async fn process_delivery(
    pipeline: &Arc<Pipeline>,
    event: &WebhookEvent,
    mode: RunMode,
) -> ApiGatewayProxyResponse {
    let config = pipeline.config();
    if let Some(url) = event.canonical_url(&config.site_host) {
        debug!("Delivery addressed to {}", url);
    }

    match webhook::handle(event, config.secret()) {
        Outcome::Rejected => {
            info!("Rejecting {} request", event.method);
            return ApiGatewayProxyResponse::new(400, REJECTED_BODY);
        }
        Outcome::Ignored { event: kind } => {
            info!("Ignoring '{}' event", kind);
        }
        Outcome::Accepted(release) => {
            info!(
                "Release '{}' ({}) received; releases do not deploy",
                release.release.tag_name, release.action
            );
        }
        Outcome::AuthError(reason) => {
            warn!("Webhook authentication failed: {}", reason);
        }
        Outcome::ParseError(reason) => {
            warn!("Webhook payload could not be parsed: {}", reason);
        }
        Outcome::Triggered(push) => {
            info!(
                "Github push to '{}' on {} triggered a deployment",
                push.branch(),
                push.repository.name
            );
            if push.branch() != config.branch {
                warn!(
                    "Push was to '{}' but '{}' is the deployed branch",
                    push.branch(),
                    config.branch
                );
            }
            let deployment = Deployment::from_push(&push);
            match mode {
                RunMode::Inline => {
                    pipeline.run_logged(deployment).await;
                }
                RunMode::Background => {
                    let pipeline = Arc::clone(pipeline);
                    tokio::spawn(async move {
                        pipeline.run_logged(deployment).await;
                    });
                }
            }
        }
    }

    ApiGatewayProxyResponse::new(200, COMPLETED_BODY)
}
