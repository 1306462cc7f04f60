//! Webhook authentication and dispatch.
//!
//! Turns a raw `WebhookEvent` into an `Outcome`. Nothing here touches the
//! filesystem or network.

use hex::decode as hex_decode;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, error};

use crate::transport::WebhookEvent;

type HmacSha256 = Hmac<Sha256>;

pub const EVENT_HEADER: &str = "X-GitHub-Event";
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
const SIGNATURE_PREFIX: &str = "sha256=";

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Repository {
    pub name: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Pusher {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Commit {
    pub id: String,
    #[serde(default)]
    pub message: String,
}

/// GitHub push event, reduced to the fields the deployment records use.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PushPayload {
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default)]
    pub before: Option<String>,
    #[serde(default)]
    pub after: Option<String>,
    pub repository: Repository,
    #[serde(default)]
    pub pusher: Option<Pusher>,
    #[serde(default)]
    pub head_commit: Option<Commit>,
}

impl PushPayload {
    /// Branch name with the `refs/heads/` prefix stripped.
    pub fn branch(&self) -> &str {
        self.reference
            .strip_prefix("refs/heads/")
            .unwrap_or(&self.reference)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ReleasePayload {
    pub action: String,
    pub release: Release,
    pub repository: Repository,
}

/// A signature-verified, decoded webhook body.
#[derive(Debug, Clone, PartialEq)]
pub enum SignedPayload {
    Push(PushPayload),
    Release(ReleasePayload),
}

/// Kinds of events the dispatcher subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Push,
    Release,
}

impl EventKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "push" => Some(EventKind::Push),
            "release" => Some(EventKind::Release),
            _ => None,
        }
    }
}

/// Result of classifying one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Not a POST; answered with 400 before any verification.
    Rejected,
    /// Event kind outside the subscribed set.
    Ignored { event: String },
    /// A verified push. Deployment should run.
    Triggered(PushPayload),
    /// A verified release. Recognized but does not deploy.
    Accepted(ReleasePayload),
    AuthError(String),
    ParseError(String),
}

/// Classify a delivery. `secret` of `None` disables signature checking.
pub fn handle(event: &WebhookEvent, secret: Option<&str>) -> Outcome {
    if !event.is_post() {
        return Outcome::Rejected;
    }

    let Some(event_name) = event.header(EVENT_HEADER) else {
        return Outcome::ParseError(format!("missing {} header", EVENT_HEADER));
    };
    let Some(kind) = EventKind::parse(event_name) else {
        return Outcome::Ignored {
            event: event_name.to_string(),
        };
    };

    if let Some(secret) = secret {
        let Some(signature) = event.header(SIGNATURE_HEADER) else {
            return Outcome::AuthError(format!("missing {} header", SIGNATURE_HEADER));
        };
        if !verify_github_signature(secret, &event.body, signature) {
            return Outcome::AuthError("HMAC verification failed".to_string());
        }
    }

    match parse_payload(kind, &event.body) {
        Ok(SignedPayload::Push(push)) => Outcome::Triggered(push),
        Ok(SignedPayload::Release(release)) => Outcome::Accepted(release),
        Err(e) => Outcome::ParseError(e.to_string()),
    }
}

pub fn parse_payload(kind: EventKind, body: &[u8]) -> serde_json::Result<SignedPayload> {
    match kind {
        EventKind::Push => serde_json::from_slice(body).map(SignedPayload::Push),
        EventKind::Release => serde_json::from_slice(body).map(SignedPayload::Release),
    }
}

/// Verify a GitHub `sha256=<hex>` signature over the raw body.
pub fn verify_github_signature(secret: &str, payload: &[u8], signature_header: &str) -> bool {
    let Some(git_signature) = signature_header.strip_prefix(SIGNATURE_PREFIX) else {
        debug!("Signature header lacks '{}' prefix", SIGNATURE_PREFIX);
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);

    match hex_decode(git_signature) {
        Ok(git_signature_bytes) => mac.verify_slice(&git_signature_bytes).is_ok(),
        Err(_) => {
            error!("Signature is not valid hex");
            false
        }
    }
}

#[cfg(test)]
pub(crate) fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "It's a Secret to Everybody";
    const PUSH: &str = r#"{
        "ref": "refs/heads/master",
        "before": "6113728f27ae82c7b1a177c8d03f9e96e0adf246",
        "after": "59b20b8d5c6ff8d09518454d4dd8b7b30f095ab5",
        "repository": {"name": "ebfe_site", "full_name": "santrancisco/ebfe_site"},
        "pusher": {"name": "santrancisco"},
        "head_commit": {"id": "59b20b8d", "message": "new post"}
    }"#;
    const RELEASE: &str = r#"{
        "action": "published",
        "release": {"tag_name": "v1.0.0"},
        "repository": {"name": "ebfe_site"}
    }"#;

    fn signed(kind: &str, body: &str) -> WebhookEvent {
        WebhookEvent::new("POST", "/webhook", body.as_bytes().to_vec())
            .with_header(EVENT_HEADER, kind)
            .with_header(SIGNATURE_HEADER, sign(SECRET, body.as_bytes()))
    }

    #[test]
    fn github_documented_signature_verifies() {
        // Example from GitHub's webhook validation docs.
        let sig = "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17";
        assert!(verify_github_signature(SECRET, b"Hello, World!", sig));
        assert!(!verify_github_signature(SECRET, b"Hello, World?", sig));
    }

    #[test]
    fn rejects_malformed_signature_headers() {
        assert!(!verify_github_signature(SECRET, b"x", "sha1=abcdef"));
        assert!(!verify_github_signature(SECRET, b"x", "sha256=not-hex"));
    }

    #[test]
    fn valid_push_triggers() {
        let outcome = handle(&signed("push", PUSH), Some(SECRET));
        let Outcome::Triggered(push) = outcome else {
            panic!("expected Triggered, got {:?}", outcome);
        };
        assert_eq!(push.branch(), "master");
        assert_eq!(push.repository.name, "ebfe_site");
    }

    #[test]
    fn bad_signature_is_auth_error() {
        let event = signed("push", PUSH).with_header(SIGNATURE_HEADER, sign("wrong", PUSH.as_bytes()));
        let outcome = handle(&event, Some(SECRET));
        assert!(matches!(outcome, Outcome::AuthError(_)));
    }

    #[test]
    fn missing_signature_is_auth_error() {
        let event = WebhookEvent::new("POST", "/", PUSH.as_bytes().to_vec()).with_header(EVENT_HEADER, "push");
        assert!(matches!(handle(&event, Some(SECRET)), Outcome::AuthError(_)));
    }

    #[test]
    fn unsigned_push_passes_without_secret() {
        let event = WebhookEvent::new("POST", "/", PUSH.as_bytes().to_vec()).with_header(EVENT_HEADER, "push");
        assert!(matches!(handle(&event, None), Outcome::Triggered(_)));
    }

    #[test]
    fn unrecognized_event_is_ignored() {
        let outcome = handle(&signed("issues", r#"{"action":"opened"}"#), Some(SECRET));
        assert_eq!(
            outcome,
            Outcome::Ignored {
                event: "issues".to_string()
            }
        );
    }

    #[test]
    fn release_is_accepted_without_deploying() {
        let outcome = handle(&signed("release", RELEASE), Some(SECRET));
        assert!(matches!(outcome, Outcome::Accepted(ref r) if r.release.tag_name == "v1.0.0"));
    }

    #[test]
    fn non_post_is_rejected_before_verification() {
        let event = WebhookEvent::new("GET", "/webhook", Vec::new());
        assert_eq!(handle(&event, Some(SECRET)), Outcome::Rejected);
    }

    #[test]
    fn malformed_body_is_parse_error() {
        let outcome = handle(&signed("push", r#"{"ref": 12}"#), Some(SECRET));
        assert!(matches!(outcome, Outcome::ParseError(_)));
    }

    #[test]
    fn missing_event_header_is_parse_error() {
        let event = WebhookEvent::new("POST", "/", PUSH.as_bytes().to_vec());
        assert!(matches!(handle(&event, None), Outcome::ParseError(_)));
    }
}
