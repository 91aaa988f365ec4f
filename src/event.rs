//! Webhook payloads sent by the code-hosting service

use serde::Deserialize;

use crate::error::{NotifyError, Result};

/// SHA the hosting service sends as `before` for a created ref and as
/// `after` for a deleted ref.
pub const ZERO_SHA: &str = "0000000000000000000000000000000000000000";

#[derive(Debug, Deserialize)]
struct PushPayload {
    repository: Option<RepositoryPayload>,
    before: Option<String>,
    after: Option<String>,
    compare: Option<String>,
    head_commit: Option<CommitPayload>,
    pusher: Option<UserPayload>,
}

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    url: Option<String>,
    name: Option<String>,
    owner: Option<OwnerPayload>,
}

#[derive(Debug, Deserialize)]
struct OwnerPayload {
    name: Option<String>,
    login: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommitPayload {
    committer: Option<UserPayload>,
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    email: Option<String>,
}

/// A push notification, reduced to what dispatch needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    pub owner: String,
    pub repo_name: String,
    pub before: String,
    pub after: String,
    pub repository_url: String,
    pub compare_url: String,
    /// Head commit committer, falling back to the pusher.
    pub committer_email: Option<String>,
    pub pusher_email: Option<String>,
}

impl PushEvent {
    /// `owner/repo`, the identifier rules are matched against.
    pub fn repo_id(&self) -> String {
        format!("{}/{}", self.owner, self.repo_name)
    }

    pub fn is_ref_created(&self) -> bool {
        self.before == ZERO_SHA
    }

    pub fn is_ref_deleted(&self) -> bool {
        self.after == ZERO_SHA
    }

    /// Abbreviated `before..after`, for log lines.
    pub fn sha_range(&self) -> String {
        format!("{}..{}", short_sha(&self.before), short_sha(&self.after))
    }
}

fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}

/// What an inbound webhook body turned out to be
#[derive(Debug)]
pub enum WebhookPayload {
    /// Liveness ping sent when a hook is registered
    Ping { zen: String },
    /// Some other event type, announced by the `X-GitHub-Event` header
    Ignored { event_type: String },
    Push(PushEvent),
}

/// Parse a raw webhook body.
///
/// Any body carrying a `zen` field is a ping, whatever else it contains.
/// `event_type` is the `X-GitHub-Event` header, when the request had one.
pub fn parse_payload(body: &[u8], event_type: Option<&str>) -> Result<WebhookPayload> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| NotifyError::WebhookValidationFailed(format!("invalid JSON body: {}", e)))?;

    if let Some(zen) = value.get("zen") {
        let zen = zen.as_str().unwrap_or_default().to_string();
        return Ok(WebhookPayload::Ping { zen });
    }

    if let Some(event_type) = event_type.filter(|t| *t != "push") {
        return Ok(WebhookPayload::Ignored {
            event_type: event_type.to_string(),
        });
    }

    let payload: PushPayload = serde_json::from_value(value)
        .map_err(|e| NotifyError::WebhookValidationFailed(format!("malformed push payload: {}", e)))?;

    push_event_from_payload(payload).map(WebhookPayload::Push)
}

fn push_event_from_payload(payload: PushPayload) -> Result<PushEvent> {
    let repository = payload
        .repository
        .ok_or_else(|| missing_field("repository"))?;
    let owner = repository
        .owner
        .and_then(|o| o.name.or(o.login))
        .ok_or_else(|| missing_field("repository.owner.name"))?;
    let repo_name = repository
        .name
        .ok_or_else(|| missing_field("repository.name"))?;
    let repository_url = repository
        .url
        .ok_or_else(|| missing_field("repository.url"))?;
    let before = payload.before.ok_or_else(|| missing_field("before"))?;
    let after = payload.after.ok_or_else(|| missing_field("after"))?;

    validate_path_component("repository.owner.name", &owner)?;
    validate_path_component("repository.name", &repo_name)?;

    let pusher_email = payload.pusher.and_then(|p| p.email);
    let committer_email = payload
        .head_commit
        .and_then(|c| c.committer)
        .and_then(|c| c.email)
        .or_else(|| pusher_email.clone());

    Ok(PushEvent {
        owner,
        repo_name,
        before,
        after,
        repository_url,
        compare_url: payload.compare.unwrap_or_default(),
        committer_email,
        pusher_email,
    })
}

fn missing_field(field: &str) -> NotifyError {
    NotifyError::WebhookValidationFailed(format!("push payload has no '{}' field", field))
}

/// Owner and repository names become directories under the workdir.
fn validate_path_component(field: &str, value: &str) -> Result<()> {
    let bad = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains('/')
        || value.contains('\\')
        || value.contains('\0');
    if bad {
        return Err(NotifyError::WebhookValidationFailed(format!(
            "'{}' is not a usable {}",
            value, field
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn push_body() -> serde_json::Value {
        json!({
            "ref": "refs/heads/main",
            "before": "1111111111111111111111111111111111111111",
            "after": "2222222222222222222222222222222222222222",
            "compare": "https://github.com/acme/widgets/compare/111111111111...222222222222",
            "repository": {
                "url": "https://github.com/acme/widgets",
                "name": "widgets",
                "owner": {"name": "acme", "email": null}
            },
            "head_commit": {"committer": {"name": "Dev", "email": "dev@acme.test"}},
            "pusher": {"name": "pusher", "email": "pusher@acme.test"}
        })
    }

    fn parse_push(value: serde_json::Value) -> PushEvent {
        match parse_payload(value.to_string().as_bytes(), Some("push")).unwrap() {
            WebhookPayload::Push(event) => event,
            other => panic!("expected push, got {:?}", other),
        }
    }

    #[test]
    fn zen_field_marks_a_ping() {
        let body = json!({"zen": "Keep it logically awesome.", "hook_id": 1});
        let parsed = parse_payload(body.to_string().as_bytes(), None).unwrap();
        assert!(matches!(parsed, WebhookPayload::Ping { ref zen } if zen == "Keep it logically awesome."));
    }

    #[test]
    fn push_fields_are_extracted() {
        let event = parse_push(push_body());
        assert_eq!(event.owner, "acme");
        assert_eq!(event.repo_name, "widgets");
        assert_eq!(event.repo_id(), "acme/widgets");
        assert_eq!(event.repository_url, "https://github.com/acme/widgets");
        assert_eq!(event.committer_email.as_deref(), Some("dev@acme.test"));
        assert_eq!(event.pusher_email.as_deref(), Some("pusher@acme.test"));
        assert_eq!(event.sha_range(), "1111111..2222222");
        assert!(!event.is_ref_created());
        assert!(!event.is_ref_deleted());
    }

    #[test]
    fn committer_falls_back_to_pusher() {
        let mut body = push_body();
        body["head_commit"] = serde_json::Value::Null;
        let event = parse_push(body);
        assert_eq!(event.committer_email.as_deref(), Some("pusher@acme.test"));
    }

    #[test]
    fn owner_login_is_accepted_when_name_is_absent() {
        let mut body = push_body();
        body["repository"]["owner"] = json!({"login": "acme"});
        assert_eq!(parse_push(body).owner, "acme");
    }

    #[test]
    fn zero_shas_flag_created_and_deleted_refs() {
        let mut body = push_body();
        body["before"] = json!(ZERO_SHA);
        assert!(parse_push(body).is_ref_created());

        let mut body = push_body();
        body["after"] = json!(ZERO_SHA);
        assert!(parse_push(body).is_ref_deleted());
    }

    #[test]
    fn missing_after_is_rejected() {
        let mut body = push_body();
        body.as_object_mut().unwrap().remove("after");
        let err = parse_payload(body.to_string().as_bytes(), None).unwrap_err();
        assert!(err.to_string().contains("'after'"));
    }

    #[test]
    fn traversal_in_repo_name_is_rejected() {
        let mut body = push_body();
        body["repository"]["name"] = json!("..");
        assert!(parse_payload(body.to_string().as_bytes(), None).is_err());

        let mut body = push_body();
        body["repository"]["owner"]["name"] = json!("a/b");
        assert!(parse_payload(body.to_string().as_bytes(), None).is_err());
    }

    #[test]
    fn other_event_types_are_ignored() {
        let body = json!({"action": "opened", "pull_request": {"number": 1}});
        let parsed = parse_payload(body.to_string().as_bytes(), Some("pull_request")).unwrap();
        assert!(matches!(parsed, WebhookPayload::Ignored { ref event_type } if event_type == "pull_request"));
    }

    #[test]
    fn ping_wins_over_event_header() {
        let body = json!({"zen": "Design for failure."});
        let parsed = parse_payload(body.to_string().as_bytes(), Some("ping")).unwrap();
        assert!(matches!(parsed, WebhookPayload::Ping { .. }));
    }

    #[test]
    fn invalid_json_is_rejected() {
        assert!(matches!(
            parse_payload(b"{not json", None),
            Err(NotifyError::WebhookValidationFailed(_))
        ));
    }
}
