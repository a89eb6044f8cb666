//! Shadow topic builders and parsers.
//!
//! Topic structure (classic shadows omit the `/name/<shadow>` segment):
//! ```text
//! $aws/things/<thing>/shadow/get
//! $aws/things/<thing>/shadow/get/accepted
//! $aws/things/<thing>/shadow/name/<shadow>/update
//! $aws/things/<thing>/shadow/name/<shadow>/update/delta
//! $aws/things/<thing>/shadow/name/<shadow>/update/documents
//! $aws/things/<thing>/shadow/name/<shadow>/delete/rejected
//! ```

/// Subscription filter covering every shadow topic on the local bus.
pub const LOCAL_SUBSCRIPTION: &str = "$aws/things/+/shadow/#";

/// The three shadow request operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowOp {
    Get,
    Update,
    Delete,
}

impl ShadowOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShadowOp::Get => "get",
            ShadowOp::Update => "update",
            ShadowOp::Delete => "delete",
        }
    }

    pub fn parse(segment: &str) -> Option<Self> {
        match segment {
            "get" => Some(ShadowOp::Get),
            "update" => Some(ShadowOp::Update),
            "delete" => Some(ShadowOp::Delete),
            _ => None,
        }
    }
}

/// Response suffixes published by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Accepted,
    Rejected,
    Delta,
    Documents,
}

impl ResponseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseKind::Accepted => "accepted",
            ResponseKind::Rejected => "rejected",
            ResponseKind::Delta => "delta",
            ResponseKind::Documents => "documents",
        }
    }
}

const RESPONSE_SUFFIXES: [&str; 4] = ["accepted", "rejected", "delta", "documents"];

/// Topic prefix for one shadow: `$aws/things/<thing>/shadow[/name/<shadow>]`.
pub fn shadow_prefix(thing_name: &str, shadow_name: &str) -> String {
    if shadow_name.is_empty() {
        format!("$aws/things/{thing_name}/shadow")
    } else {
        format!("$aws/things/{thing_name}/shadow/name/{shadow_name}")
    }
}

/// Request topic for an operation.
pub fn op_topic(thing_name: &str, shadow_name: &str, op: ShadowOp) -> String {
    format!("{}/{}", shadow_prefix(thing_name, shadow_name), op.as_str())
}

/// Response topic for an operation outcome.
pub fn response_topic(
    thing_name: &str,
    shadow_name: &str,
    op: ShadowOp,
    kind: ResponseKind,
) -> String {
    format!(
        "{}/{}/{}",
        shadow_prefix(thing_name, shadow_name),
        op.as_str(),
        kind.as_str()
    )
}

// Cloud-side topics the sync plane subscribes to.

pub fn cloud_delta_topic(thing_name: &str, shadow_name: &str) -> String {
    response_topic(thing_name, shadow_name, ShadowOp::Update, ResponseKind::Delta)
}

pub fn cloud_documents_topic(thing_name: &str, shadow_name: &str) -> String {
    response_topic(
        thing_name,
        shadow_name,
        ShadowOp::Update,
        ResponseKind::Documents,
    )
}

pub fn cloud_delete_accepted_topic(thing_name: &str, shadow_name: &str) -> String {
    response_topic(
        thing_name,
        shadow_name,
        ShadowOp::Delete,
        ResponseKind::Accepted,
    )
}

/// Whether a topic is a service-published response rather than a request.
pub fn is_response_topic(topic: &str) -> bool {
    topic
        .rsplit('/')
        .next()
        .is_some_and(|last| RESPONSE_SUFFIXES.contains(&last))
}

/// A parsed shadow request topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedShadowTopic {
    pub thing_name: String,
    /// Empty string for the classic shadow.
    pub shadow_name: String,
    pub op: ShadowOp,
}

/// Parse a shadow request topic (classic or named form).
///
/// Returns `None` for response topics and anything outside the shadow
/// topic tree.
pub fn parse_shadow_topic(topic: &str) -> Option<ParsedShadowTopic> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.first() != Some(&"$aws") || parts.get(1) != Some(&"things") {
        return None;
    }

    match parts.as_slice() {
        // $aws/things/<thing>/shadow/<op>
        ["$aws", "things", thing, "shadow", op] => Some(ParsedShadowTopic {
            thing_name: (*thing).to_string(),
            shadow_name: String::new(),
            op: ShadowOp::parse(op)?,
        }),
        // $aws/things/<thing>/shadow/name/<shadow>/<op>
        ["$aws", "things", thing, "shadow", "name", shadow, op] => Some(ParsedShadowTopic {
            thing_name: (*thing).to_string(),
            shadow_name: (*shadow).to_string(),
            op: ShadowOp::parse(op)?,
        }),
        _ => None,
    }
}
