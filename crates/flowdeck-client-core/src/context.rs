//! Request context attached to every widget-originated call.
//!
//! The hosting panel owns one `RequestContext` per render pass; the fetch
//! adapter projects it onto the `x-flowdeck-*` header namespace so the
//! backend can attribute traffic to a workflow, an optional node, and the
//! embedded chat surface.

use serde::{Deserialize, Serialize};

/// Fixed actor tag identifying the embedded chat surface as the caller.
pub const ACTOR_EMBEDDED_CHAT: &str = "embedded_chat";

pub const HEADER_WORKFLOW_ID: &str = "x-flowdeck-workflow-id";
pub const HEADER_WORKFLOW_NAME: &str = "x-flowdeck-workflow-name";
pub const HEADER_NODE_ID: &str = "x-flowdeck-node-id";
pub const HEADER_ACTOR: &str = "x-flowdeck-actor";
pub const HEADER_SURFACE_LABEL: &str = "x-flowdeck-surface-label";

/// Prefix of the header namespace the fetch adapter owns.
pub const CONTEXT_HEADER_PREFIX: &str = "x-flowdeck-";

/// Identity of the hosted chat context for one render pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub workflow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_name: Option<String>,
    /// Node the chat panel is currently scoped to. Changes here are the
    /// signal for session discontinuity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Human-readable label for the panel instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surface_label: Option<String>,
}

impl RequestContext {
    #[must_use]
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            workflow_name: None,
            node_id: None,
            surface_label: None,
        }
    }

    /// Whether the context carries the identity required for outbound
    /// calls. Blank workflow ids make the adapter unusable.
    #[must_use]
    pub fn is_actionable(&self) -> bool {
        !self.workflow_id.trim().is_empty()
    }

    /// Deterministic header projection. Blank optional fields are skipped;
    /// the actor tag is always present.
    #[must_use]
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![(HEADER_WORKFLOW_ID, self.workflow_id.trim().to_string())];
        if let Some(name) = non_blank(self.workflow_name.as_deref()) {
            headers.push((HEADER_WORKFLOW_NAME, name));
        }
        if let Some(node_id) = non_blank(self.node_id.as_deref()) {
            headers.push((HEADER_NODE_ID, node_id));
        }
        headers.push((HEADER_ACTOR, ACTOR_EMBEDDED_CHAT.to_string()));
        if let Some(label) = non_blank(self.surface_label.as_deref()) {
            headers.push((HEADER_SURFACE_LABEL, label));
        }
        headers
    }
}

/// Whether a header name falls inside the adapter-owned namespace.
#[must_use]
pub fn is_context_header(name: &str) -> bool {
    name.to_ascii_lowercase().starts_with(CONTEXT_HEADER_PREFIX)
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|trimmed| !trimmed.is_empty())
        .map(str::to_string)
}
