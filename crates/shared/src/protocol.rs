use serde::{Deserialize, Serialize};

use crate::{
    domain::{Image, SessionId},
    error::SessionFailure,
};

/// Read-only projection of a session handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<Image>,
    pub busy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<SessionFailure>,
    pub can_go_previous: bool,
    pub can_go_next: bool,
    pub history_len: usize,
    /// 1-based; 0 when the history is empty.
    pub position: usize,
    pub has_original: bool,
    pub generate_prompt: String,
    pub edit_prompt: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Generate,
    Edit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SessionEvent {
    RequestStarted { kind: RequestKind, prompt: String },
    Updated(SessionView),
    Failed(SessionFailure),
}
