//! Durable, polled notifications scoped to a ticket.

use chrono::NaiveDateTime;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A technician was given (or re-given) a request.
    AssignmentCreated,
    /// A technician turned a request down; dispatch must act.
    AssignmentDeclined,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Notification {
    pub id: String,
    pub tenant_id: String,
    pub request_id: String,
    pub ticket_code: String,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub recipient_roles: Vec<Role>,
    #[serde(default)]
    pub recipient_users: Vec<String>,
    pub created_at: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<NaiveDateTime>,
}

impl Notification {
    pub fn new(
        tenant_id: &str,
        request_id: &str,
        ticket_code: &str,
        kind: NotificationKind,
        title: impl Into<String>,
        body: impl Into<String>,
        created_at: NaiveDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            request_id: request_id.to_string(),
            ticket_code: ticket_code.to_string(),
            kind,
            title: title.into(),
            body: body.into(),
            recipient_roles: Vec::new(),
            recipient_users: Vec::new(),
            created_at,
            read_at: None,
        }
    }

    pub fn to_roles(mut self, roles: &[Role]) -> Self {
        self.recipient_roles.extend_from_slice(roles);
        self
    }

    pub fn to_user(mut self, user: impl Into<String>) -> Self {
        self.recipient_users.push(user.into());
        self
    }

    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }

    /// Whether any of `identifiers` or `roles` is among the recipients.
    pub fn is_addressed_to<'a>(
        &self,
        mut identifiers: impl Iterator<Item = &'a str>,
        roles: &[Role],
    ) -> bool {
        self.recipient_roles.iter().any(|r| roles.contains(r))
            || identifiers.any(|id| self.recipient_users.iter().any(|u| u == id))
    }
}
