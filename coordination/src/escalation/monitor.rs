//! Escalation monitor: pending assignments that outlived the acceptance SLA.

use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::OperationContext;
use crate::lifecycle::ServiceState;
use crate::model::{Priority, ServiceRequest};
use crate::resilience::DegradedResponse;
use crate::store::{RequestFilter, RequestStore};

const SERVED_BY: &str = "escalation_monitor";

/// One overdue assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EscalationItem {
    pub request_id: String,
    pub ticket_code: String,
    pub title: String,
    pub priority: Priority,
    pub current_state: ServiceState,
    pub assigned_to: String,
    pub assigned_at: NaiveDateTime,
    pub elapsed_minutes: i64,
    /// Minutes past the threshold; zero when exactly at it.
    pub overdue_minutes: i64,
}

impl EscalationItem {
    /// `Some` when `request` is open, pending and at least `threshold` old.
    pub fn evaluate(
        request: &ServiceRequest,
        now: NaiveDateTime,
        threshold: Duration,
    ) -> Option<Self> {
        if !request.is_open() || !request.is_pending_assignment() {
            return None;
        }
        let assigned_at = request.assigned_at?;
        let elapsed = now - assigned_at;
        if elapsed < threshold {
            return None;
        }
        Some(Self {
            request_id: request.id.clone(),
            ticket_code: request.ticket_code.clone(),
            title: request.title.clone(),
            priority: request.priority,
            current_state: request.current_state,
            assigned_to: request.assigned_to.clone().unwrap_or_default(),
            assigned_at,
            elapsed_minutes: elapsed.num_minutes(),
            overdue_minutes: (elapsed - threshold).num_minutes(),
        })
    }
}

pub struct EscalationMonitor {
    requests: Arc<dyn RequestStore>,
    threshold: Duration,
}

impl EscalationMonitor {
    pub fn new(requests: Arc<dyn RequestStore>, threshold: Duration) -> Self {
        Self {
            requests,
            threshold,
        }
    }

    /// Overdue pending assignments, most overdue first.
    pub async fn check_escalations(
        &self,
        ctx: &OperationContext,
    ) -> DegradedResponse<Vec<EscalationItem>> {
        self.check_with_threshold(ctx, self.threshold).await
    }

    /// Same scan with an explicit threshold.
    pub async fn check_with_threshold(
        &self,
        ctx: &OperationContext,
        threshold: Duration,
    ) -> DegradedResponse<Vec<EscalationItem>> {
        let now = ctx.now();

        let pending = match self
            .requests
            .list(&ctx.tenant_id, &RequestFilter::pending())
            .await
        {
            Ok(found) => found,
            Err(e) => {
                warn!(tenant_id = %ctx.tenant_id, error = %e, "Escalation scan unavailable");
                return DegradedResponse::unavailable(
                    Vec::new(),
                    SERVED_BY,
                    format!("pending assignment scan failed: {e}"),
                    now,
                );
            }
        };

        let mut items: Vec<EscalationItem> = pending
            .iter()
            .filter_map(|r| EscalationItem::evaluate(r, now, threshold))
            .collect();
        items.sort_by(|a, b| {
            b.overdue_minutes
                .cmp(&a.overdue_minutes)
                .then_with(|| a.request_id.cmp(&b.request_id))
        });

        debug!(
            tenant_id = %ctx.tenant_id,
            scanned = pending.len(),
            escalated = items.len(),
            "Escalation scan complete"
        );
        DegradedResponse::full(items, SERVED_BY, now)
    }
}
