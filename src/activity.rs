//! Activity/audit log. Mission: every decision that blocks, delays, or
//! fails a trade gets a narrative (§7), written both to `tracing` and to
//! the bus, mirroring the original system's `ActivityLogger`, which wrote
//! every event to both a Postgres audit table and a Redis pub/sub channel.

use crate::models::{AllocationId, OpportunityId, OrderId, PositionId, Symbol, VenueId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityCategory {
    Order,
    Position,
    Funding,
    Risk,
    Capital,
    System,
    Data,
    Analytics,
    Notification,
}

impl ActivityCategory {
    fn as_str(&self) -> &'static str {
        match self {
            ActivityCategory::Order => "order",
            ActivityCategory::Position => "position",
            ActivityCategory::Funding => "funding",
            ActivityCategory::Risk => "risk",
            ActivityCategory::Capital => "capital",
            ActivityCategory::System => "system",
            ActivityCategory::Data => "data",
            ActivityCategory::Analytics => "analytics",
            ActivityCategory::Notification => "notification",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// A single row headed for `audit.execution_events` / the narrative
/// contract of §7: which rule triggered, which metric, observed vs.
/// threshold, and a suggested action where one applies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub category: ActivityCategory,
    pub severity: Severity,
    pub event_type: String,
    pub narrative: String,
    pub metrics: HashMap<String, f64>,
    pub opportunity_id: Option<OpportunityId>,
    pub allocation_id: Option<AllocationId>,
    pub position_id: Option<PositionId>,
    pub order_id: Option<OrderId>,
    pub venue: Option<VenueId>,
    pub symbol: Option<Symbol>,
    pub suggested_action: Option<String>,
    pub timestamp: DateTime<Utc>,
}

pub struct ActivityEventBuilder {
    event: ActivityEvent,
}

impl ActivityEvent {
    pub fn builder(
        category: ActivityCategory,
        event_type: impl Into<String>,
        narrative: impl Into<String>,
    ) -> ActivityEventBuilder {
        ActivityEventBuilder {
            event: ActivityEvent {
                category,
                severity: Severity::Info,
                event_type: event_type.into(),
                narrative: narrative.into(),
                metrics: HashMap::new(),
                opportunity_id: None,
                allocation_id: None,
                position_id: None,
                order_id: None,
                venue: None,
                symbol: None,
                suggested_action: None,
                timestamp: Utc::now(),
            },
        }
    }

    /// Write to the structured log, keyed the way this codebase's existing
    /// modules key their `tracing` calls (component fields + narrative).
    pub fn log(&self) {
        let narrative = self.narrative.as_str();
        match self.severity {
            Severity::Debug => debug!(category = self.category.as_str(), narrative),
            Severity::Info => info!(category = self.category.as_str(), narrative),
            Severity::Warning => warn!(category = self.category.as_str(), narrative),
            Severity::Error | Severity::Critical => {
                error!(category = self.category.as_str(), narrative)
            }
        }
    }
}

impl ActivityEventBuilder {
    pub fn severity(mut self, severity: Severity) -> Self {
        self.event.severity = severity;
        self
    }

    pub fn metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.event.metrics.insert(key.into(), value);
        self
    }

    pub fn opportunity(mut self, id: OpportunityId) -> Self {
        self.event.opportunity_id = Some(id);
        self
    }

    pub fn allocation(mut self, id: AllocationId) -> Self {
        self.event.allocation_id = Some(id);
        self
    }

    pub fn position(mut self, id: PositionId) -> Self {
        self.event.position_id = Some(id);
        self
    }

    pub fn order(mut self, id: OrderId) -> Self {
        self.event.order_id = Some(id);
        self
    }

    pub fn venue(mut self, venue: VenueId) -> Self {
        self.event.venue = Some(venue);
        self
    }

    pub fn symbol(mut self, symbol: Symbol) -> Self {
        self.event.symbol = Some(symbol);
        self
    }

    pub fn suggested_action(mut self, action: impl Into<String>) -> Self {
        self.event.suggested_action = Some(action.into());
        self
    }

    pub fn build(self) -> ActivityEvent {
        self.event
    }
}
