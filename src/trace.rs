use crate::models::{TraceCategory, TraceEvent, TraceLevel};
use chrono::{NaiveDate, Utc};
use serde_json::Value;

/// Append-only buffer of trace events for one run. The simulation loop
/// records into it; the orchestration layer drains it into the results
/// store, tolerating individual write failures.
#[derive(Debug)]
pub struct TraceLog {
    strategy_name: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    events: Vec<TraceEvent>,
}

impl TraceLog {
    pub fn new(strategy_name: &str, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            strategy_name: strategy_name.to_string(),
            start_date,
            end_date,
            events: Vec::new(),
        }
    }

    pub fn record(
        &mut self,
        level: TraceLevel,
        category: TraceCategory,
        message: impl Into<String>,
        data: Option<Value>,
    ) {
        self.events.push(TraceEvent {
            strategy_name: self.strategy_name.clone(),
            start_date: self.start_date,
            end_date: self.end_date,
            timestamp: Utc::now(),
            level,
            category,
            message: message.into(),
            data,
        });
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
