use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::value::PropertyValue;

/// The fixed set of event categories the server accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventCategory {
    Alert,
    Audit,
    Collectd,
    Exception,
    Job,
    ServiceDiscovery,
    UserDefined,
}

impl EventCategory {
    pub fn parse(s: &str) -> Result<Self, CodecError> {
        match s {
            "ALERT" => Ok(EventCategory::Alert),
            "AUDIT" => Ok(EventCategory::Audit),
            "COLLECTD" => Ok(EventCategory::Collectd),
            "EXCEPTION" => Ok(EventCategory::Exception),
            "JOB" => Ok(EventCategory::Job),
            "SERVICE_DISCOVERY" => Ok(EventCategory::ServiceDiscovery),
            "USER_DEFINED" => Ok(EventCategory::UserDefined),
            other => Err(CodecError::InvalidInput(format!(
                "event category is not one of the supported types: {other}"
            ))),
        }
    }
}

/// A discrete event.
///
/// Invariant: `event_type` is non-empty. `category`, if present, is always
/// one of [`EventCategory`]'s variants by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<EventCategory>,
    #[serde(default)]
    pub dimensions: HashMap<String, String>,
    #[serde(default)]
    pub properties: HashMap<String, PropertyValue>,
    #[serde(rename = "timestamp", skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<i64>,
}

impl Event {
    pub fn new(event_type: impl Into<String>) -> Result<Self, CodecError> {
        let event_type = event_type.into();
        if event_type.is_empty() {
            return Err(CodecError::InvalidInput("event type must not be empty".into()));
        }
        Ok(Event {
            event_type,
            category: None,
            dimensions: HashMap::new(),
            properties: HashMap::new(),
            timestamp_ms: None,
        })
    }

    /// Parse and attach a category, rejecting anything outside the fixed set
    /// [`EventCategory`] enumerates.
    pub fn with_category(mut self, category: &str) -> Result<Self, CodecError> {
        self.category = Some(EventCategory::parse(category)?);
        Ok(self)
    }

    pub fn with_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }

    pub fn with_dimensions(mut self, dimensions: HashMap<String, String>) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn with_properties(mut self, properties: HashMap<String, PropertyValue>) -> Self {
        self.properties = properties;
        self
    }
}
