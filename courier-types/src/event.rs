//! Custom events tracked by the application.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Properties;

/// A custom event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Metric name
    pub name: EventName,
    /// Caller-supplied properties
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    pub properties: Properties,
    /// Monetary or numeric value of the event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// Caller-supplied deduplication key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    /// Identity attached to this event; unset fields fall back to the
    /// pipeline's current identity when the request is built.
    #[serde(default, skip_serializing_if = "Identifiers::is_empty")]
    pub identifiers: Identifiers,
}

impl Event {
    /// Create an event with no properties.
    pub fn new(name: EventName) -> Self {
        Self {
            name,
            properties: Properties::new(),
            value: None,
            unique_id: None,
            identifiers: Identifiers::default(),
        }
    }

    /// Attach properties.
    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    /// Attach a value.
    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }
}

/// Identity fields that may accompany an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifiers {
    /// Email address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Phone number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    /// Application-assigned user id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

impl Identifiers {
    /// True when no identity field is set.
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.phone_number.is_none() && self.external_id.is_none()
    }

    /// Fill unset fields from `fallback`. Fields already set win.
    pub fn or(self, fallback: &Identifiers) -> Identifiers {
        Identifiers {
            email: self.email.or_else(|| fallback.email.clone()),
            phone_number: self.phone_number.or_else(|| fallback.phone_number.clone()),
            external_id: self.external_id.or_else(|| fallback.external_id.clone()),
        }
    }
}

/// Event metric name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum EventName {
    /// The user opened a push notification
    OpenedPush,
    /// The user viewed a product
    ViewedProduct,
    /// The user added an item to the cart
    AddedToCart,
    /// The user started checkout
    StartedCheckout,
    /// Application-defined metric
    Custom(String),
}

impl EventName {
    fn as_str(&self) -> &str {
        match self {
            Self::OpenedPush => "$opened_push",
            Self::ViewedProduct => "Viewed Product",
            Self::AddedToCart => "Added to Cart",
            Self::StartedCheckout => "Started Checkout",
            Self::Custom(name) => name,
        }
    }
}

impl From<String> for EventName {
    fn from(s: String) -> Self {
        match s.as_str() {
            "$opened_push" => Self::OpenedPush,
            "Viewed Product" => Self::ViewedProduct,
            "Added to Cart" => Self::AddedToCart,
            "Started Checkout" => Self::StartedCheckout,
            _ => Self::Custom(s),
        }
    }
}

impl From<&str> for EventName {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<EventName> for String {
    fn from(name: EventName) -> String {
        match name {
            EventName::Custom(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_or_prefers_own_fields() {
        let own = Identifiers {
            email: Some("own@example.com".into()),
            ..Identifiers::default()
        };
        let fallback = Identifiers {
            email: Some("state@example.com".into()),
            phone_number: Some("+15555555555".into()),
            external_id: None,
        };

        let merged = own.or(&fallback);
        assert_eq!(merged.email.as_deref(), Some("own@example.com"));
        assert_eq!(merged.phone_number.as_deref(), Some("+15555555555"));
        assert!(merged.external_id.is_none());
    }

    #[test]
    fn well_known_event_names_roundtrip_through_strings() {
        let json = serde_json::to_string(&EventName::OpenedPush).unwrap();
        assert_eq!(json, "\"$opened_push\"");
        let back: EventName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EventName::OpenedPush);
    }

    #[test]
    fn custom_event_name_display() {
        assert_eq!(EventName::from("Signed Up").to_string(), "Signed Up");
    }

    #[test]
    fn empty_identifiers_are_omitted() {
        let json = serde_json::to_value(Event::new(EventName::AddedToCart)).unwrap();
        assert!(json.get("identifiers").is_none());
    }
}
