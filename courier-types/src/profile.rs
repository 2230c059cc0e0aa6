//! Profile model.
//!
//! A [`Profile`] is the identity and attribute snapshot sent with profile
//! and push-token requests. [`ProfileKey`] names a single settable field so
//! that edits can be accumulated before they are turned into a request.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Free-form custom properties attached to profiles and events.
pub type Properties = serde_json::Map<String, Value>;

/// Identity and attributes of the current user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Email address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Phone number in E.164 format
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    /// Application-assigned user id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Given name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// Family name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// Employer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    /// Job title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Avatar URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Postal location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    /// Custom properties
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    pub properties: Properties,
}

/// Postal location of a profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// First address line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address1: Option<String>,
    /// Second address line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address2: Option<String>,
    /// City
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    /// Country
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// State or region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Postal code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip: Option<String>,
    /// IANA timezone name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Latitude in degrees
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    /// Longitude in degrees
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl Profile {
    /// Create a profile identified only by email.
    pub fn with_email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            ..Self::default()
        }
    }

    /// Set a single field from a key/value pair.
    ///
    /// String fields accept any JSON value (non-strings are stored in their
    /// JSON text form). Coordinates take numbers or numeric strings; returns
    /// `false` when the value was rejected.
    pub fn apply(&mut self, key: &ProfileKey, value: Value) -> bool {
        let text = |value: Value| match value {
            Value::String(s) => s,
            other => other.to_string(),
        };
        let degrees = |value: &Value| match value {
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|d| d.is_finite()),
            other => other.as_f64(),
        };
        match key {
            ProfileKey::FirstName => self.first_name = Some(text(value)),
            ProfileKey::LastName => self.last_name = Some(text(value)),
            ProfileKey::Organization => self.organization = Some(text(value)),
            ProfileKey::Title => self.title = Some(text(value)),
            ProfileKey::Image => self.image = Some(text(value)),
            ProfileKey::Address1 => self.location_mut().address1 = Some(text(value)),
            ProfileKey::Address2 => self.location_mut().address2 = Some(text(value)),
            ProfileKey::City => self.location_mut().city = Some(text(value)),
            ProfileKey::Country => self.location_mut().country = Some(text(value)),
            ProfileKey::Region => self.location_mut().region = Some(text(value)),
            ProfileKey::Zip => self.location_mut().zip = Some(text(value)),
            ProfileKey::Timezone => self.location_mut().timezone = Some(text(value)),
            ProfileKey::Latitude => match degrees(&value) {
                Some(lat) => self.location_mut().latitude = Some(lat),
                None => return false,
            },
            ProfileKey::Longitude => match degrees(&value) {
                Some(lng) => self.location_mut().longitude = Some(lng),
                None => return false,
            },
            ProfileKey::Custom(name) => {
                self.properties.insert(name.clone(), value);
            }
        }
        true
    }

    /// Copy every field set in `other` over this profile.
    ///
    /// Unset fields in `other` leave this profile's values alone; custom
    /// properties are merged key by key.
    pub fn overlay(&mut self, other: Profile) {
        fn take<T>(dst: &mut Option<T>, src: Option<T>) {
            if src.is_some() {
                *dst = src;
            }
        }

        take(&mut self.email, other.email);
        take(&mut self.phone_number, other.phone_number);
        take(&mut self.external_id, other.external_id);
        take(&mut self.first_name, other.first_name);
        take(&mut self.last_name, other.last_name);
        take(&mut self.organization, other.organization);
        take(&mut self.title, other.title);
        take(&mut self.image, other.image);
        if let Some(src) = other.location {
            let dst = self.location_mut();
            take(&mut dst.address1, src.address1);
            take(&mut dst.address2, src.address2);
            take(&mut dst.city, src.city);
            take(&mut dst.country, src.country);
            take(&mut dst.region, src.region);
            take(&mut dst.zip, src.zip);
            take(&mut dst.timezone, src.timezone);
            take(&mut dst.latitude, src.latitude);
            take(&mut dst.longitude, src.longitude);
        }
        self.properties.extend(other.properties);
    }

    fn location_mut(&mut self) -> &mut Location {
        self.location.get_or_insert_with(Location::default)
    }
}

/// A single settable profile attribute.
///
/// Serializes as a plain string so maps keyed by it stay valid JSON objects.
/// Custom keys carry a `custom:` prefix so one named like a well-known
/// field (say `city`) stays custom after a round trip. Unprefixed unknown
/// names also read back as custom keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ProfileKey {
    /// Given name
    FirstName,
    /// Family name
    LastName,
    /// Employer
    Organization,
    /// Job title
    Title,
    /// Avatar URL
    Image,
    /// First address line
    Address1,
    /// Second address line
    Address2,
    /// City
    City,
    /// Country
    Country,
    /// State or region
    Region,
    /// Postal code
    Zip,
    /// IANA timezone name
    Timezone,
    /// Latitude in degrees
    Latitude,
    /// Longitude in degrees
    Longitude,
    /// Application-defined property
    Custom(String),
}

const CUSTOM_PREFIX: &str = "custom:";

impl ProfileKey {
    fn as_str(&self) -> &str {
        match self {
            Self::FirstName => "first_name",
            Self::LastName => "last_name",
            Self::Organization => "organization",
            Self::Title => "title",
            Self::Image => "image",
            Self::Address1 => "address1",
            Self::Address2 => "address2",
            Self::City => "city",
            Self::Country => "country",
            Self::Region => "region",
            Self::Zip => "zip",
            Self::Timezone => "timezone",
            Self::Latitude => "latitude",
            Self::Longitude => "longitude",
            Self::Custom(name) => name,
        }
    }
}

impl From<String> for ProfileKey {
    fn from(s: String) -> Self {
        if let Some(name) = s.strip_prefix(CUSTOM_PREFIX) {
            return Self::Custom(name.to_string());
        }
        match s.as_str() {
            "first_name" => Self::FirstName,
            "last_name" => Self::LastName,
            "organization" => Self::Organization,
            "title" => Self::Title,
            "image" => Self::Image,
            "address1" => Self::Address1,
            "address2" => Self::Address2,
            "city" => Self::City,
            "country" => Self::Country,
            "region" => Self::Region,
            "zip" => Self::Zip,
            "timezone" => Self::Timezone,
            "latitude" => Self::Latitude,
            "longitude" => Self::Longitude,
            _ => Self::Custom(s),
        }
    }
}

impl From<ProfileKey> for String {
    fn from(key: ProfileKey) -> String {
        match key {
            ProfileKey::Custom(name) => format!("{}{}", CUSTOM_PREFIX, name),
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for ProfileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
