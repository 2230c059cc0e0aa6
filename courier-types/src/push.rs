//! Push-token registration types.

use serde::{Deserialize, Serialize};

/// Notification authorization granted by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushEnablement {
    /// Notifications allowed
    Authorized,
    /// Notifications refused
    Denied,
    /// The user has not been asked yet
    NotDetermined,
    /// Quiet delivery without an explicit prompt
    Provisional,
    /// Temporary authorization for app clips
    Ephemeral,
}

/// Whether the app may refresh in the background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushBackground {
    /// Background refresh is available
    Available,
    /// The user disabled background refresh
    Denied,
    /// Background refresh is restricted by policy
    Restricted,
}

/// Device and application metadata attached to token registrations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceContext {
    /// Vendor-scoped device identifier
    pub device_id: String,
    /// Hardware model
    pub device_model: String,
    /// Operating system name
    pub os_name: String,
    /// Operating system version
    pub os_version: String,
    /// Bundle identifier of the host app
    pub app_id: String,
    /// Display name of the host app
    pub app_name: String,
    /// Marketing version of the host app
    pub app_version: String,
    /// Build number of the host app
    pub app_build: String,
    /// SDK name
    pub sdk_name: String,
    /// SDK version
    pub sdk_version: String,
}

/// A push token together with the permission state it was registered with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushToken {
    /// Hex-encoded APNs/FCM token
    pub token: String,
    /// Notification authorization
    pub enablement: PushEnablement,
    /// Background refresh availability
    pub background: PushBackground,
    /// Device the token belongs to
    pub device: DeviceContext,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enablement_serializes_snake_case() {
        let json = serde_json::to_string(&PushEnablement::NotDetermined).unwrap();
        assert_eq!(json, "\"not_determined\"");
    }

    #[test]
    fn push_tokens_compare_by_content() {
        let token = PushToken {
            token: "blobtoken".into(),
            enablement: PushEnablement::Authorized,
            background: PushBackground::Available,
            device: DeviceContext::default(),
        };
        let mut changed = token.clone();
        changed.enablement = PushEnablement::Denied;

        assert_eq!(token, token.clone());
        assert_ne!(token, changed);
    }
}
