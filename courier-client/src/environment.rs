//! Production environment backed by the OS clock and entropy source.

use courier_core::{random_jitter, Environment};
use courier_types::{DeviceContext, PushBackground};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Environment using random v4 UUIDs, the system clock and OS entropy.
#[derive(Debug, Clone)]
pub struct SystemEnvironment {
    device: DeviceContext,
    background: PushBackground,
}

impl SystemEnvironment {
    /// Environment reporting `device` with background refresh available.
    pub fn new(device: DeviceContext) -> Self {
        Self {
            device,
            background: PushBackground::Available,
        }
    }

    /// Override the reported background refresh availability.
    pub fn with_push_background(mut self, background: PushBackground) -> Self {
        self.background = background;
        self
    }
}

impl Environment for SystemEnvironment {
    fn new_uuid(&self) -> Uuid {
        Uuid::new_v4()
    }

    fn now(&self) -> u64 {
        // A clock before 1970 reads as the epoch.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn jitter(&self, max: u64) -> u64 {
        random_jitter(max)
    }

    fn device_context(&self) -> DeviceContext {
        self.device.clone()
    }

    fn push_background(&self) -> PushBackground {
        self.background
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuids_are_unique() {
        let env = SystemEnvironment::new(DeviceContext::default());
        assert_ne!(env.new_uuid(), env.new_uuid());
        assert_ne!(env.request_id(), env.request_id());
    }

    #[test]
    fn clock_is_after_2023() {
        let env = SystemEnvironment::new(DeviceContext::default());
        assert!(env.now() > 1_700_000_000);
    }

    #[test]
    fn jitter_stays_in_range() {
        let env = SystemEnvironment::new(DeviceContext::default());
        for _ in 0..100 {
            assert!(env.jitter(10) <= 10);
        }
        assert_eq!(env.jitter(0), 0);
    }

    #[test]
    fn background_override() {
        let env = SystemEnvironment::new(DeviceContext::default())
            .with_push_background(PushBackground::Restricted);
        assert_eq!(env.push_background(), PushBackground::Restricted);
    }
}
