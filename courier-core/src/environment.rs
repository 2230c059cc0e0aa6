//! Ambient inputs the reducer needs but must not produce itself.
//!
//! Identifiers, wall-clock time, device metadata and randomness all come
//! through [`Environment`] so that reducing the same action sequence
//! against the same environment yields the same state.

use std::sync::atomic::{AtomicU64, Ordering};

use courier_types::{DeviceContext, PushBackground, RequestId};
use uuid::Uuid;

/// Source of identifiers, time, device metadata and jitter.
pub trait Environment: Send + Sync {
    /// A fresh UUID.
    fn new_uuid(&self) -> Uuid;

    /// Current Unix time in seconds.
    fn now(&self) -> u64;

    /// Uniform random value in `0..=max`.
    fn jitter(&self, max: u64) -> u64;

    /// Metadata attached to push-token registrations.
    fn device_context(&self) -> DeviceContext;

    /// Background refresh availability.
    fn push_background(&self) -> PushBackground;

    /// A fresh request identifier.
    fn request_id(&self) -> RequestId {
        RequestId::from_uuid(self.new_uuid())
    }
}

/// Random value in `0..=max` from the OS entropy source.
///
/// Falls back to zero jitter if the entropy source is unavailable.
pub fn random_jitter(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    let mut bytes = [0u8; 8];
    match getrandom::getrandom(&mut bytes) {
        Ok(()) => u64::from_le_bytes(bytes) % max.saturating_add(1),
        Err(_) => 0,
    }
}

/// Deterministic environment for tests.
///
/// UUIDs count up from 1, time is fixed, jitter is always zero.
#[derive(Debug)]
pub struct TestEnvironment {
    counter: AtomicU64,
    now: u64,
}

impl TestEnvironment {
    /// Create an environment whose clock reads `now`.
    pub fn new(now: u64) -> Self {
        Self {
            counter: AtomicU64::new(0),
            now,
        }
    }

    /// The UUID the `n`th call to [`Environment::new_uuid`] returns (1-based).
    pub fn uuid(n: u64) -> Uuid {
        Uuid::from_u128(u128::from(n))
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new(1_700_000_000)
    }
}

impl Environment for TestEnvironment {
    fn new_uuid(&self) -> Uuid {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        Self::uuid(n)
    }

    fn now(&self) -> u64 {
        self.now
    }

    fn jitter(&self, _max: u64) -> u64 {
        0
    }

    fn device_context(&self) -> DeviceContext {
        DeviceContext {
            device_id: "test-device".into(),
            device_model: "Test Model".into(),
            os_name: "TestOS".into(),
            os_version: "1.0".into(),
            app_id: "com.example.test".into(),
            app_name: "Test App".into(),
            app_version: "1.0.0".into(),
            app_build: "1".into(),
            sdk_name: "courier".into(),
            sdk_version: env!("CARGO_PKG_VERSION").into(),
        }
    }

    fn push_background(&self) -> PushBackground {
        PushBackground::Available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_counts_up() {
        let env = TestEnvironment::default();
        assert_eq!(env.new_uuid(), TestEnvironment::uuid(1));
        assert_eq!(
            env.request_id(),
            RequestId::from_uuid(TestEnvironment::uuid(2))
        );
    }

    #[test]
    fn random_jitter_stays_in_range() {
        for _ in 0..100 {
            assert!(random_jitter(10) <= 10);
        }
        assert_eq!(random_jitter(0), 0);
    }

    #[test]
    fn random_jitter_varies() {
        let samples: Vec<u64> = (0..20).map(|_| random_jitter(1_000_000)).collect();
        let min = samples.iter().min().unwrap();
        let max = samples.iter().max().unwrap();
        assert!(max > min, "expected variance, got {:?}", samples);
    }
}
