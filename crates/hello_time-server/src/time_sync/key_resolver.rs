// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Maps a request's device identity to the key used to verify and sign it.
//!
//! Every device gets a lenient lookup except one case: the default-factory identity
//! with the office-only override active, arriving from outside the office ranges,
//! gets a strict lookup. That keeps unprovisioned devices in the field from being
//! served with the shared fallback key.

use std::sync::Arc;

use tracing::debug;

use super::flags::{FeatureFlags, OFFICE_ONLY_OVERRIDE};
use super::identity::FeatureContext;
use super::key_store::{KeyRecord, KeyStore};
use super::network::{self, IpNet};
use crate::error::ValidationError;

/// Which lookup a request gets.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LookupPolicy {
    /// Missing keys fall back to the default key.
    Lenient,
    /// Missing keys are an error.
    Strict,
}

/// Chooses a lookup policy and resolves the key.
#[derive(Clone)]
pub struct KeyResolver {
    store: Arc<dyn KeyStore>,
    flags: Arc<dyn FeatureFlags>,
    office_ranges: Vec<IpNet>,
}

impl KeyResolver {
    /// Create a resolver over the given store and flags.
    pub fn new(
        store: Arc<dyn KeyStore>,
        flags: Arc<dyn FeatureFlags>,
        office_ranges: Vec<IpNet>,
    ) -> Self {
        KeyResolver {
            store,
            flags,
            office_ranges,
        }
    }

    /// The lookup policy for this request.
    pub fn policy(&self, ctx: &FeatureContext) -> LookupPolicy {
        if !ctx.identity.is_default_factory() {
            return LookupPolicy::Lenient;
        }
        let override_active =
            self.flags
                .is_active(OFFICE_ONLY_OVERRIDE, ctx.identity.as_str(), &ctx.all_groups());
        if !override_active {
            return LookupPolicy::Lenient;
        }
        match ctx.source_ip {
            Some(ip) if network::in_any(&self.office_ranges, &ip) => LookupPolicy::Lenient,
            _ => LookupPolicy::Strict,
        }
    }

    /// Resolve the key for this request.
    pub async fn resolve(&self, ctx: &FeatureContext) -> Result<KeyRecord, ValidationError> {
        let device_id = ctx.identity.as_str();
        let policy = self.policy(ctx);
        debug!(device_id, ?policy, "action=resolve-key");
        match policy {
            LookupPolicy::Lenient => Ok(self.store.get(device_id).await?),
            LookupPolicy::Strict => self
                .store
                .get_strict(device_id)
                .await?
                .ok_or(ValidationError::KeyNotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use crate::time_sync::flags::{FeatureRule, StaticFeatureFlags};
    use crate::time_sync::identity::{DEFAULT_FACTORY_DEVICE_ID, DeviceIdentity};
    use crate::time_sync::key_store::{CachedKeyStore, InMemoryKeyBackend, KeyProvenance};

    const DEFAULT: &[u8] = b"1234567891234567";

    fn resolver(override_for_factory: bool) -> KeyResolver {
        let backend = InMemoryKeyBackend::default().with_key("DEVICE1", *b"dddddddddddddddd");
        let store = CachedKeyStore::new(
            backend,
            Duration::from_secs(120),
            Duration::from_secs(1),
            DEFAULT.to_vec(),
        );
        let mut rules = HashMap::new();
        if override_for_factory {
            rules.insert(
                OFFICE_ONLY_OVERRIDE.to_string(),
                FeatureRule {
                    devices: vec![DEFAULT_FACTORY_DEVICE_ID.to_string(), "DEVICE1".to_string()],
                    groups: vec![],
                },
            );
        }
        KeyResolver::new(
            Arc::new(store),
            Arc::new(StaticFeatureFlags::new(rules)),
            vec!["199.87.82.0/24".parse().unwrap()],
        )
    }

    fn ctx(device_id: &str, ip: &str) -> FeatureContext {
        FeatureContext {
            identity: DeviceIdentity::from(device_id),
            source_ip: Some(ip.parse().unwrap()),
            ..FeatureContext::default()
        }
    }

    #[tokio::test]
    async fn test_factory_override_office_ip_is_lenient() {
        let r = resolver(true);
        let c = ctx(DEFAULT_FACTORY_DEVICE_ID, "199.87.82.114");
        assert_eq!(r.policy(&c), LookupPolicy::Lenient);
        let record = r.resolve(&c).await.unwrap();
        assert_eq!(record.key(), DEFAULT);
        assert_eq!(record.provenance(), KeyProvenance::Default);
    }

    #[tokio::test]
    async fn test_factory_override_outside_office_is_strict_and_fails() {
        let r = resolver(true);
        let c = ctx(DEFAULT_FACTORY_DEVICE_ID, "8.8.8.8");
        assert_eq!(r.policy(&c), LookupPolicy::Strict);
        assert_eq!(r.resolve(&c).await, Err(ValidationError::KeyNotFound));
    }

    #[tokio::test]
    async fn test_factory_override_unknown_ip_is_strict() {
        let r = resolver(true);
        let c = FeatureContext {
            identity: DeviceIdentity::from(DEFAULT_FACTORY_DEVICE_ID),
            ..FeatureContext::default()
        };
        assert_eq!(r.policy(&c), LookupPolicy::Strict);
    }

    #[tokio::test]
    async fn test_factory_without_override_is_lenient() {
        let r = resolver(false);
        let c = ctx(DEFAULT_FACTORY_DEVICE_ID, "8.8.8.8");
        assert_eq!(r.policy(&c), LookupPolicy::Lenient);
        assert_eq!(r.resolve(&c).await.unwrap().key(), DEFAULT);
    }

    #[tokio::test]
    async fn test_other_identity_is_lenient_regardless_of_ip() {
        let r = resolver(true);
        for ip in ["8.8.8.8", "199.87.82.114"] {
            let c = ctx("DEVICE1", ip);
            assert_eq!(r.policy(&c), LookupPolicy::Lenient);
            assert_eq!(r.resolve(&c).await.unwrap().key(), b"dddddddddddddddd");
        }
        let c = ctx("UNPROVISIONED", "8.8.8.8");
        assert_eq!(r.resolve(&c).await.unwrap().key(), DEFAULT);
    }

    #[tokio::test]
    async fn test_override_via_ip_group() {
        let backend = InMemoryKeyBackend::default();
        let store = CachedKeyStore::new(
            backend,
            Duration::from_secs(120),
            Duration::from_secs(1),
            DEFAULT.to_vec(),
        );
        let mut rules = HashMap::new();
        rules.insert(
            OFFICE_ONLY_OVERRIDE.to_string(),
            FeatureRule {
                devices: vec![],
                groups: vec!["factory-floor".to_string()],
            },
        );
        let r = KeyResolver::new(
            Arc::new(store),
            Arc::new(StaticFeatureFlags::new(rules)),
            vec![],
        );
        let mut c = ctx(DEFAULT_FACTORY_DEVICE_ID, "10.0.0.9");
        assert_eq!(r.policy(&c), LookupPolicy::Lenient);
        c.ip_groups = vec!["factory-floor".to_string()];
        assert_eq!(r.policy(&c), LookupPolicy::Strict);
    }
}
