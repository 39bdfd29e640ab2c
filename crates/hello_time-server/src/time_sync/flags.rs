// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Feature flags and group membership.
//!
//! Both are injected capabilities: the pipeline only sees the [`FeatureFlags`] and
//! [`GroupMembership`] traits. The static implementations here are backed by the
//! service configuration.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use serde::Deserialize;

/// Flag that restricts default-factory key fallback to office addresses.
pub const OFFICE_ONLY_OVERRIDE: &str = "office_only_override";

/// Flag that logs the raw request bytes for a device.
pub const PRINT_RAW_PB: &str = "print_raw_pb";

/// Answers whether a named feature is active for a device.
pub trait FeatureFlags: Send + Sync {
    /// True if `flag` is active for `device_id` or for any of `groups`.
    fn is_active(&self, flag: &str, device_id: &str, groups: &[String]) -> bool;
}

/// Resolves the groups a device id or an IP address belongs to.
#[async_trait]
pub trait GroupMembership: Send + Sync {
    /// Groups containing `id_or_ip`. Unknown members belong to no group.
    async fn get_groups(&self, id_or_ip: &str) -> Vec<String>;
}

/// Who a flag is enabled for.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct FeatureRule {
    /// Device ids the flag is enabled for.
    pub devices: Vec<String>,
    /// Groups the flag is enabled for.
    pub groups: Vec<String>,
}

/// Flags defined by a fixed rule table.
#[derive(Clone, Debug, Default)]
pub struct StaticFeatureFlags {
    rules: HashMap<String, FeatureRule>,
}

impl StaticFeatureFlags {
    /// Build from a flag → rule table.
    pub fn new(rules: HashMap<String, FeatureRule>) -> Self {
        StaticFeatureFlags { rules }
    }
}

impl FeatureFlags for StaticFeatureFlags {
    fn is_active(&self, flag: &str, device_id: &str, groups: &[String]) -> bool {
        let Some(rule) = self.rules.get(flag) else {
            return false;
        };
        rule.devices.iter().any(|d| d == device_id)
            || rule.groups.iter().any(|g| groups.contains(g))
    }
}

/// Group membership defined by a fixed group → members table.
#[derive(Clone, Debug, Default)]
pub struct StaticGroups {
    by_member: HashMap<String, Vec<String>>,
}

impl StaticGroups {
    /// Build from a group → members table.
    pub fn new(groups: &HashMap<String, Vec<String>>) -> Self {
        let mut by_member: HashMap<String, BTreeSet<String>> = HashMap::new();
        for (group, members) in groups {
            for member in members {
                by_member
                    .entry(member.clone())
                    .or_default()
                    .insert(group.clone());
            }
        }
        StaticGroups {
            by_member: by_member
                .into_iter()
                .map(|(member, groups)| (member, groups.into_iter().collect()))
                .collect(),
        }
    }
}

#[async_trait]
impl GroupMembership for StaticGroups {
    async fn get_groups(&self, id_or_ip: &str) -> Vec<String> {
        self.by_member.get(id_or_ip).cloned().unwrap_or_default()
    }
}
