// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Device identity and the per-request context used for key policy decisions.

use std::fmt;
use std::net::IpAddr;

/// Identity reserved for devices that have not yet been provisioned with their own key.
pub const DEFAULT_FACTORY_DEVICE_ID: &str = "0000000000000000";

/// The identifier a device sends in its request header.
///
/// An empty identity means the header was absent ("unknown device").
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    /// Wrap a header value as sent. `None` yields the unknown identity.
    pub fn from_header(value: Option<&str>) -> Self {
        DeviceIdentity(value.unwrap_or_default().to_string())
    }

    /// The identity as sent by the device.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when no identity was supplied.
    pub fn is_unknown(&self) -> bool {
        self.0.is_empty()
    }

    /// True for the default-factory sentinel.
    pub fn is_default_factory(&self) -> bool {
        self.0 == DEFAULT_FACTORY_DEVICE_ID
    }
}

impl From<&str> for DeviceIdentity {
    fn from(value: &str) -> Self {
        DeviceIdentity(value.to_string())
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything the key policy may look at for one request.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FeatureContext {
    /// The requesting device.
    pub identity: DeviceIdentity,
    /// Groups the device belongs to.
    pub device_groups: Vec<String>,
    /// Groups the source address belongs to.
    pub ip_groups: Vec<String>,
    /// The request's source address, when it could be determined.
    pub source_ip: Option<IpAddr>,
}

impl FeatureContext {
    /// Device groups followed by IP groups, without duplicates.
    pub fn all_groups(&self) -> Vec<String> {
        let mut groups = self.device_groups.clone();
        for group in &self.ip_groups {
            if !groups.contains(group) {
                groups.push(group.clone());
            }
        }
        groups
    }
}
