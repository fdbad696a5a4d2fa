// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cluster state as decoded from the `reef` CLI's JSON output.

use serde::Deserialize;
use std::net::IpAddr;

/// Active/total counts for one tracked category of cluster resources.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct CategoryCounts {
    pub active: u64,
    pub total: u64,
}

impl CategoryCounts {
    pub fn all_active(&self) -> bool {
        self.active == self.total
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct HostsStatus {
    pub backends: CategoryCounts,
}

/// The cluster's own summary of its operational state.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ClusterStatus {
    /// Overall status label (e.g. "OK", "DEGRADED"). Informational only;
    /// health decisions are made from the counts and the rebuild status.
    pub status: String,
    pub drives: CategoryCounts,
    pub io_nodes: CategoryCounts,
    pub hosts: HostsStatus,
}

impl ClusterStatus {
    /// Name of the first category with inactive members, if any.
    pub fn first_lagging_category(&self) -> Option<&'static str> {
        if !self.drives.all_active() {
            return Some("drives");
        }
        if !self.io_nodes.all_active() {
            return Some("io-nodes");
        }
        if !self.hosts.backends.all_active() {
            return Some("backend hosts");
        }
        None
    }
}

/// One bucket of capacity at a given redundancy level. Bucket 0 holds the
/// fully-redundant capacity; buckets at higher indices hold capacity that
/// can survive correspondingly fewer additional failures.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct ProtectionBucket {
    #[serde(rename = "numFailures")]
    pub num_failures: u64,
    #[serde(rename = "MiB")]
    pub mib: u64,
}

/// The cluster's rebuild progress report.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct RebuildStatus {
    #[serde(rename = "unavailableMiB")]
    pub unavailable_mib: u64,
    #[serde(rename = "protectionState")]
    pub protection_state: Vec<ProtectionBucket>,
}

impl RebuildStatus {
    /// Whether the cluster can tolerate taking another backend host
    /// offline.
    ///
    /// True when no capacity is unreachable, no capacity sits in a
    /// degraded bucket, and the fully-redundant bucket is non-empty. A
    /// report with no capacity in bucket 0 (including an empty
    /// `protection_state`) is not yet protected, rather than vacuously
    /// safe.
    pub fn is_fully_protected(&self) -> bool {
        if self.unavailable_mib != 0 {
            return false;
        }
        let Some((fully_redundant, degraded)) =
            self.protection_state.split_first()
        else {
            return false;
        };
        fully_redundant.mib != 0 && degraded.iter().all(|bucket| bucket.mib == 0)
    }
}

/// One cluster member, as listed by the host inventory query.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ClusterHost {
    pub hostname: String,
    /// Management IP; also the address the updater connects to over ssh.
    pub host_ip: IpAddr,
}

/// Answer to a per-host backend query.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct BackendInfo {
    pub software_release: String,
}
