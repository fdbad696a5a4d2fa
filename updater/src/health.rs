// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Decides whether the cluster can tolerate taking another backend host
//! offline.

use reef_cluster_client::types::{ClusterStatus, RebuildStatus};
use reef_cluster_client::ClusterCli;
use slog::{info, Logger};
use slog_error_chain::InlineErrorChain;

const MIB: u64 = 1 << 20;

/// Verbosity-gated wrapper around [`RebuildStatus::is_fully_protected`].
///
/// The boolean result comes from the rebuild status alone; the overall
/// status label is only quoted in diagnostics.
pub struct HealthCheck<'a> {
    cli: &'a ClusterCli,
    log: Logger,
}

impl<'a> HealthCheck<'a> {
    pub fn new(cli: &'a ClusterCli, log: Logger) -> Self {
        Self { cli, log }
    }

    /// Evaluate the cluster's protection state.
    ///
    /// `report` controls diagnostic output only (the rebuild table and,
    /// while rebuilding, the configured scrubber rate); it never changes
    /// the returned value, and diagnostic failures never fail the check.
    pub async fn is_fully_protected(
        &self,
        status: &ClusterStatus,
        rebuild: &RebuildStatus,
        report: bool,
    ) -> bool {
        if rebuild.unavailable_mib != 0 {
            if report {
                self.cli.show_rebuild_status().await;
                info!(
                    self.log,
                    "cluster has too many failures, rebuilding";
                    "status" => %status.status,
                    "unavailable_mib" => rebuild.unavailable_mib,
                );
            }
            return false;
        }

        if !rebuild.is_fully_protected() {
            if report {
                self.cli.show_rebuild_status().await;
                match self.cli.scrubber_rate_limit().await {
                    Ok(rate) => {
                        info!(
                            self.log,
                            "still has failures, rebuilding";
                            "status" => %status.status,
                            "scrubber_mib_per_sec" => rate / MIB,
                        );
                    }
                    Err(err) => {
                        info!(
                            self.log,
                            "still has failures, rebuilding \
                             (scrubber rate unavailable)";
                            "status" => %status.status,
                            "err" => %InlineErrorChain::new(&err),
                        );
                    }
                }
            }
            return false;
        }

        if report {
            self.cli.show_rebuild_status().await;
            info!(
                self.log,
                "cluster is fully protected";
                "status" => %status.status,
            );
        }
        true
    }
}
