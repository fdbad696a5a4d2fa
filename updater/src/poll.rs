// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! "Wait until healthy" and "wait until unhealthy" poll loops.
//!
//! The two directions encode different things: [`StatusPoller::wait_for_unhealthy`]
//! verifies the cluster registered a host's restart at all, while
//! [`StatusPoller::wait_for_healthy`] is the safety gate confirming the
//! cluster is ready for the next host to go down.

use crate::health::HealthCheck;
use reef_cluster_client::types::{ClusterStatus, RebuildStatus};
use reef_cluster_client::{ClusterCli, ClusterCliError};
use slog::{debug, info, o, warn, Logger};
use slog_error_chain::InlineErrorChain;
use std::time::Duration;
use tokio::time::Instant;

/// Number of poll attempts after which a failing status query abandons
/// the run.
pub const STATUS_MAX_RETRIES: usize = 180;
/// Delay between poll attempts.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

// Diagnostics are reported on every Nth attempt, not every poll.
const UNHEALTHY_REPORT_PERIOD: usize = 3;
const HEALTHY_REPORT_PERIOD: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("exhausted {attempts} attempts querying cluster status")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        err: ClusterCliError,
    },
}

pub struct StatusPoller<'a> {
    cli: &'a ClusterCli,
    health: HealthCheck<'a>,
    log: Logger,
}

impl<'a> StatusPoller<'a> {
    pub fn new(cli: &'a ClusterCli, log: &Logger) -> Self {
        Self {
            cli,
            health: HealthCheck::new(cli, log.clone()),
            log: log.new(o!("component" => "StatusPoller")),
        }
    }

    /// Wait for the cluster to drop out of the fully-protected state.
    ///
    /// Returns as soon as some capacity is seen rebuilding, confirming
    /// that the cluster registered a host's restart.
    pub async fn wait_for_unhealthy(&self) -> Result<(), PollError> {
        let mut attempts = 0;
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;
            attempts += 1;

            let (rebuild, status) =
                match self.query_rebuild_then_status().await {
                    Ok(pair) => pair,
                    Err(err) => {
                        if attempts >= STATUS_MAX_RETRIES {
                            return Err(PollError::RetriesExhausted {
                                attempts,
                                err,
                            });
                        }
                        warn!(
                            self.log,
                            "error querying cluster status, retrying";
                            "err" => %InlineErrorChain::new(&err),
                        );
                        continue;
                    }
                };

            let report = attempts % UNHEALTHY_REPORT_PERIOD == 0;
            if !self.health.is_fully_protected(&status, &rebuild, report).await
            {
                info!(
                    self.log,
                    "seen rebuilding cluster, as expected";
                    "status" => %status.status,
                );
                return Ok(());
            }

            debug!(
                self.log,
                "cluster has not registered the restart yet";
                "status" => %status.status,
            );
        }
    }

    /// Wait for the cluster to return to full protection, with every
    /// drive, io-node, and backend host active.
    ///
    /// The first attempt runs immediately; later attempts are spaced by
    /// [`POLL_INTERVAL`]. On success with `announce` set, logs the elapsed
    /// time since `since`.
    pub async fn wait_for_healthy(
        &self,
        since: Instant,
        announce: bool,
    ) -> Result<(), PollError> {
        let mut attempts = 0;
        loop {
            if attempts > 0 {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            attempts += 1;

            let (status, rebuild) =
                match self.query_status_then_rebuild().await {
                    Ok(pair) => pair,
                    Err(err) => {
                        if attempts >= STATUS_MAX_RETRIES {
                            return Err(PollError::RetriesExhausted {
                                attempts,
                                err,
                            });
                        }
                        warn!(
                            self.log,
                            "error querying cluster status, retrying";
                            "err" => %InlineErrorChain::new(&err),
                        );
                        continue;
                    }
                };

            let report = attempts % HEALTHY_REPORT_PERIOD == 0;
            if !self.health.is_fully_protected(&status, &rebuild, report).await
            {
                continue;
            }

            // Full protection is necessary but not sufficient: every
            // tracked member must be back as well.
            if let Some(category) = status.first_lagging_category() {
                info!(
                    self.log,
                    "not all members are active";
                    "category" => category,
                    "status" => %status.status,
                );
                continue;
            }

            if announce {
                info!(
                    self.log,
                    "=== cluster is healthy ===";
                    "status" => %status.status,
                    "took_secs" => since.elapsed().as_secs(),
                );
            }
            return Ok(());
        }
    }

    async fn query_rebuild_then_status(
        &self,
    ) -> Result<(RebuildStatus, ClusterStatus), ClusterCliError> {
        let rebuild = self.cli.rebuild_status().await?;
        let status = self.cli.status().await?;
        Ok((rebuild, status))
    }

    async fn query_status_then_rebuild(
        &self,
    ) -> Result<(ClusterStatus, RebuildStatus), ClusterCliError> {
        let status = self.cli.status().await?;
        let rebuild = self.cli.rebuild_status().await?;
        Ok((status, rebuild))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reef_host_exec::fake::{FakeExecutor, StaticHandler};
    use reef_host_exec::{BoxedExecutor, Input, OutputExt};
    use slog::o;
    use std::process::Output;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const HEALTHY_STATUS: &str = r#"{
        "status": "OK",
        "drives": { "active": 6, "total": 6 },
        "io_nodes": { "active": 6, "total": 6 },
        "hosts": { "backends": { "active": 3, "total": 3 } }
    }"#;
    const LAGGING_STATUS: &str = r#"{
        "status": "OK",
        "drives": { "active": 5, "total": 6 },
        "io_nodes": { "active": 6, "total": 6 },
        "hosts": { "backends": { "active": 3, "total": 3 } }
    }"#;
    const PROTECTED_REBUILD: &str = r#"{
        "unavailableMiB": 0,
        "protectionState": [
            { "numFailures": 0, "MiB": 1048576 },
            { "numFailures": 1, "MiB": 0 }
        ]
    }"#;
    const DEGRADED_REBUILD: &str = r#"{
        "unavailableMiB": 0,
        "protectionState": [
            { "numFailures": 0, "MiB": 1048560 },
            { "numFailures": 1, "MiB": 16 }
        ]
    }"#;

    fn test_log() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    fn test_cli(executor: BoxedExecutor) -> ClusterCli {
        ClusterCli::new(executor, "reef".into(), test_log())
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_unhealthy_returns_once_rebuilding_is_seen() {
        let executor = FakeExecutor::new(test_log());
        let mut handler = StaticHandler::new();
        // First attempt: still fully protected. Second attempt: degraded.
        handler.expect(
            Input::shell("reef status rebuild -J"),
            Output::success().set_stdout(PROTECTED_REBUILD),
        );
        handler.expect(
            Input::shell("reef status -J"),
            Output::success().set_stdout(HEALTHY_STATUS),
        );
        handler.expect(
            Input::shell("reef status rebuild -J"),
            Output::success().set_stdout(DEGRADED_REBUILD),
        );
        handler.expect(
            Input::shell("reef status -J"),
            Output::success().set_stdout(HEALTHY_STATUS),
        );
        handler.register(&executor);

        let cli = test_cli(executor.as_executor());
        let poller = StatusPoller::new(&cli, &test_log());
        poller.wait_for_unhealthy().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_healthy_waits_for_every_member() {
        let executor = FakeExecutor::new(test_log());
        let mut handler = StaticHandler::new();
        // Attempt 1: fully protected, but a drive is still missing; the
        // poller must not return yet.
        handler.expect(
            Input::shell("reef status -J"),
            Output::success().set_stdout(LAGGING_STATUS),
        );
        handler.expect(
            Input::shell("reef status rebuild -J"),
            Output::success().set_stdout(PROTECTED_REBUILD),
        );
        // Attempt 2: everything is back.
        handler.expect(
            Input::shell("reef status -J"),
            Output::success().set_stdout(HEALTHY_STATUS),
        );
        handler.expect(
            Input::shell("reef status rebuild -J"),
            Output::success().set_stdout(PROTECTED_REBUILD),
        );
        handler.register(&executor);

        let cli = test_cli(executor.as_executor());
        let poller = StatusPoller::new(&cli, &test_log());
        poller.wait_for_healthy(Instant::now(), true).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_healthy_never_returns_while_rebuilding() {
        let executor = FakeExecutor::new(test_log());
        executor.set_wait_handler(Box::new(|input: &Input| {
            if input.args.iter().any(|a| a == "rebuild") {
                Output::success().set_stdout(DEGRADED_REBUILD)
            } else {
                Output::success().set_stdout(HEALTHY_STATUS)
            }
        }));

        let cli = test_cli(executor.as_executor());
        let poller = StatusPoller::new(&cli, &test_log());
        tokio::time::timeout(
            Duration::from_secs(30),
            poller.wait_for_healthy(Instant::now(), false),
        )
        .await
        .expect_err("poller should still be waiting");
    }

    #[tokio::test(start_paused = true)]
    async fn pollers_give_up_after_exactly_the_retry_budget() {
        for direction in ["unhealthy", "healthy"] {
            let executor = FakeExecutor::new(test_log());
            let attempts = Arc::new(AtomicUsize::new(0));
            let counter = attempts.clone();
            executor.set_wait_handler(Box::new(move |_input: &Input| {
                counter.fetch_add(1, Ordering::SeqCst);
                Output::failure()
            }));

            let cli = test_cli(executor.as_executor());
            let poller = StatusPoller::new(&cli, &test_log());
            let result = match direction {
                "unhealthy" => poller.wait_for_unhealthy().await,
                _ => poller.wait_for_healthy(Instant::now(), false).await,
            };
            let err = result.expect_err("retries must be exhausted");
            assert!(matches!(
                err,
                PollError::RetriesExhausted { attempts: STATUS_MAX_RETRIES, .. }
            ));
            // One query per attempt: the first query of each poll fails,
            // so the second is never issued.
            assert_eq!(
                attempts.load(Ordering::SeqCst),
                STATUS_MAX_RETRIES,
                "direction {direction}"
            );
        }
    }
}
