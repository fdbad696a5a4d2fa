// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The per-host upgrade state machine.
//!
//! Hosts move through
//! `Querying -> (Skip | NeedsUpgrade) -> AwaitingConfirmation ->
//! Preparing -> Swapping -> Activating -> Starting -> Upgraded`,
//! strictly one host at a time. Failures in the swapping and activating
//! steps roll the host back to its pre-upgrade state before the run is
//! abandoned; any unrecovered failure terminates the whole run.

use crate::confirm::{OperatorDecision, Prompt};
use crate::poll::StatusPoller;
use crate::remote::{RemoteHost, SshOptions};
use anyhow::{bail, Context};
use chrono::Utc;
use reef_cluster_client::types::ClusterHost;
use reef_cluster_client::ClusterCli;
use reef_host_exec::BoxedExecutor;
use slog::{info, o, warn, Logger};
use tokio::time::Instant;

/// Per-version container state on a host.
const DATA_DIR: &str = "/opt/reef/data";
/// Kernel driver control file on a host.
const DRIVER_INTERFACE: &str = "/proc/reeffs/interface";

fn version_data_dir(version: &str) -> String {
    format!("{DATA_DIR}/default_{version}")
}

/// Terminal state of one host's upgrade.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostOutcome {
    Upgraded,
    Skipped,
}

/// Counts accumulated across a whole run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub upgraded: usize,
    pub skipped: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: HostOutcome) {
        match outcome {
            HostOutcome::Upgraded => self.upgraded += 1,
            HostOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Record of one host's upgrade attempt.
#[derive(Debug)]
struct UpgradeSession {
    source_version: String,
    started: Instant,
}

/// One rolling-upgrade run across the cluster's backend hosts.
pub struct UpgradeRun<'a> {
    cli: &'a ClusterCli,
    executor: BoxedExecutor,
    target_version: String,
    ssh: SshOptions,
    prompt: &'a mut dyn Prompt,
    /// One-shot: set when the operator answers "all" (or passes `--yes`),
    /// never cleared for the rest of the run.
    confirm_all: bool,
    summary: RunSummary,
    /// Suffix for directories renamed aside during this run.
    backup_timestamp: String,
    log: Logger,
}

impl<'a> UpgradeRun<'a> {
    pub fn new(
        cli: &'a ClusterCli,
        executor: BoxedExecutor,
        target_version: String,
        ssh: SshOptions,
        confirm_all: bool,
        prompt: &'a mut dyn Prompt,
        log: &Logger,
    ) -> Self {
        Self {
            cli,
            executor,
            target_version,
            ssh,
            prompt,
            confirm_all,
            summary: RunSummary::default(),
            backup_timestamp: Utc::now()
                .format("%Y-%m-%d-%H-%M-%S")
                .to_string(),
            log: log.new(o!("component" => "UpgradeRun")),
        }
    }

    /// Upgrade every backend host that is not already running the target
    /// version, strictly serialized.
    pub async fn run(mut self) -> anyhow::Result<RunSummary> {
        let run_start = Instant::now();
        let hosts = self
            .cli
            .backend_hosts()
            .await
            .context("listing the cluster's backend hosts")?;
        info!(
            self.log,
            "starting rolling upgrade";
            "target_version" => %self.target_version,
            "hosts" => hosts.len(),
        );

        for host in &hosts {
            let outcome = self.upgrade_host(host).await?;
            self.summary.record(outcome);
        }

        info!(
            self.log,
            "=== upgrade run finished ===";
            "target_version" => %self.target_version,
            "upgraded" => self.summary.upgraded,
            "skipped" => self.summary.skipped,
            "took_secs" => run_start.elapsed().as_secs(),
        );
        Ok(self.summary)
    }

    async fn upgrade_host(
        &mut self,
        host: &ClusterHost,
    ) -> anyhow::Result<HostOutcome> {
        let log = self.log.new(o!("host" => host.hostname.clone()));

        // Querying.
        info!(log, "querying backend"; "addr" => %host.host_ip);
        let backend =
            self.cli.backend_info(host.host_ip).await.with_context(|| {
                format!("querying backend version of {}", host.hostname)
            })?;
        info!(log, "queried backend"; "running" => %backend.software_release);

        if backend.software_release == self.target_version {
            info!(
                log,
                "already running the target version, skipping";
                "version" => %backend.software_release,
            );
            return Ok(HostOutcome::Skipped);
        }

        // Never start an upgrade while the cluster is already degraded.
        let poller = StatusPoller::new(self.cli, &log);
        poller.wait_for_healthy(Instant::now(), false).await?;

        // AwaitingConfirmation.
        if !self.confirm_all {
            match self
                .prompt
                .confirm_host(&host.hostname, &self.target_version)?
            {
                OperatorDecision::SkipThisHost => {
                    info!(log, "skipping host at operator's request");
                    return Ok(HostOutcome::Skipped);
                }
                OperatorDecision::UpgradeAllRemaining => {
                    info!(
                        log,
                        "will upgrade this host and then all remaining \
                         hosts without prompting"
                    );
                    self.confirm_all = true;
                }
                OperatorDecision::UpgradeThisHost => {}
            }
        }

        let remote = RemoteHost::new(
            self.executor.clone(),
            host,
            self.ssh.clone(),
            &log,
        );

        // The host's own answer is what the data directory is named
        // after; it must agree with the control plane about needing an
        // upgrade at all.
        let source_version = remote
            .current_version()
            .await
            .context("querying the host's running version over ssh")?;
        if source_version == self.target_version {
            bail!(
                "host {} reports target version {} over ssh, but the \
                 cluster reported {}",
                host.hostname,
                source_version,
                backend.software_release,
            );
        }

        let session = UpgradeSession {
            source_version,
            started: Instant::now(),
        };
        info!(
            log,
            "starting upgrade";
            "from" => %session.source_version,
            "to" => %self.target_version,
        );

        self.run_upgrade_steps(&remote, &session, &log).await?;

        // The cluster must register the restart before we wait for
        // recovery; returning on recovery alone could mean the host never
        // actually went down.
        poller.wait_for_unhealthy().await?;
        poller.wait_for_healthy(session.started, true).await?;

        info!(
            log,
            "=== finished upgrade ===";
            "from" => %session.source_version,
            "to" => %self.target_version,
            "took_secs" => session.started.elapsed().as_secs(),
        );
        Ok(HostOutcome::Upgraded)
    }

    /// The remote step sequence for one host.
    ///
    /// Failures before the data-directory swap propagate with no cleanup:
    /// nothing has been mutated yet. Failures in the swap and activation
    /// steps restore the pre-upgrade data-directory layout and restart
    /// services before propagating. A failure while starting services
    /// after activation has no rollback; the host is left activated and
    /// the operator is told to intervene.
    async fn run_upgrade_steps(
        &self,
        remote: &RemoteHost,
        session: &UpgradeSession,
        log: &Logger,
    ) -> anyhow::Result<()> {
        let target = self.target_version.as_str();
        let source_dir = version_data_dir(&session.source_version);
        let target_dir = version_data_dir(target);

        // Preparing: stage the package (assumed already distributed to
        // the host), quiesce the driver, and flush pending writes.
        info!(log, "fetching target version package"; "version" => target);
        remote.run_checked(&["reef", "version", "get", target]).await?;
        info!(log, "preparing driver for upgrade");
        remote
            .run_checked(&["echo", "prepare-upgrade", ">", DRIVER_INTERFACE])
            .await?;
        remote.run_checked(&["sync"]).await?;
        info!(log, "preparing target version"; "version" => target);
        remote.run_checked(&["reef", "version", "prepare", target]).await?;
        info!(log, "stopping local containers");
        remote.run_checked(&["reef", "local", "stop"]).await?;

        // Swapping. A stale target directory from an earlier failed
        // attempt is renamed aside for forensics, not deleted.
        let backup_dir =
            format!("{target_dir}.bk.{}", self.backup_timestamp);
        info!(log, "moving stale target data dir aside, if one exists");
        remote.run_unchecked(&["mv", &target_dir, &backup_dir]).await;

        info!(
            log,
            "moving data dir to the target version path";
            "from" => %source_dir,
            "to" => %target_dir,
        );
        if let Err(err) =
            remote.run_checked(&["mv", &source_dir, &target_dir]).await
        {
            warn!(
                log,
                "failed to move the data dir, starting back up and \
                 bailing out"
            );
            remote.run_checked(&["reef", "local", "start"]).await.context(
                "restarting containers after a failed data dir move",
            )?;
            return Err(err)
                .context("moving the data dir to the target version path");
        }

        // Activating.
        if let Err(err) =
            remote.run_checked(&["reef", "version", "set", target]).await
        {
            warn!(
                log,
                "failed to activate the target version, renaming the data \
                 dir back and bailing out"
            );
            remote.run_checked(&["mv", &target_dir, &source_dir]).await.context(
                "renaming the data dir back after a failed activation",
            )?;
            remote.run_checked(&["reef", "local", "start"]).await.context(
                "restarting containers after a failed activation",
            )?;
            return Err(err).context("activating the target version");
        }

        // Starting. No rollback exists past this point: the data
        // directory already matches the activated version, and a failed
        // start needs operator eyes, not another blind swap.
        info!(log, "starting local containers");
        remote.run_checked(&["reef", "local", "start"]).await.with_context(
            || {
                format!(
                    "starting containers on {} after activation; manual \
                     intervention required",
                    remote.hostname(),
                )
            },
        )?;
        info!(log, "started local containers");
        Ok(())
    }
}
