// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed wrapper around the `reef` control CLI.
//!
//! All queries are read-only, run against the local management endpoint,
//! and produce JSON (`-J`); this crate shells out to the CLI through a
//! [`reef_host_exec::Executor`] and decodes the results into the types in
//! [`types`].

use camino::Utf8PathBuf;
use reef_host_exec::{BoxedExecutor, ExecutionError};
use serde::de::DeserializeOwned;
use slog::{debug, Logger};
use slog_error_chain::{InlineErrorChain, SlogInlineError};
use std::net::IpAddr;
use tokio::process::Command;

pub mod types;

use types::{BackendInfo, ClusterHost, ClusterStatus, RebuildStatus};

#[derive(Debug, thiserror::Error, SlogInlineError)]
pub enum ClusterCliError {
    #[error("failed to run `reef {subcommand}`")]
    Exec {
        subcommand: &'static str,
        #[source]
        err: ExecutionError,
    },
    #[error(
        "failed to parse `reef {subcommand}` output; \
         stdout {stdout:?}, stderr {stderr:?}"
    )]
    ParseOutput {
        subcommand: &'static str,
        stdout: String,
        stderr: String,
        #[source]
        err: serde_json::Error,
    },
}

/// Handle on the cluster control CLI.
///
/// Stateless: each query is an independent invocation of the `reef`
/// binary against the local management endpoint.
#[derive(Clone)]
pub struct ClusterCli {
    executor: BoxedExecutor,
    cli_path: Utf8PathBuf,
    log: Logger,
}

impl ClusterCli {
    pub fn new(
        executor: BoxedExecutor,
        cli_path: Utf8PathBuf,
        log: Logger,
    ) -> Self {
        Self { executor, cli_path, log }
    }

    /// The cluster's status summary.
    pub async fn status(&self) -> Result<ClusterStatus, ClusterCliError> {
        self.invoke_cli_json(["status"], "status").await
    }

    /// The cluster's rebuild progress report.
    pub async fn rebuild_status(
        &self,
    ) -> Result<RebuildStatus, ClusterCliError> {
        self.invoke_cli_json(["status", "rebuild"], "status rebuild").await
    }

    /// Pass the human-readable rebuild table through to stdout.
    ///
    /// Purely diagnostic; failures are logged and otherwise ignored.
    pub async fn show_rebuild_status(&self) {
        let mut command = Command::new(self.cli_path.as_str());
        command.args(["status", "rebuild"]);
        match self.executor.execute(&mut command).await {
            Ok(output) => {
                print!("{}", String::from_utf8_lossy(&output.stdout));
            }
            Err(err) => {
                debug!(
                    self.log,
                    "could not render rebuild status";
                    "err" => %InlineErrorChain::new(&err),
                );
            }
        }
    }

    /// The cluster's backend host inventory.
    pub async fn backend_hosts(
        &self,
    ) -> Result<Vec<ClusterHost>, ClusterCliError> {
        self.invoke_cli_json(
            ["cluster", "host", "--backends"],
            "cluster host",
        )
        .await
    }

    /// Ask the backend at `ip` which software release it is running.
    pub async fn backend_info(
        &self,
        ip: IpAddr,
    ) -> Result<BackendInfo, ClusterCliError> {
        let ip = ip.to_string();
        self.invoke_cli_json(
            ["debug", "rpc", "-H", &ip, "backend-info"],
            "debug rpc backend-info",
        )
        .await
    }

    /// The configured scrubber throughput limit, in bytes per second.
    pub async fn scrubber_rate_limit(&self) -> Result<u64, ClusterCliError> {
        self.invoke_cli_json(
            ["debug", "config", "show", "cluster.scrubberBytesPerSecLimit"],
            "debug config show",
        )
        .await
    }

    async fn invoke_cli_json<'a, I, T>(
        &self,
        subcommand_args: I,
        subcommand: &'static str,
    ) -> Result<T, ClusterCliError>
    where
        I: IntoIterator<Item = &'a str>,
        T: DeserializeOwned,
    {
        let mut command = Command::new(self.cli_path.as_str());
        for arg in subcommand_args {
            command.arg(arg);
        }
        command.arg("-J");
        let output = self
            .executor
            .execute(&mut command)
            .await
            .map_err(|err| ClusterCliError::Exec { subcommand, err })?;
        serde_json::from_slice(&output.stdout).map_err(|err| {
            ClusterCliError::ParseOutput {
                subcommand,
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                err,
            }
        })
    }
}
