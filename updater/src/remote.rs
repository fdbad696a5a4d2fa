// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Remote command execution on cluster hosts over ssh.

use camino::Utf8PathBuf;
use reef_cluster_client::types::ClusterHost;
use reef_host_exec::{BoxedExecutor, ExecutionError};
use slog::{info, o, Logger};
use slog_error_chain::InlineErrorChain;
use std::net::IpAddr;
use tokio::process::Command;

/// Hardened non-interactive connection options.
///
/// Host-key verification is intentionally disabled: the target fleet is
/// pre-authenticated by the operator, and hosts are reinstalled often
/// enough that key pinning would only get in the way.
const SSH_OPTIONS: &[&str] = &[
    "-o",
    "LogLevel=ERROR",
    "-o",
    "UserKnownHostsFile=/dev/null",
    "-o",
    "StrictHostKeyChecking=no",
];

/// Connection options shared by every host in a run.
#[derive(Clone, Debug)]
pub struct SshOptions {
    /// Identity file passed to `ssh -i`.
    pub identity: Option<Utf8PathBuf>,
    /// Prefix remote commands with `sudo`. Set unless the updater itself
    /// already runs with euid 0.
    pub elevate: bool,
}

impl SshOptions {
    pub fn new(identity: Option<Utf8PathBuf>) -> Self {
        Self { identity, elevate: !nix::unistd::Uid::effective().is_root() }
    }
}

/// Execution context for one target host.
///
/// Constructed once per host from the inventory row and the run-wide ssh
/// options, and immutable for the duration of that host's upgrade.
pub struct RemoteHost {
    executor: BoxedExecutor,
    hostname: String,
    addr: IpAddr,
    options: SshOptions,
    log: Logger,
}

impl RemoteHost {
    pub fn new(
        executor: BoxedExecutor,
        host: &ClusterHost,
        options: SshOptions,
        log: &Logger,
    ) -> Self {
        Self {
            executor,
            hostname: host.hostname.clone(),
            addr: host.host_ip,
            options,
            log: log.new(o!("host" => host.hostname.clone())),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    // The remote sshd hands the argument vector to a shell, so shell
    // syntax inside `args` (e.g. an output redirection) is interpreted on
    // the host.
    fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new("ssh");
        command.args(SSH_OPTIONS);
        if let Some(identity) = &self.options.identity {
            command.arg("-i").arg(identity.as_str());
        }
        command.arg(self.addr.to_string());
        if self.options.elevate {
            command.arg("sudo");
        }
        command.args(args);
        command
    }

    /// Run a command on the host; a non-zero exit is an error the caller
    /// must handle.
    pub async fn run_checked(
        &self,
        args: &[&str],
    ) -> Result<(), ExecutionError> {
        info!(
            self.log,
            "running command on host via ssh";
            "command" => args.join(" "),
        );
        self.executor.execute(&mut self.command(args)).await?;
        Ok(())
    }

    /// Run a command on the host, ignoring failure. Used for best-effort
    /// cleanup steps.
    pub async fn run_unchecked(&self, args: &[&str]) {
        info!(
            self.log,
            "running command on host via ssh (allow failure)";
            "command" => args.join(" "),
        );
        if let Err(err) = self.executor.execute(&mut self.command(args)).await
        {
            info!(
                self.log,
                "command failed (ignored)";
                "err" => %InlineErrorChain::new(&err),
            );
        }
    }

    /// The software version the host itself reports as currently running.
    pub async fn current_version(&self) -> Result<String, ExecutionError> {
        let output = self
            .executor
            .execute(&mut self.command(&["reef", "version", "current"]))
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reef_host_exec::fake::{FakeExecutor, StaticHandler};
    use reef_host_exec::{Input, OutputExt};
    use std::process::Output;

    fn test_log() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    fn test_host() -> ClusterHost {
        serde_json::from_str(
            r#"{ "hostname": "stor-00", "host_ip": "10.1.1.7" }"#,
        )
        .unwrap()
    }

    const SSH_PREFIX: &str = "ssh -o LogLevel=ERROR \
         -o UserKnownHostsFile=/dev/null -o StrictHostKeyChecking=no";

    #[tokio::test]
    async fn checked_commands_carry_the_hardened_options() {
        let executor = FakeExecutor::new(test_log());
        let mut handler = StaticHandler::new();
        handler.expect_ok(format!("{SSH_PREFIX} 10.1.1.7 sudo reef local stop"));
        handler.register(&executor);

        let host = RemoteHost::new(
            executor.as_executor(),
            &test_host(),
            SshOptions { identity: None, elevate: true },
            &test_log(),
        );
        host.run_checked(&["reef", "local", "stop"]).await.unwrap();
    }

    #[tokio::test]
    async fn identity_and_elevation_are_optional() {
        let executor = FakeExecutor::new(test_log());
        let mut handler = StaticHandler::new();
        handler.expect_ok(format!(
            "{SSH_PREFIX} -i /root/.ssh/fleet 10.1.1.7 sync"
        ));
        handler.register(&executor);

        let host = RemoteHost::new(
            executor.as_executor(),
            &test_host(),
            SshOptions {
                identity: Some("/root/.ssh/fleet".into()),
                elevate: false,
            },
            &test_log(),
        );
        host.run_checked(&["sync"]).await.unwrap();
    }

    #[tokio::test]
    async fn checked_commands_propagate_failure() {
        let executor = FakeExecutor::new(test_log());
        let mut handler = StaticHandler::new();
        handler
            .expect_fail(format!("{SSH_PREFIX} 10.1.1.7 sudo reef local stop"));
        handler.register(&executor);

        let host = RemoteHost::new(
            executor.as_executor(),
            &test_host(),
            SshOptions { identity: None, elevate: true },
            &test_log(),
        );
        let err =
            host.run_checked(&["reef", "local", "stop"]).await.unwrap_err();
        assert!(matches!(err, ExecutionError::CommandFailure(_)));
    }

    #[tokio::test]
    async fn unchecked_commands_swallow_failure() {
        let executor = FakeExecutor::new(test_log());
        let mut handler = StaticHandler::new();
        handler.expect_fail(format!("{SSH_PREFIX} 10.1.1.7 sudo mv a b"));
        handler.register(&executor);

        let host = RemoteHost::new(
            executor.as_executor(),
            &test_host(),
            SshOptions { identity: None, elevate: true },
            &test_log(),
        );
        host.run_unchecked(&["mv", "a", "b"]).await;
    }

    #[tokio::test]
    async fn current_version_trims_the_reported_string() {
        let executor = FakeExecutor::new(test_log());
        let mut handler = StaticHandler::new();
        handler.expect(
            Input::shell(format!(
                "{SSH_PREFIX} 10.1.1.7 sudo reef version current"
            )),
            Output::success().set_stdout("4.0.9\n"),
        );
        handler.register(&executor);

        let host = RemoteHost::new(
            executor.as_executor(),
            &test_host(),
            SshOptions { identity: None, elevate: true },
            &test_log(),
        );
        assert_eq!(host.current_version().await.unwrap(), "4.0.9");
    }
}
