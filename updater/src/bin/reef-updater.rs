// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Rolling-upgrade driver for Reef clusters.

use camino::Utf8PathBuf;
use clap::Parser;
use reef_cluster_client::ClusterCli;
use reef_host_exec::HostExecutor;
use reef_updater::cmd::{fatal, CmdError};
use reef_updater::confirm::StdinPrompt;
use reef_updater::remote::SshOptions;
use reef_updater::upgrade::UpgradeRun;
use slog::{o, Drain, Level, Logger};

#[derive(Debug, Parser)]
#[command(
    name = "reef-updater",
    about = "Upgrade a Reef cluster's backend hosts, one host at a time, \
             gating each step on cluster health"
)]
struct Args {
    /// Version to upgrade every backend host to. The version package is
    /// assumed to have been distributed to the hosts already.
    target_version: String,

    /// Identity file passed to `ssh -i` when connecting to hosts.
    #[arg(short = 'i', long)]
    ssh_identity: Option<Utf8PathBuf>,

    /// Path to the cluster control CLI.
    #[arg(long, default_value = "reef")]
    cluster_cli: Utf8PathBuf,

    /// Upgrade every host without prompting for confirmation.
    #[arg(long)]
    yes: bool,

    /// Minimum level for log lines written to stdout.
    #[arg(long, default_value = "info", value_parser = parse_log_level)]
    log_level: Level,
}

fn parse_log_level(s: &str) -> Result<Level, String> {
    s.parse().map_err(|()| format!("unrecognized log level {s:?}"))
}

fn stdout_logger(level: Level) -> Logger {
    let decorator = slog_term::PlainSyncDecorator::new(std::io::stdout());
    let drain = slog_term::FullFormat::new(decorator)
        .build()
        .filter_level(level)
        .fuse();
    Logger::root(drain, o!())
}

#[tokio::main]
async fn main() {
    sigpipe::reset();
    if let Err(err) = do_run().await {
        fatal(CmdError::Failure(err));
    }
}

async fn do_run() -> anyhow::Result<()> {
    let args = Args::parse();
    let log = stdout_logger(args.log_level);

    let executor =
        HostExecutor::new(log.new(o!("component" => "HostExecutor")))
            .as_executor();
    let cli = ClusterCli::new(
        executor.clone(),
        args.cluster_cli,
        log.new(o!("component" => "ClusterCli")),
    );

    let mut prompt = StdinPrompt;
    let run = UpgradeRun::new(
        &cli,
        executor,
        args.target_version,
        SshOptions::new(args.ssh_identity),
        args.yes,
        &mut prompt,
        &log,
    );
    run.run().await?;
    Ok(())
}
