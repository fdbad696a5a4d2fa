// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Operator confirmation for per-host upgrades.

use anyhow::Context;
use std::io::Write;
use std::str::FromStr;

/// The operator's answer to a per-host confirmation prompt.
///
/// This is the closed set of accepted answers; anything else is an
/// [`UnacceptableInput`] error, which callers treat as fatal rather than
/// defaulting to a "safe" choice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperatorDecision {
    UpgradeThisHost,
    SkipThisHost,
    /// Upgrade this host, then every remaining host without prompting.
    UpgradeAllRemaining,
}

#[derive(Debug, thiserror::Error)]
#[error(
    "unacceptable confirmation input {input:?} \
     (expected y/yes, s/skip, or all)"
)]
pub struct UnacceptableInput {
    pub input: String,
}

impl FromStr for OperatorDecision {
    type Err = UnacceptableInput;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => Ok(Self::UpgradeThisHost),
            "s" | "skip" => Ok(Self::SkipThisHost),
            "all" => Ok(Self::UpgradeAllRemaining),
            _ => Err(UnacceptableInput { input: s.trim().to_string() }),
        }
    }
}

/// Source of operator confirmation answers.
///
/// Production prompts on the controlling terminal; tests drive the
/// orchestrator with scripted answers.
pub trait Prompt {
    fn confirm_host(
        &mut self,
        hostname: &str,
        target_version: &str,
    ) -> anyhow::Result<OperatorDecision>;
}

/// Reads confirmation answers from stdin.
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn confirm_host(
        &mut self,
        hostname: &str,
        target_version: &str,
    ) -> anyhow::Result<OperatorDecision> {
        print!("Upgrade {hostname} to {target_version}? [y]es / [s]kip / all> ");
        std::io::stdout().flush().context("flushing confirmation prompt")?;
        let mut line = String::new();
        std::io::stdin()
            .read_line(&mut line)
            .context("reading confirmation input")?;
        Ok(line.parse()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_answers() {
        for (input, expected) in [
            ("y", OperatorDecision::UpgradeThisHost),
            ("yes", OperatorDecision::UpgradeThisHost),
            ("  YES\n", OperatorDecision::UpgradeThisHost),
            ("s", OperatorDecision::SkipThisHost),
            ("skip", OperatorDecision::SkipThisHost),
            ("all", OperatorDecision::UpgradeAllRemaining),
            ("All", OperatorDecision::UpgradeAllRemaining),
        ] {
            assert_eq!(
                input.parse::<OperatorDecision>().unwrap(),
                expected,
                "input {input:?}"
            );
        }
    }

    #[test]
    fn everything_else_is_rejected() {
        for input in ["", "maybe", "n", "no", "yess", "allhosts", "-"] {
            let err = input.parse::<OperatorDecision>().unwrap_err();
            assert_eq!(err.input, input.trim());
        }
    }
}
