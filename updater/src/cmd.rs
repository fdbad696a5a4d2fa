// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Exit discipline for the updater binary.

use std::process::exit;

/// Exit code for command-line usage errors.
pub const EXIT_USAGE: i32 = 2;
/// Exit code for any other fatal condition.
pub const EXIT_FAILURE: i32 = 1;

/// Describes why the process is exiting with a non-zero status.
#[derive(Debug)]
pub enum CmdError {
    /// Incorrect command-line arguments.
    Usage(String),
    /// Any other failure.
    Failure(anyhow::Error),
}

/// Print an error to stderr and exit the process with the appropriate
/// status code.
pub fn fatal(cmd_error: CmdError) -> ! {
    let arg0 = std::env::args()
        .next()
        .and_then(|arg0| {
            std::path::PathBuf::from(arg0)
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
        })
        .unwrap_or_else(|| "command".to_string());
    let (exit_code, message) = match cmd_error {
        CmdError::Usage(m) => (EXIT_USAGE, m),
        CmdError::Failure(err) => (EXIT_FAILURE, format!("{err:#}")),
    };
    eprintln!("{arg0}: {message}");
    exit(exit_code);
}
