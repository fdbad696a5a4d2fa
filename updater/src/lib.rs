// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Rolling-upgrade orchestration for Reef clusters.
//!
//! The updater walks the cluster's backend hosts one at a time. A host's
//! upgrade never begins until the cluster is confirmed fully protected,
//! and the next host's never begins until the cluster has been observed
//! both to register the current host's restart and to recover from it. A
//! failure in the critical section of a host's upgrade rolls that host
//! back to its pre-upgrade state before the run is abandoned.

pub mod cmd;
pub mod confirm;
pub mod health;
pub mod poll;
pub mod remote;
pub mod upgrade;
