//! Command-line front ends for `upsguard-core`.
//!
//! - `upsguard-shutdown`: run once by the UPS monitor's shutdown hook.
//! - `upsguard-notify`: run by the monitor for every notification.

pub mod notify;
pub mod output;
pub mod shutdown;
