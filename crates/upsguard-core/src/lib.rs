//! `upsguard-core`: emergency shutdown of a Kubernetes node on UPS power
//! events.
//!
//! The shutdown path resolves a kubeconfig and the node's name, cordons and
//! drains the node, then powers the host off through a cascade of
//! mechanisms. Only a missing host filesystem or an exhausted cascade is
//! fatal; every other failure is logged and skipped.
//!
//! ```text
//! credential ─┐
//! identity ───┼─▶ kube (cordon, drain) ─▶ shutdown (systemd → poweroff → sysrq)
//! process ────┘            ▲                         ▲
//!                          └──── orchestrator ───────┘
//! ```
//!
//! The notification side is a static table in [`classifier`].

pub mod classifier;
pub mod config;
pub mod credential;
pub mod error;
pub mod guard;
pub mod identity;
pub mod kube;
pub mod logging;
pub mod orchestrator;
pub mod paths;
pub mod process;
pub mod shutdown;

pub use error::{Result, UpsguardError};
