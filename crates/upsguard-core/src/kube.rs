//! Cordon and drain through `kubectl`.
//!
//! Both steps are hygiene ahead of a power loss. Their outcomes are reported,
//! never raised: the caller always moves on to shutdown.

use crate::credential::ResolvedCredential;
use crate::identity::NodeIdentity;
use crate::process::{CommandOutcome, CommandRunner, CommandSpec};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StepOutcome {
    Completed,
    TimedOut,
    Failed(String),
}

/// What `kubectl drain` prints when its own `--timeout` expires.
const KUBECTL_TIMEOUT_MARKER: &str = "global timeout reached";

impl StepOutcome {
    fn from_command(outcome: CommandOutcome) -> Self {
        match outcome {
            CommandOutcome::Succeeded => StepOutcome::Completed,
            CommandOutcome::TimedOut { .. } => StepOutcome::TimedOut,
            CommandOutcome::Exited { ref stderr, .. }
                if stderr.contains(KUBECTL_TIMEOUT_MARKER) =>
            {
                StepOutcome::TimedOut
            }
            other => StepOutcome::Failed(other.to_string()),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, StepOutcome::Completed)
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Completed => f.write_str("completed"),
            StepOutcome::TimedOut => f.write_str("timed out"),
            StepOutcome::Failed(detail) => write!(f, "failed: {detail}"),
        }
    }
}

/// Timeouts and eviction policy for the two kubectl steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainPolicy {
    pub cordon_timeout: Duration,
    pub drain_timeout: Duration,
    pub grace_period: Duration,
}

impl DrainPolicy {
    /// Deadline handed to `kubectl drain`: the drain timeout less a tenth of
    /// it (between 1s and 10s), never below one second.
    pub fn kubectl_drain_timeout(&self) -> Duration {
        let margin =
            (self.drain_timeout / 10).clamp(Duration::from_secs(1), Duration::from_secs(10));
        self.drain_timeout
            .saturating_sub(margin)
            .max(Duration::from_secs(1))
    }
}

pub struct ControlPlaneClient<'a, R> {
    runner: &'a R,
    kubectl: PathBuf,
    credential: ResolvedCredential,
    policy: DrainPolicy,
}

impl<'a, R: CommandRunner> ControlPlaneClient<'a, R> {
    pub fn new(
        runner: &'a R,
        kubectl: PathBuf,
        credential: ResolvedCredential,
        policy: DrainPolicy,
    ) -> Self {
        Self {
            runner,
            kubectl,
            credential,
            policy,
        }
    }

    fn kubectl(&self) -> CommandSpec {
        CommandSpec::new(&self.kubectl)
            .arg("--kubeconfig")
            .arg(self.credential.path())
    }

    pub fn cordon_command(&self, node: &NodeIdentity) -> CommandSpec {
        self.kubectl().arg("cordon").arg(&node.name)
    }

    /// Emergency drain: DaemonSet pods stay, emptyDir data is discarded and
    /// unmanaged pods are deleted. kubectl's own `--timeout` expires a little
    /// before we would kill it, so it can report the timeout itself.
    pub fn drain_command(&self, node: &NodeIdentity) -> CommandSpec {
        self.kubectl()
            .arg("drain")
            .arg(&node.name)
            .arg("--ignore-daemonsets")
            .arg("--delete-emptydir-data")
            .arg("--force")
            .arg(format!("--grace-period={}", self.policy.grace_period.as_secs()))
            .arg(format!("--timeout={}s", self.policy.kubectl_drain_timeout().as_secs()))
    }

    pub async fn cordon(&self, node: &NodeIdentity) -> StepOutcome {
        let cmd = self.cordon_command(node);
        tracing::info!(node = %node, "cordoning node");
        let outcome = self.runner.run(&cmd, self.policy.cordon_timeout).await;
        StepOutcome::from_command(outcome)
    }

    pub async fn drain(&self, node: &NodeIdentity) -> StepOutcome {
        let cmd = self.drain_command(node);
        tracing::info!(
            node = %node,
            timeout_secs = self.policy.drain_timeout.as_secs(),
            "draining node"
        );
        let outcome = self.runner.run(&cmd, self.policy.drain_timeout).await;
        StepOutcome::from_command(outcome)
    }
}
