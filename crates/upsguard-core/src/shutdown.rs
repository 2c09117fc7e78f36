//! Host power-off cascade.
//!
//! Mechanisms run in the configured order, each under its own timeout,
//! stopping at the first that succeeds. The order runs from the most
//! coordinated signal (systemd, which lets kubelet's graceful node shutdown
//! react) to the bluntest (magic SysRq).

use crate::error::{Result, UpsguardError};
use crate::paths;
use crate::process::{CommandOutcome, CommandRunner, CommandSpec};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;

// ---------------------------------------------------------------------------
// MechanismId
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MechanismId {
    Systemd,
    Poweroff,
    Sysrq,
}

impl MechanismId {
    /// Default cascade order.
    pub fn all() -> &'static [MechanismId] {
        &[MechanismId::Systemd, MechanismId::Poweroff, MechanismId::Sysrq]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MechanismId::Systemd => "systemd",
            MechanismId::Poweroff => "poweroff",
            MechanismId::Sysrq => "sysrq",
        }
    }
}

impl fmt::Display for MechanismId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MechanismId {
    type Err = UpsguardError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "systemd" => Ok(MechanismId::Systemd),
            "poweroff" => Ok(MechanismId::Poweroff),
            "sysrq" => Ok(MechanismId::Sysrq),
            other => Err(UpsguardError::UnknownMechanism(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum MechanismOutcome {
    Succeeded,
    Failed(String),
    TimedOut,
    /// Precondition not met; the mechanism was not attempted.
    Skipped(String),
}

impl MechanismOutcome {
    fn from_command(outcome: CommandOutcome) -> Self {
        match outcome {
            CommandOutcome::Succeeded => MechanismOutcome::Succeeded,
            CommandOutcome::TimedOut { .. } => MechanismOutcome::TimedOut,
            other => MechanismOutcome::Failed(other.to_string()),
        }
    }

    pub fn was_attempted(&self) -> bool {
        !matches!(self, MechanismOutcome::Skipped(_))
    }
}

impl fmt::Display for MechanismOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MechanismOutcome::Succeeded => f.write_str("succeeded"),
            MechanismOutcome::Failed(detail) => write!(f, "failed: {detail}"),
            MechanismOutcome::TimedOut => f.write_str("timed out"),
            MechanismOutcome::Skipped(reason) => write!(f, "skipped: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MechanismAttempt {
    pub mechanism: MechanismId,
    pub outcome: MechanismOutcome,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub attempts: Vec<MechanismAttempt>,
    pub succeeded: Option<MechanismId>,
}

impl ShutdownReport {
    /// The mechanism that powered the host off, or `AllMechanismsFailed`
    /// naming every mechanism that was actually attempted.
    pub fn result(&self) -> Result<MechanismId> {
        self.succeeded.ok_or_else(|| UpsguardError::AllMechanismsFailed {
            attempted: self
                .attempts
                .iter()
                .filter(|a| a.outcome.was_attempted())
                .map(|a| a.mechanism.to_string())
                .collect(),
        })
    }
}

// ---------------------------------------------------------------------------
// ShutdownExecutor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ShutdownPlan {
    pub host_root: PathBuf,
    pub proc_root: PathBuf,
    pub mechanisms: Vec<MechanismId>,
    /// Applied to each mechanism separately.
    pub timeout: Duration,
    pub sysrq_pause: Duration,
    pub dry_run: bool,
}

pub struct ShutdownExecutor<'a, R> {
    runner: &'a R,
    plan: ShutdownPlan,
}

impl<'a, R: CommandRunner> ShutdownExecutor<'a, R> {
    pub fn new(runner: &'a R, plan: ShutdownPlan) -> Self {
        Self { runner, plan }
    }

    pub async fn shutdown(&self) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        for &mechanism in &self.plan.mechanisms {
            let started = Instant::now();
            let outcome = self.attempt(mechanism).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match &outcome {
                MechanismOutcome::Succeeded => {
                    tracing::info!(%mechanism, duration_ms, "power-off issued");
                }
                MechanismOutcome::Skipped(reason) => {
                    tracing::warn!(%mechanism, reason = %reason, "shutdown mechanism unavailable");
                }
                MechanismOutcome::TimedOut => tracing::error!(
                    %mechanism,
                    timeout_secs = self.plan.timeout.as_secs(),
                    "shutdown mechanism failed: timed out"
                ),
                MechanismOutcome::Failed(detail) => {
                    tracing::error!(%mechanism, detail = %detail, "shutdown mechanism failed");
                }
            }

            let succeeded = outcome == MechanismOutcome::Succeeded;
            report.attempts.push(MechanismAttempt {
                mechanism,
                outcome,
                duration_ms,
            });
            if succeeded {
                report.succeeded = Some(mechanism);
                break;
            }
        }

        report
    }

    async fn attempt(&self, mechanism: MechanismId) -> MechanismOutcome {
        match mechanism {
            MechanismId::Systemd => {
                let socket = paths::systemd_socket(&self.plan.host_root);
                if !socket.exists() {
                    return MechanismOutcome::Skipped(format!(
                        "systemd control socket not found at {}",
                        socket.display()
                    ));
                }
                self.run(self.chroot().args(["systemctl", "poweroff"])).await
            }
            MechanismId::Poweroff => self.run(self.chroot().args(["poweroff", "-f"])).await,
            MechanismId::Sysrq => {
                let trigger = paths::sysrq_trigger(&self.plan.proc_root);
                if !trigger.exists() {
                    return MechanismOutcome::Skipped(format!(
                        "kernel trigger not found at {}",
                        trigger.display()
                    ));
                }
                self.sysrq(&trigger).await
            }
        }
    }

    fn chroot(&self) -> CommandSpec {
        CommandSpec::new("chroot").arg(&self.plan.host_root)
    }

    async fn run(&self, cmd: CommandSpec) -> MechanismOutcome {
        tracing::info!(command = %cmd, "attempting power-off");
        let outcome = self.runner.run(&cmd, self.plan.timeout).await;
        MechanismOutcome::from_command(outcome)
    }

    /// Sync, remount read-only, power off, pausing between each so the
    /// previous request has a chance to land.
    async fn sysrq(&self, trigger: &Path) -> MechanismOutcome {
        if self.plan.dry_run {
            tracing::info!(
                trigger = %trigger.display(),
                "dry run: would write s, u, o to sysrq trigger"
            );
            return MechanismOutcome::Succeeded;
        }

        let enable = paths::sysrq_enable(&self.plan.proc_root);
        if enable.exists() {
            if let Err(e) = write_byte(&enable, b'1').await {
                tracing::debug!(path = %enable.display(), error = %e, "could not enable sysrq");
            }
        }

        let pause = self.plan.sysrq_pause;
        let sequence = async {
            for (i, key) in [b's', b'u', b'o'].into_iter().enumerate() {
                if i > 0 && !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
                tracing::info!(key = %char::from(key), "writing sysrq trigger");
                write_byte(trigger, key).await?;
            }
            Ok::<(), std::io::Error>(())
        };

        match tokio::time::timeout(self.plan.timeout, sequence).await {
            Ok(Ok(())) => MechanismOutcome::Succeeded,
            Ok(Err(e)) => MechanismOutcome::Failed(format!(
                "write to {} failed: {e}",
                trigger.display()
            )),
            Err(_) => MechanismOutcome::TimedOut,
        }
    }
}

async fn write_byte(path: &Path, byte: u8) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
    file.write_all(&[byte]).await?;
    file.flush().await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
