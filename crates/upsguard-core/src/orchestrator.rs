//! The end-to-end emergency shutdown.
//!
//! ```text
//! Start ─▶ CredentialResolved ─▶ IdentityResolved ─▶ Cordoned | CordonSkipped
//!   │               │                    │                     │
//!   │ (no kubectl,  │ (no node name)     │                     ▼
//!   │  no creds)    └──────────┐         │            Drained | DrainSkipped
//!   └──────────────────────────┴─────────┴──────────────────┐  │
//!                                                           ▼  ▼
//!                                                       ShuttingDown ─▶ Succeeded | Fatal
//! ```
//!
//! Only a missing host root (before anything runs) and an exhausted
//! shutdown cascade end the run in `Fatal`. Everything else is logged and
//! the run moves on toward power-off.

use crate::config::ShutdownConfig;
use crate::credential::{resolve_credential, ResolvedCredential};
use crate::error::{Result, UpsguardError};
use crate::guard::{self, GuardState};
use crate::identity::{resolve_identity, IdentitySources, NodeIdentity};
use crate::kube::{ControlPlaneClient, DrainPolicy, StepOutcome};
use crate::paths;
use crate::process::CommandRunner;
use crate::shutdown::{MechanismId, ShutdownExecutor, ShutdownPlan, ShutdownReport};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Stage / Transition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    CredentialResolved,
    IdentityResolved,
    Cordoned,
    CordonSkipped,
    Drained,
    DrainSkipped,
    ShuttingDown,
    Succeeded,
    Fatal,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Start => "start",
            Stage::CredentialResolved => "credential_resolved",
            Stage::IdentityResolved => "identity_resolved",
            Stage::Cordoned => "cordoned",
            Stage::CordonSkipped => "cordon_skipped",
            Stage::Drained => "drained",
            Stage::DrainSkipped => "drain_skipped",
            Stage::ShuttingDown => "shutting_down",
            Stage::Succeeded => "succeeded",
            Stage::Fatal => "fatal",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Succeeded | Stage::Fatal)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: Stage,
    pub to: Stage,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// RunReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RunOutcome {
    PoweredOff { mechanism: MechanismId },
    /// Another invocation holds the run guard; nothing was done.
    AlreadyInProgress { pid: u32 },
    HostRootMissing { path: PathBuf },
    AllMechanismsFailed { attempted: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub stage: Stage,
    pub transitions: Vec<Transition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<ResolvedCredential>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeIdentity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cordon: Option<StepOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drain: Option<StepOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown: Option<ShutdownReport>,
    pub outcome: Option<RunOutcome>,
}

impl RunReport {
    fn new() -> Self {
        Self {
            stage: Stage::Start,
            transitions: Vec::new(),
            credential: None,
            node: None,
            cordon: None,
            drain: None,
            shutdown: None,
            outcome: None,
        }
    }

    fn advance(&mut self, to: Stage, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::debug!(from = %self.stage, to = %to, reason = %reason, "stage transition");
        self.transitions.push(Transition {
            from: self.stage,
            to,
            reason,
        });
        self.stage = to;
    }

    fn finish(mut self, outcome: RunOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// `Err` only for the two fatal endings; a skipped run or a degraded
    /// run that still powered off is `Ok`.
    pub fn result(&self) -> Result<()> {
        match &self.outcome {
            Some(RunOutcome::HostRootMissing { path }) => {
                Err(UpsguardError::HostRootMissing(path.clone()))
            }
            Some(RunOutcome::AllMechanismsFailed { attempted }) => {
                Err(UpsguardError::AllMechanismsFailed {
                    attempted: attempted.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    pub fn exit_code(&self) -> i32 {
        if self.result().is_ok() {
            0
        } else {
            1
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator<'a, R> {
    config: &'a ShutdownConfig,
    runner: &'a R,
    identity: IdentitySources,
}

impl<'a, R: CommandRunner> Orchestrator<'a, R> {
    pub fn new(config: &'a ShutdownConfig, runner: &'a R) -> Self {
        let identity = IdentitySources::detect(
            config.node_name.clone(),
            paths::hostname_file(&config.host_root),
        );
        Self {
            config,
            runner,
            identity,
        }
    }

    pub fn with_identity_sources(mut self, identity: IdentitySources) -> Self {
        self.identity = identity;
        self
    }

    pub async fn run(&self) -> RunReport {
        let mut report = RunReport::new();
        let config = self.config;

        tracing::info!(
            host_root = %config.host_root.display(),
            dry_run = config.dry_run,
            "emergency shutdown requested"
        );

        if !config.host_root.is_dir() {
            tracing::error!(
                path = %config.host_root.display(),
                "host filesystem not mounted; cannot shut down safely"
            );
            report.advance(Stage::Fatal, "host filesystem not mounted");
            return report.finish(RunOutcome::HostRootMissing {
                path: config.host_root.clone(),
            });
        }

        let _guard = match guard::acquire(&config.lock_file) {
            Ok(GuardState::Acquired(guard)) => Some(guard),
            Ok(GuardState::Held { pid }) => {
                tracing::warn!(pid, "shutdown already in progress; not starting another");
                return report.finish(RunOutcome::AlreadyInProgress { pid });
            }
            Err(e) => {
                tracing::warn!(
                    path = %config.lock_file.display(),
                    error = %e,
                    "could not take run lock; continuing unguarded"
                );
                None
            }
        };

        self.drain_node(&mut report).await;

        if report.stage != Stage::ShuttingDown {
            report.advance(Stage::ShuttingDown, "powering off host");
        }
        let plan = ShutdownPlan {
            host_root: config.host_root.clone(),
            proc_root: config.proc_root.clone(),
            mechanisms: config.mechanisms.clone(),
            timeout: config.shutdown_timeout,
            sysrq_pause: config.sysrq_pause,
            dry_run: config.dry_run,
        };
        let shutdown = ShutdownExecutor::new(self.runner, plan).shutdown().await;
        let result = shutdown.result();
        report.shutdown = Some(shutdown);

        match result {
            Ok(mechanism) => {
                report.advance(Stage::Succeeded, format!("{mechanism} accepted power-off"));
                report.finish(RunOutcome::PoweredOff { mechanism })
            }
            Err(UpsguardError::AllMechanismsFailed { attempted }) => {
                tracing::error!(
                    attempted = %attempted.join(", "),
                    "all shutdown mechanisms failed; node is still running"
                );
                report.advance(Stage::Fatal, "all shutdown mechanisms failed");
                report.finish(RunOutcome::AllMechanismsFailed { attempted })
            }
            Err(e) => {
                // `ShutdownReport::result` only fails with AllMechanismsFailed.
                report.advance(Stage::Fatal, e.to_string());
                report.finish(RunOutcome::AllMechanismsFailed {
                    attempted: Vec::new(),
                })
            }
        }
    }

    /// Cordon and drain. A missing prerequisite moves the report straight to
    /// `ShuttingDown` and returns early.
    async fn drain_node(&self, report: &mut RunReport) {
        let config = self.config;

        let kubectl = match resolve_kubectl(&config.kubectl) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(error = %e, "skipping cordon and drain");
                report.advance(Stage::ShuttingDown, e.to_string());
                return;
            }
        };

        let credential =
            match resolve_credential(&config.kubeconfig, &config.kubeconfig_alternates) {
                Ok(credential) => credential,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping cordon and drain");
                    report.advance(Stage::ShuttingDown, e.to_string());
                    return;
                }
            };
        tracing::info!(kubeconfig = %credential, "using kubeconfig");
        report.advance(Stage::CredentialResolved, credential.to_string());
        report.credential = Some(credential.clone());

        let node = match resolve_identity(&self.identity) {
            Ok(node) => node,
            Err(e) => {
                tracing::warn!(error = %e, "skipping cordon and drain");
                report.advance(Stage::ShuttingDown, e.to_string());
                return;
            }
        };
        if node.is_reliable() {
            tracing::info!(node = %node, source = %node.source, "resolved node name");
        } else {
            tracing::warn!(
                node = %node,
                "node name taken from this process's hostname; it may not match the cluster node"
            );
        }
        report.advance(Stage::IdentityResolved, format!("{} ({})", node.name, node.source));
        report.node = Some(node.clone());

        let client = ControlPlaneClient::new(
            self.runner,
            kubectl,
            credential,
            DrainPolicy {
                cordon_timeout: config.cordon_timeout,
                drain_timeout: config.drain_timeout,
                grace_period: config.drain_grace_period,
            },
        );

        let cordon = client.cordon(&node).await;
        log_step("cordon", &node, &cordon);
        let stage = if cordon.is_completed() {
            Stage::Cordoned
        } else {
            Stage::CordonSkipped
        };
        report.advance(stage, cordon.to_string());
        report.cordon = Some(cordon);

        let drain = client.drain(&node).await;
        log_step("drain", &node, &drain);
        let stage = if drain.is_completed() {
            Stage::Drained
        } else {
            Stage::DrainSkipped
        };
        report.advance(stage, drain.to_string());
        report.drain = Some(drain);
    }
}

fn log_step(step: &str, node: &NodeIdentity, outcome: &StepOutcome) {
    match outcome {
        StepOutcome::Completed => tracing::info!(step, node = %node, "step completed"),
        StepOutcome::TimedOut => {
            tracing::warn!(step, node = %node, "step timed out; proceeding to shutdown")
        }
        StepOutcome::Failed(detail) => tracing::warn!(
            step,
            node = %node,
            detail = %detail,
            "step failed; proceeding to shutdown"
        ),
    }
}

/// An absolute path must exist; a bare name is looked up on `PATH`.
pub fn resolve_kubectl(kubectl: &Path) -> Result<PathBuf> {
    if kubectl.is_absolute() {
        return if kubectl.is_file() {
            Ok(kubectl.to_path_buf())
        } else {
            Err(UpsguardError::ClientNotFound(kubectl.display().to_string()))
        };
    }
    which::which(kubectl)
        .map_err(|e| UpsguardError::ClientNotFound(format!("{}: {e}", kubectl.display())))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigOverrides;
    use crate::process::fake::ScriptedRunner;
    use crate::process::CommandOutcome;
    use crate::shutdown::MechanismOutcome;
    use std::time::Duration;
    use tempfile::TempDir;

    /// A fake node: host root with kubeconfig, kubectl stub, systemd socket
    /// and a sysrq trigger, all under one temp dir.
    struct Node {
        dir: TempDir,
    }

    impl Node {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            for rel in ["host/etc/kubernetes", "host/run/systemd", "proc/sys/kernel", "bin"] {
                std::fs::create_dir_all(dir.path().join(rel)).unwrap();
            }
            std::fs::write(dir.path().join("host/etc/kubernetes/admin.conf"), "").unwrap();
            std::fs::write(dir.path().join("host/run/systemd/private"), "").unwrap();
            std::fs::write(dir.path().join("host/etc/hostname"), "worker-7\n").unwrap();
            std::fs::write(dir.path().join("proc/sysrq-trigger"), "").unwrap();
            std::fs::write(dir.path().join("bin/kubectl"), "").unwrap();
            Self { dir }
        }

        fn path(&self, rel: &str) -> PathBuf {
            self.dir.path().join(rel)
        }

        fn config(&self) -> ShutdownConfig {
            ShutdownConfig::resolve(ConfigOverrides {
                host_root: Some(self.path("host")),
                kubectl: Some(self.path("bin/kubectl")),
                proc_root: Some(self.path("proc")),
                lock_file: Some(self.path("shutdown.lock")),
                sysrq_pause_secs: Some(0),
                ..Default::default()
            })
            .unwrap()
        }

        fn identity(&self) -> IdentitySources {
            IdentitySources {
                override_name: None,
                host_file: self.path("host/etc/hostname"),
                process_hostname: Some("upsguard-pod".into()),
            }
        }
    }

    async fn run(node: &Node, config: &ShutdownConfig, runner: &ScriptedRunner) -> RunReport {
        Orchestrator::new(config, runner)
            .with_identity_sources(node.identity())
            .run()
            .await
    }

    fn stages(report: &RunReport) -> Vec<Stage> {
        report.transitions.iter().map(|t| t.to).collect()
    }

    #[tokio::test]
    async fn happy_path_walks_every_stage() {
        let node = Node::new();
        let config = node.config();
        let runner = ScriptedRunner::new();
        let report = run(&node, &config, &runner).await;

        assert_eq!(
            stages(&report),
            vec![
                Stage::CredentialResolved,
                Stage::IdentityResolved,
                Stage::Cordoned,
                Stage::Drained,
                Stage::ShuttingDown,
                Stage::Succeeded,
            ]
        );
        assert_eq!(
            report.outcome,
            Some(RunOutcome::PoweredOff {
                mechanism: MechanismId::Systemd
            })
        );
        assert!(report.stage.is_terminal());
        assert_eq!(report.node.as_ref().unwrap().name, "worker-7");
        assert_eq!(report.exit_code(), 0);

        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].contains("cordon worker-7"));
        assert!(calls[1].contains("drain worker-7"));
        assert!(calls[2].ends_with("systemctl poweroff"));
        assert!(!node.path("shutdown.lock").exists());
    }

    #[tokio::test]
    async fn missing_host_root_is_fatal_before_any_command() {
        let node = Node::new();
        let mut config = node.config();
        config.host_root = node.path("no-such-host");
        let runner = ScriptedRunner::new();
        let report = run(&node, &config, &runner).await;

        assert!(runner.calls().is_empty());
        assert_eq!(report.stage, Stage::Fatal);
        assert!(matches!(
            report.result(),
            Err(UpsguardError::HostRootMissing(_))
        ));
        assert_eq!(report.exit_code(), 1);
        assert!(!node.path("shutdown.lock").exists());
    }

    #[tokio::test]
    async fn cordon_and_drain_failures_still_shut_down() {
        let node = Node::new();
        let config = node.config();
        let runner = ScriptedRunner::new()
            .on(
                " cordon ",
                CommandOutcome::TimedOut {
                    after: Duration::from_secs(30),
                },
            )
            .on(
                " drain ",
                CommandOutcome::Exited {
                    code: Some(1),
                    stderr: "error: unable to drain".into(),
                },
            );
        let report = run(&node, &config, &runner).await;

        assert_eq!(report.cordon, Some(StepOutcome::TimedOut));
        assert!(matches!(report.drain, Some(StepOutcome::Failed(_))));
        assert!(stages(&report).contains(&Stage::CordonSkipped));
        assert!(stages(&report).contains(&Stage::DrainSkipped));
        assert_eq!(report.stage, Stage::Succeeded);
        assert!(runner.calls()[2].contains("systemctl poweroff"));
    }

    #[tokio::test]
    async fn missing_kubectl_goes_straight_to_shutdown() {
        let node = Node::new();
        std::fs::remove_file(node.path("bin/kubectl")).unwrap();
        let config = node.config();
        let runner = ScriptedRunner::new();
        let report = run(&node, &config, &runner).await;

        assert_eq!(
            stages(&report),
            vec![Stage::ShuttingDown, Stage::Succeeded]
        );
        assert!(report.transitions[0].reason.contains("control-plane client"));
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn missing_credential_goes_straight_to_shutdown() {
        let node = Node::new();
        std::fs::remove_file(node.path("host/etc/kubernetes/admin.conf")).unwrap();
        let config = node.config();
        let runner = ScriptedRunner::new();
        let report = run(&node, &config, &runner).await;

        assert_eq!(report.credential, None);
        assert_eq!(report.transitions[0].to, Stage::ShuttingDown);
        assert!(report.transitions[0].reason.contains("no kubeconfig"));
        assert_eq!(report.exit_code(), 0);
    }

    #[tokio::test]
    async fn alternate_credential_is_used() {
        let node = Node::new();
        std::fs::remove_file(node.path("host/etc/kubernetes/admin.conf")).unwrap();
        std::fs::create_dir_all(node.path("host/etc/rancher/k3s")).unwrap();
        std::fs::write(node.path("host/etc/rancher/k3s/k3s.yaml"), "").unwrap();
        let config = node.config();
        let runner = ScriptedRunner::new();
        let report = run(&node, &config, &runner).await;

        assert_eq!(
            report.credential.as_ref().unwrap().path(),
            node.path("host/etc/rancher/k3s/k3s.yaml")
        );
        assert!(runner.calls()[0].contains("k3s.yaml"));
    }

    #[tokio::test]
    async fn missing_identity_goes_straight_to_shutdown() {
        let node = Node::new();
        let config = node.config();
        let runner = ScriptedRunner::new();
        let report = Orchestrator::new(&config, &runner)
            .with_identity_sources(IdentitySources {
                override_name: None,
                host_file: node.path("host/etc/missing"),
                process_hostname: None,
            })
            .run()
            .await;

        assert_eq!(
            stages(&report),
            vec![
                Stage::CredentialResolved,
                Stage::ShuttingDown,
                Stage::Succeeded
            ]
        );
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_cascade_is_fatal() {
        let node = Node::new();
        std::fs::remove_file(node.path("proc/sysrq-trigger")).unwrap();
        std::fs::create_dir_all(node.path("proc/sysrq-trigger")).unwrap();
        let config = node.config();
        let runner = ScriptedRunner::new()
            .on(
                "systemctl",
                CommandOutcome::Exited {
                    code: Some(1),
                    stderr: "Failed to connect to bus".into(),
                },
            )
            .on("poweroff -f", CommandOutcome::NotFound);
        let report = run(&node, &config, &runner).await;

        assert_eq!(report.stage, Stage::Fatal);
        assert_eq!(report.exit_code(), 1);
        let attempts = &report.shutdown.as_ref().unwrap().attempts;
        assert_eq!(attempts.len(), 3);
        assert!(attempts
            .iter()
            .all(|a| matches!(a.outcome, MechanismOutcome::Failed(_))));
        assert!(!node.path("shutdown.lock").exists());
    }

    #[tokio::test]
    async fn live_lock_holder_skips_the_run() {
        let node = Node::new();
        let config = node.config();
        // PID 1 is always alive.
        std::fs::write(node.path("shutdown.lock"), "1\n").unwrap();
        let runner = ScriptedRunner::new();
        let report = run(&node, &config, &runner).await;

        assert_eq!(
            report.outcome,
            Some(RunOutcome::AlreadyInProgress { pid: 1 })
        );
        assert!(runner.calls().is_empty());
        assert_eq!(report.exit_code(), 0);
        assert!(node.path("shutdown.lock").exists());
    }

    #[tokio::test]
    async fn report_serializes_for_json_output() {
        let node = Node::new();
        let config = node.config();
        let runner = ScriptedRunner::new();
        let report = run(&node, &config, &runner).await;
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["stage"], "succeeded");
        assert_eq!(json["outcome"]["result"], "powered_off");
        assert_eq!(json["outcome"]["mechanism"], "systemd");
        assert_eq!(json["cordon"]["status"], "completed");
    }
}
