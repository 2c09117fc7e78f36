use crate::output::print_json;
use clap::Parser;
use std::path::PathBuf;
use upsguard_core::config::{ConfigOverrides, ShutdownConfig};
use upsguard_core::orchestrator::{Orchestrator, RunReport};
use upsguard_core::paths;
use upsguard_core::process::{DryRunRunner, SystemRunner};
use upsguard_core::UpsguardError;

/// Every setting is optional; unset ones come from the YAML file given by
/// `--config`, then from built-in defaults. Numeric settings are taken as
/// text so a malformed value can fall back to its default instead of
/// stopping the shutdown.
#[derive(Debug, Parser)]
#[command(
    name = "upsguard-shutdown",
    about = "Cordon and drain this Kubernetes node, then power the host off",
    version
)]
pub struct ShutdownArgs {
    /// YAML file with base settings (flags and environment win over it)
    #[arg(long, env = "UPSGUARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Where the host's root filesystem is mounted
    #[arg(long, env = "HOST_ROOT")]
    pub host_root: Option<PathBuf>,

    /// Preferred kubeconfig
    #[arg(long, env = "KUBECONFIG_PATH")]
    pub kubeconfig: Option<PathBuf>,

    /// Colon-separated fallback kubeconfigs, tried in order
    #[arg(long, env = "KUBECONFIG_ALTERNATES")]
    pub kubeconfig_alternates: Option<String>,

    /// kubectl binary (absolute path or a name on PATH)
    #[arg(long, env = "KUBECTL_PATH")]
    pub kubectl: Option<PathBuf>,

    /// Node name as registered with the cluster
    #[arg(long, env = "NODE_NAME")]
    pub node_name: Option<String>,

    /// Seconds allowed for `kubectl cordon`
    #[arg(long, env = "CORDON_TIMEOUT", value_name = "SECS")]
    pub cordon_timeout: Option<String>,

    /// Seconds allowed for `kubectl drain`
    #[arg(long, env = "DRAIN_TIMEOUT", value_name = "SECS")]
    pub drain_timeout: Option<String>,

    /// Per-pod termination grace period during drain, in seconds
    #[arg(long, env = "DRAIN_GRACE_PERIOD", value_name = "SECS")]
    pub drain_grace_period: Option<String>,

    /// Seconds allowed for each power-off mechanism
    #[arg(long, env = "SHUTDOWN_TIMEOUT", value_name = "SECS")]
    pub shutdown_timeout: Option<String>,

    /// Power-off mechanisms to try, in order (systemd, poweroff, sysrq)
    #[arg(long, env = "SHUTDOWN_MECHANISMS", value_delimiter = ',')]
    pub mechanisms: Option<Vec<String>>,

    /// Mount point of the kernel's /proc
    #[arg(long, env = "PROC_ROOT")]
    pub proc_root: Option<PathBuf>,

    /// Seconds to wait between SysRq sync, remount and power-off
    #[arg(long, env = "SYSRQ_PAUSE", value_name = "SECS")]
    pub sysrq_pause: Option<String>,

    /// Log file (default: var/log/ups-shutdown.log under the host root)
    #[arg(long, env = "SHUTDOWN_LOG")]
    pub log_file: Option<PathBuf>,

    /// Lock file that keeps a second run from starting
    #[arg(long, env = "UPSGUARD_LOCK")]
    pub lock_file: Option<PathBuf>,

    /// Log the commands that would run without running them
    #[arg(
        long,
        env = "UPSGUARD_DRY_RUN",
        action = clap::ArgAction::SetTrue,
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    pub dry_run: bool,

    /// Print the run report as JSON when done
    #[arg(long, short = 'j')]
    pub json: bool,
}

/// A config ready to run, plus every setting that was ignored on the way.
#[derive(Debug)]
pub struct Resolved {
    pub config: ShutdownConfig,
    pub issues: Vec<UpsguardError>,
}

impl ShutdownArgs {
    /// The flag/environment layer. Numbers that do not parse are left unset
    /// and reported.
    pub fn overrides(&self) -> (ConfigOverrides, Vec<UpsguardError>) {
        let mut issues = Vec::new();
        let overrides = ConfigOverrides {
            host_root: self.host_root.clone(),
            kubeconfig: self.kubeconfig.clone(),
            kubeconfig_alternates: self
                .kubeconfig_alternates
                .as_deref()
                .map(paths::split_path_list),
            kubectl: self.kubectl.clone(),
            node_name: self.node_name.clone(),
            cordon_timeout_secs: seconds(
                &mut issues,
                "cordon timeout",
                self.cordon_timeout.as_deref(),
            ),
            drain_timeout_secs: seconds(
                &mut issues,
                "drain timeout",
                self.drain_timeout.as_deref(),
            ),
            drain_grace_period_secs: seconds(
                &mut issues,
                "drain grace period",
                self.drain_grace_period.as_deref(),
            ),
            shutdown_timeout_secs: seconds(
                &mut issues,
                "shutdown timeout",
                self.shutdown_timeout.as_deref(),
            ),
            mechanisms: self.mechanisms.clone(),
            proc_root: self.proc_root.clone(),
            sysrq_pause_secs: seconds(
                &mut issues,
                "sysrq pause",
                self.sysrq_pause.as_deref(),
            ),
            log_file: self.log_file.clone(),
            lock_file: self.lock_file.clone(),
            // Unset flag means "no opinion" so the YAML file can enable it.
            dry_run: self.dry_run.then_some(true),
        };
        (overrides, issues)
    }

    /// Layer flags/environment over the optional YAML file. Never fails: an
    /// unreadable file is skipped and each invalid setting takes its default.
    pub fn resolve(&self) -> Resolved {
        let mut issues = Vec::new();
        let base = match &self.config {
            Some(path) => ConfigOverrides::load(path).unwrap_or_else(|e| {
                issues.push(UpsguardError::InvalidConfig(format!(
                    "config file {} ignored: {e}",
                    path.display()
                )));
                ConfigOverrides::default()
            }),
            None => ConfigOverrides::default(),
        };
        let (top, parse_issues) = self.overrides();
        issues.extend(parse_issues);
        let (config, resolve_issues) = ShutdownConfig::resolve_with_defaults(base.merge(top));
        issues.extend(resolve_issues);
        Resolved { config, issues }
    }
}

fn seconds(issues: &mut Vec<UpsguardError>, name: &str, raw: Option<&str>) -> Option<u64> {
    let raw = raw?.trim();
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            issues.push(UpsguardError::InvalidConfig(format!(
                "{name} must be a whole number of seconds, got {raw:?}"
            )));
            None
        }
    }
}

/// Log file to use when the command line itself cannot be parsed. Reads the
/// two variables that decide it straight from the environment.
pub fn fallback_log_file() -> PathBuf {
    if let Some(path) = std::env::var_os("SHUTDOWN_LOG").map(PathBuf::from) {
        if path.is_absolute() {
            return path;
        }
    }
    let host_root = std::env::var_os("HOST_ROOT")
        .map(PathBuf::from)
        .filter(|p| p.is_absolute())
        .unwrap_or_else(|| PathBuf::from(paths::DEFAULT_HOST_ROOT));
    paths::shutdown_log(&host_root)
}

pub async fn run(config: &ShutdownConfig) -> RunReport {
    if config.dry_run {
        Orchestrator::new(config, &DryRunRunner).run().await
    } else {
        Orchestrator::new(config, &SystemRunner).run().await
    }
}

pub fn report(report: &RunReport, json: bool) -> anyhow::Result<()> {
    if json {
        print_json(report)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use upsguard_core::shutdown::MechanismId;

    #[test]
    fn flags_map_onto_overrides() {
        let args = ShutdownArgs::try_parse_from([
            "upsguard-shutdown",
            "--host-root",
            "/mnt/host",
            "--kubeconfig-alternates",
            "/a.conf::/b.conf",
            "--mechanisms",
            "poweroff,sysrq",
            "--drain-timeout",
            "45",
        ])
        .unwrap();
        let resolved = args.resolve();
        assert!(resolved.issues.is_empty());
        let config = resolved.config;
        assert_eq!(config.host_root, PathBuf::from("/mnt/host"));
        assert_eq!(
            config.kubeconfig_alternates,
            vec![PathBuf::from("/a.conf"), PathBuf::from("/b.conf")]
        );
        assert_eq!(
            config.mechanisms,
            vec![MechanismId::Poweroff, MechanismId::Sysrq]
        );
        assert_eq!(config.drain_timeout.as_secs(), 45);
        assert!(!config.dry_run);
    }

    #[test]
    fn bad_numbers_fall_back_to_defaults() {
        let args = ShutdownArgs::try_parse_from([
            "upsguard-shutdown",
            "--cordon-timeout",
            "0",
            "--drain-timeout",
            "two minutes",
            "--shutdown-timeout",
            " 12 ",
        ])
        .unwrap();
        let resolved = args.resolve();
        assert_eq!(resolved.issues.len(), 2);
        assert!(resolved.issues[0].to_string().contains("drain timeout"));
        assert!(resolved.issues[1].to_string().contains("cordon timeout"));
        assert_eq!(resolved.config.cordon_timeout.as_secs(), 30);
        assert_eq!(resolved.config.drain_timeout.as_secs(), 120);
        assert_eq!(resolved.config.shutdown_timeout.as_secs(), 12);
    }

    #[test]
    fn dry_run_flag_takes_no_value() {
        let args = ShutdownArgs::try_parse_from(["upsguard-shutdown", "--dry-run"]).unwrap();
        assert!(args.dry_run);
        assert_eq!(args.overrides().0.dry_run, Some(true));
    }

    #[test]
    fn missing_config_file_is_skipped() {
        let args = ShutdownArgs::try_parse_from([
            "upsguard-shutdown",
            "--config",
            "/nonexistent/upsguard.yaml",
            "--host-root",
            "/mnt/host",
        ])
        .unwrap();
        let resolved = args.resolve();
        assert_eq!(resolved.issues.len(), 1);
        assert!(resolved.issues[0].to_string().contains("/nonexistent/upsguard.yaml"));
        assert_eq!(resolved.config.host_root, PathBuf::from("/mnt/host"));
    }

    #[test]
    fn flags_win_over_yaml_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("upsguard.yaml");
        std::fs::write(&file, "host_root: /from-file\ndry_run: true\ncordon_timeout_secs: 9\n")
            .unwrap();
        let args = ShutdownArgs::try_parse_from([
            "upsguard-shutdown",
            "--config",
            file.to_str().unwrap(),
            "--host-root",
            "/from-flag",
        ])
        .unwrap();
        let config = args.resolve().config;
        assert_eq!(config.host_root, PathBuf::from("/from-flag"));
        assert_eq!(config.cordon_timeout.as_secs(), 9);
        assert!(config.dry_run);
    }
}
