use crate::error::{Result, UpsguardError};
use crate::paths;
use crate::shutdown::MechanismId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CORDON_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_DRAIN_GRACE_PERIOD_SECS: u64 = 30;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SYSRQ_PAUSE_SECS: u64 = 2;

// ---------------------------------------------------------------------------
// ConfigOverrides
// ---------------------------------------------------------------------------

/// A partial configuration layer. Both the YAML overlay file and the
/// command line (flags / environment) produce one of these; [`ShutdownConfig::resolve`]
/// fills whatever is still unset from defaults derived from the host root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigOverrides {
    pub host_root: Option<PathBuf>,
    pub kubeconfig: Option<PathBuf>,
    pub kubeconfig_alternates: Option<Vec<PathBuf>>,
    pub kubectl: Option<PathBuf>,
    pub node_name: Option<String>,
    pub cordon_timeout_secs: Option<u64>,
    pub drain_timeout_secs: Option<u64>,
    pub drain_grace_period_secs: Option<u64>,
    pub shutdown_timeout_secs: Option<u64>,
    pub mechanisms: Option<Vec<String>>,
    pub proc_root: Option<PathBuf>,
    pub sysrq_pause_secs: Option<u64>,
    pub log_file: Option<PathBuf>,
    pub lock_file: Option<PathBuf>,
    pub dry_run: Option<bool>,
}

impl ConfigOverrides {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let overrides: ConfigOverrides = serde_yaml::from_str(&data)?;
        Ok(overrides)
    }

    /// Layer `top` over `self`; any value set in `top` wins.
    pub fn merge(self, top: ConfigOverrides) -> ConfigOverrides {
        ConfigOverrides {
            host_root: top.host_root.or(self.host_root),
            kubeconfig: top.kubeconfig.or(self.kubeconfig),
            kubeconfig_alternates: top.kubeconfig_alternates.or(self.kubeconfig_alternates),
            kubectl: top.kubectl.or(self.kubectl),
            node_name: top.node_name.or(self.node_name),
            cordon_timeout_secs: top.cordon_timeout_secs.or(self.cordon_timeout_secs),
            drain_timeout_secs: top.drain_timeout_secs.or(self.drain_timeout_secs),
            drain_grace_period_secs: top
                .drain_grace_period_secs
                .or(self.drain_grace_period_secs),
            shutdown_timeout_secs: top.shutdown_timeout_secs.or(self.shutdown_timeout_secs),
            mechanisms: top.mechanisms.or(self.mechanisms),
            proc_root: top.proc_root.or(self.proc_root),
            sysrq_pause_secs: top.sysrq_pause_secs.or(self.sysrq_pause_secs),
            log_file: top.log_file.or(self.log_file),
            lock_file: top.lock_file.or(self.lock_file),
            dry_run: top.dry_run.or(self.dry_run),
        }
    }
}

// ---------------------------------------------------------------------------
// ShutdownConfig
// ---------------------------------------------------------------------------

/// Fully resolved tunables for one shutdown run. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ShutdownConfig {
    pub host_root: PathBuf,
    pub kubeconfig: PathBuf,
    pub kubeconfig_alternates: Vec<PathBuf>,
    pub kubectl: PathBuf,
    pub node_name: Option<String>,
    pub cordon_timeout: Duration,
    pub drain_timeout: Duration,
    pub drain_grace_period: Duration,
    pub shutdown_timeout: Duration,
    pub mechanisms: Vec<MechanismId>,
    pub proc_root: PathBuf,
    pub sysrq_pause: Duration,
    pub log_file: PathBuf,
    pub lock_file: PathBuf,
    pub dry_run: bool,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        let host_root = PathBuf::from(paths::DEFAULT_HOST_ROOT);
        Self {
            kubeconfig: paths::primary_kubeconfig(&host_root),
            kubeconfig_alternates: paths::alternate_kubeconfigs(&host_root),
            kubectl: PathBuf::from(paths::DEFAULT_KUBECTL),
            node_name: None,
            cordon_timeout: Duration::from_secs(DEFAULT_CORDON_TIMEOUT_SECS),
            drain_timeout: Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS),
            drain_grace_period: Duration::from_secs(DEFAULT_DRAIN_GRACE_PERIOD_SECS),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            mechanisms: MechanismId::all().to_vec(),
            proc_root: PathBuf::from(paths::DEFAULT_PROC_ROOT),
            sysrq_pause: Duration::from_secs(DEFAULT_SYSRQ_PAUSE_SECS),
            log_file: paths::shutdown_log(&host_root),
            lock_file: PathBuf::from(paths::DEFAULT_LOCK_FILE),
            dry_run: false,
            host_root,
        }
    }
}

impl ShutdownConfig {
    /// Build a validated config from an override layer, failing on the first
    /// invalid setting. Host-relative defaults follow `host_root` when it is
    /// overridden.
    pub fn resolve(overrides: ConfigOverrides) -> Result<Self> {
        let (config, issues) = Self::resolve_with_defaults(overrides);
        match issues.into_iter().next() {
            Some(first) => Err(first),
            None => Ok(config),
        }
    }

    /// Like [`ShutdownConfig::resolve`] but never fails. Each invalid
    /// setting falls back to its default and is returned alongside the
    /// config so the caller can log it.
    pub fn resolve_with_defaults(overrides: ConfigOverrides) -> (Self, Vec<UpsguardError>) {
        let mut issues = Vec::new();

        let host_root = checked(
            &mut issues,
            overrides.host_root,
            || PathBuf::from(paths::DEFAULT_HOST_ROOT),
            |p| require_absolute("host root", p),
        );

        let mechanisms = match overrides.mechanisms.as_deref().map(parse_mechanisms) {
            None => MechanismId::all().to_vec(),
            Some(Ok(mechanisms)) => mechanisms,
            Some(Err(e)) => {
                issues.push(e);
                MechanismId::all().to_vec()
            }
        };

        let config = ShutdownConfig {
            kubeconfig: checked(
                &mut issues,
                overrides.kubeconfig,
                || paths::primary_kubeconfig(&host_root),
                |p| require_absolute("kubeconfig", p),
            ),
            kubeconfig_alternates: checked(
                &mut issues,
                overrides.kubeconfig_alternates,
                || paths::alternate_kubeconfigs(&host_root),
                |alts| {
                    alts.iter()
                        .try_for_each(|p| require_absolute("alternate kubeconfig", p))
                },
            ),
            kubectl: checked(
                &mut issues,
                overrides.kubectl,
                || PathBuf::from(paths::DEFAULT_KUBECTL),
                |p| require_program(p),
            ),
            node_name: overrides
                .node_name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
            cordon_timeout: timeout(
                &mut issues,
                "cordon timeout",
                overrides.cordon_timeout_secs,
                DEFAULT_CORDON_TIMEOUT_SECS,
            ),
            drain_timeout: timeout(
                &mut issues,
                "drain timeout",
                overrides.drain_timeout_secs,
                DEFAULT_DRAIN_TIMEOUT_SECS,
            ),
            drain_grace_period: secs(
                overrides.drain_grace_period_secs,
                DEFAULT_DRAIN_GRACE_PERIOD_SECS,
            ),
            shutdown_timeout: timeout(
                &mut issues,
                "shutdown timeout",
                overrides.shutdown_timeout_secs,
                DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            ),
            mechanisms,
            proc_root: checked(
                &mut issues,
                overrides.proc_root,
                || PathBuf::from(paths::DEFAULT_PROC_ROOT),
                |p| require_absolute("proc root", p),
            ),
            sysrq_pause: secs(overrides.sysrq_pause_secs, DEFAULT_SYSRQ_PAUSE_SECS),
            log_file: checked(
                &mut issues,
                overrides.log_file,
                || paths::shutdown_log(&host_root),
                |p| require_absolute("log file", p),
            ),
            lock_file: checked(
                &mut issues,
                overrides.lock_file,
                || PathBuf::from(paths::DEFAULT_LOCK_FILE),
                |p| require_absolute("lock file", p),
            ),
            dry_run: overrides.dry_run.unwrap_or(false),
            host_root,
        };
        (config, issues)
    }
}

/// `value` if it passes `check`, otherwise the default (recording why).
fn checked<T>(
    issues: &mut Vec<UpsguardError>,
    value: Option<T>,
    default: impl FnOnce() -> T,
    check: impl FnOnce(&T) -> Result<()>,
) -> T {
    match value {
        None => default(),
        Some(value) => match check(&value) {
            Ok(()) => value,
            Err(e) => {
                issues.push(e);
                default()
            }
        },
    }
}

fn timeout(
    issues: &mut Vec<UpsguardError>,
    name: &str,
    value: Option<u64>,
    default: u64,
) -> Duration {
    let value = checked(
        issues,
        value,
        || default,
        |&v| {
            if v == 0 {
                Err(UpsguardError::InvalidConfig(format!(
                    "{name} must be a positive number of seconds"
                )))
            } else {
                Ok(())
            }
        },
    );
    Duration::from_secs(value)
}

fn secs(value: Option<u64>, default: u64) -> Duration {
    Duration::from_secs(value.unwrap_or(default))
}

fn require_absolute(name: &str, path: &Path) -> Result<()> {
    if path.is_absolute() {
        Ok(())
    } else {
        Err(UpsguardError::InvalidConfig(format!(
            "{name} must be an absolute path: {}",
            path.display()
        )))
    }
}

/// A bare program name is looked up on PATH; anything with a separator has
/// to be absolute.
fn require_program(path: &Path) -> Result<()> {
    if path.is_absolute() || path.components().count() == 1 {
        Ok(())
    } else {
        Err(UpsguardError::InvalidConfig(format!(
            "kubectl must be an absolute path or a bare program name: {}",
            path.display()
        )))
    }
}

fn parse_mechanisms(names: &[String]) -> Result<Vec<MechanismId>> {
    let mechanisms = names
        .iter()
        .map(|n| n.parse())
        .collect::<Result<Vec<MechanismId>>>()?;
    if mechanisms.is_empty() {
        return Err(UpsguardError::InvalidConfig(
            "at least one shutdown mechanism is required".into(),
        ));
    }
    for (i, m) in mechanisms.iter().enumerate() {
        if mechanisms[..i].contains(m) {
            return Err(UpsguardError::InvalidConfig(format!(
                "shutdown mechanism listed twice: {m}"
            )));
        }
    }
    Ok(mechanisms)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
