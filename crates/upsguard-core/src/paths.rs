use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_HOST_ROOT: &str = "/host";
pub const DEFAULT_KUBECTL: &str = "/usr/local/bin/kubectl";
pub const DEFAULT_PROC_ROOT: &str = "/proc";
pub const DEFAULT_LOCK_FILE: &str = "/run/upsguard-shutdown.lock";

/// Host-relative location of the kubeadm admin credential.
pub const PRIMARY_KUBECONFIG: &str = "etc/kubernetes/admin.conf";

/// Host-relative credentials written by other distributions, in probe order.
pub const ALTERNATE_KUBECONFIGS: &[&str] = &[
    "etc/rancher/k3s/k3s.yaml",
    "etc/rancher/rke2/rke2.yaml",
    "var/lib/k0s/pki/admin.conf",
    "root/.kube/config",
];

pub const HOSTNAME_FILE: &str = "etc/hostname";
pub const SHUTDOWN_LOG: &str = "var/log/ups-shutdown.log";
pub const NOTIFY_LOG: &str = "var/log/ups-notify.log";

/// The systemd manager's private control socket, relative to the host root.
pub const SYSTEMD_SOCKET: &str = "run/systemd/private";

pub const SYSRQ_TRIGGER: &str = "sysrq-trigger";
pub const SYSRQ_ENABLE: &str = "sys/kernel/sysrq";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn host_path(host_root: &Path, relative: &str) -> PathBuf {
    host_root.join(relative)
}

pub fn primary_kubeconfig(host_root: &Path) -> PathBuf {
    host_path(host_root, PRIMARY_KUBECONFIG)
}

pub fn alternate_kubeconfigs(host_root: &Path) -> Vec<PathBuf> {
    ALTERNATE_KUBECONFIGS
        .iter()
        .map(|rel| host_path(host_root, rel))
        .collect()
}

pub fn hostname_file(host_root: &Path) -> PathBuf {
    host_path(host_root, HOSTNAME_FILE)
}

pub fn shutdown_log(host_root: &Path) -> PathBuf {
    host_path(host_root, SHUTDOWN_LOG)
}

pub fn notify_log(host_root: &Path) -> PathBuf {
    host_path(host_root, NOTIFY_LOG)
}

pub fn systemd_socket(host_root: &Path) -> PathBuf {
    host_path(host_root, SYSTEMD_SOCKET)
}

pub fn sysrq_trigger(proc_root: &Path) -> PathBuf {
    proc_root.join(SYSRQ_TRIGGER)
}

pub fn sysrq_enable(proc_root: &Path) -> PathBuf {
    proc_root.join(SYSRQ_ENABLE)
}

/// Split a colon-separated path list, dropping empty segments.
pub fn split_path_list(raw: &str) -> Vec<PathBuf> {
    raw.split(':')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}
