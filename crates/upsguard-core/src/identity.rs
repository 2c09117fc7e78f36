//! Node name resolution.
//!
//! The override and the host's hostname file both name the physical node.
//! The process's own hostname is only a fallback: inside a container it is
//! usually the pod or container name, not the node.

use crate::error::{Result, UpsguardError};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    Override,
    HostFile,
    ProcessHostname,
}

impl IdentitySource {
    pub fn as_str(self) -> &'static str {
        match self {
            IdentitySource::Override => "override",
            IdentitySource::HostFile => "host_file",
            IdentitySource::ProcessHostname => "process_hostname",
        }
    }
}

impl fmt::Display for IdentitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeIdentity {
    pub name: String,
    pub source: IdentitySource,
}

impl NodeIdentity {
    /// False when the name came from the process itself and may not match
    /// the node registered with the control plane.
    pub fn is_reliable(&self) -> bool {
        self.source != IdentitySource::ProcessHostname
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Inputs for [`resolve_identity`], in priority order.
#[derive(Debug, Clone, Default)]
pub struct IdentitySources {
    pub override_name: Option<String>,
    pub host_file: PathBuf,
    pub process_hostname: Option<String>,
}

impl IdentitySources {
    /// Sources for a live run: the configured override, the host's
    /// hostname file, and the kernel hostname this process sees.
    pub fn detect(override_name: Option<String>, host_file: PathBuf) -> Self {
        let process_hostname = hostname::get()
            .ok()
            .map(|h| h.to_string_lossy().into_owned());
        Self {
            override_name,
            host_file,
            process_hostname,
        }
    }
}

pub fn resolve_identity(sources: &IdentitySources) -> Result<NodeIdentity> {
    if let Some(name) = non_empty(sources.override_name.as_deref()) {
        return Ok(NodeIdentity {
            name,
            source: IdentitySource::Override,
        });
    }

    match std::fs::read_to_string(&sources.host_file) {
        Ok(contents) => {
            if let Some(name) = non_empty(contents.lines().next()) {
                return Ok(NodeIdentity {
                    name,
                    source: IdentitySource::HostFile,
                });
            }
            tracing::debug!(path = %sources.host_file.display(), "host hostname file is empty");
        }
        Err(e) => {
            tracing::debug!(
                path = %sources.host_file.display(),
                error = %e,
                "host hostname file unreadable"
            );
        }
    }

    if let Some(name) = non_empty(sources.process_hostname.as_deref()) {
        return Ok(NodeIdentity {
            name,
            source: IdentitySource::ProcessHostname,
        });
    }

    Err(UpsguardError::IdentityNotFound)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sources(
        dir: &TempDir,
        file: Option<&str>,
        ovr: Option<&str>,
        proc: Option<&str>,
    ) -> IdentitySources {
        let host_file = dir.path().join("etc/hostname");
        if let Some(contents) = file {
            std::fs::create_dir_all(host_file.parent().unwrap()).unwrap();
            std::fs::write(&host_file, contents).unwrap();
        }
        IdentitySources {
            override_name: ovr.map(str::to_string),
            host_file,
            process_hostname: proc.map(str::to_string),
        }
    }

    #[test]
    fn override_beats_everything() {
        let dir = TempDir::new().unwrap();
        let sources = sources(&dir, Some("node-file\n"), Some("node-env"), Some("pod-xyz"));
        let id = resolve_identity(&sources).unwrap();
        assert_eq!(id.name, "node-env");
        assert_eq!(id.source, IdentitySource::Override);
        assert!(id.is_reliable());
    }

    #[test]
    fn host_file_beats_process_hostname() {
        let dir = TempDir::new().unwrap();
        let sources = sources(&dir, Some("  worker-3\n"), None, Some("pod-xyz"));
        let id = resolve_identity(&sources).unwrap();
        assert_eq!(id.name, "worker-3");
        assert_eq!(id.source, IdentitySource::HostFile);
    }

    #[test]
    fn blank_override_falls_through() {
        let dir = TempDir::new().unwrap();
        let id = resolve_identity(&sources(&dir, Some("worker-3"), Some("  "), None)).unwrap();
        assert_eq!(id.source, IdentitySource::HostFile);
    }

    #[test]
    fn process_hostname_is_flagged_unreliable() {
        let dir = TempDir::new().unwrap();
        let id = resolve_identity(&sources(&dir, Some("\n"), None, Some("pod-xyz"))).unwrap();
        assert_eq!(id.name, "pod-xyz");
        assert!(!id.is_reliable());
    }

    #[test]
    fn nothing_available_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            resolve_identity(&sources(&dir, None, None, Some(""))),
            Err(UpsguardError::IdentityNotFound)
        ));
    }
}
