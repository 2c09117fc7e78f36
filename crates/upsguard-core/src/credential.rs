use crate::error::{Result, UpsguardError};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// The kubeconfig chosen for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedCredential(PathBuf);

impl ResolvedCredential {
    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for ResolvedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Return the first of `primary`, then `alternates` in order, that exists.
///
/// Only the listed paths are probed.
pub fn resolve_credential(primary: &Path, alternates: &[PathBuf]) -> Result<ResolvedCredential> {
    let candidates = std::iter::once(primary).chain(alternates.iter().map(PathBuf::as_path));
    for candidate in candidates {
        if candidate.is_file() {
            return Ok(ResolvedCredential(candidate.to_path_buf()));
        }
        tracing::debug!(path = %candidate.display(), "kubeconfig candidate not present");
    }

    let mut searched = vec![primary.to_path_buf()];
    searched.extend(alternates.iter().cloned());
    Err(UpsguardError::CredentialNotFound { searched })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, rel: &str) -> PathBuf {
        let path = dir.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "apiVersion: v1\n").unwrap();
        path
    }

    #[test]
    fn primary_wins_when_present() {
        let dir = TempDir::new().unwrap();
        let primary = touch(&dir, "etc/kubernetes/admin.conf");
        let alt = touch(&dir, "etc/rancher/k3s/k3s.yaml");
        let resolved = resolve_credential(&primary, &[alt]).unwrap();
        assert_eq!(resolved.path(), primary);
    }

    #[test]
    fn first_existing_alternate_in_order() {
        let dir = TempDir::new().unwrap();
        let primary = dir.path().join("etc/kubernetes/admin.conf");
        let missing = dir.path().join("etc/rancher/k3s/k3s.yaml");
        let second = touch(&dir, "etc/rancher/rke2/rke2.yaml");
        let third = touch(&dir, "root/.kube/config");

        let resolved =
            resolve_credential(&primary, &[missing, second.clone(), third]).unwrap();
        assert_eq!(resolved.path(), second);
    }

    #[test]
    fn none_present_lists_every_candidate() {
        let dir = TempDir::new().unwrap();
        let primary = dir.path().join("a");
        let alt = dir.path().join("b");
        let err = resolve_credential(&primary, &[alt.clone()]).unwrap_err();
        match err {
            UpsguardError::CredentialNotFound { searched } => {
                assert_eq!(searched, vec![primary, alt]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn directory_is_not_a_credential() {
        let dir = TempDir::new().unwrap();
        let primary = dir.path().join("etc");
        std::fs::create_dir_all(&primary).unwrap();
        assert!(resolve_credential(&primary, &[]).is_err());
    }
}
