//! Single-flight guard for the shutdown procedure.
//!
//! The UPS monitor can fire the critical event again while a shutdown is
//! still running. The guard is a lock file holding the owner's PID; a lock
//! whose owner is gone is stale and gets replaced.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum GuardState {
    Acquired(RunGuard),
    /// Another live process holds the lock.
    Held { pid: u32 },
}

/// Removes the lock file when dropped.
#[derive(Debug)]
pub struct RunGuard {
    path: PathBuf,
}

impl RunGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), error = %e, "could not remove run lock");
        }
    }
}

pub fn acquire(path: &Path) -> std::io::Result<GuardState> {
    acquire_with(path, std::process::id(), pid_alive)
}

fn acquire_with(
    path: &Path,
    own_pid: u32,
    alive: fn(u32) -> bool,
) -> std::io::Result<GuardState> {
    // Two tries: the second follows removal of a stale lock.
    for _ in 0..2 {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                writeln!(file, "{own_pid}")?;
                return Ok(GuardState::Acquired(RunGuard {
                    path: path.to_path_buf(),
                }));
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(path)
                    .ok()
                    .and_then(|s| s.trim().parse::<u32>().ok());
                match holder {
                    Some(pid) if pid != own_pid && alive(pid) => {
                        return Ok(GuardState::Held { pid });
                    }
                    _ => {
                        tracing::warn!(
                            path = %path.display(),
                            holder = ?holder,
                            "removing stale run lock"
                        );
                        match std::fs::remove_file(path) {
                            Ok(()) => {}
                            Err(e) if e.kind() == ErrorKind::NotFound => {}
                            Err(e) => return Err(e),
                        }
                    }
                }
            }
            Err(e) => return Err(e),
        }
    }
    Err(std::io::Error::new(
        ErrorKind::AlreadyExists,
        format!("run lock {} keeps reappearing", path.display()),
    ))
}

fn pid_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}
