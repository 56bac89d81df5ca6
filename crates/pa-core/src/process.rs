//! Lifecycle supervision of the external core binary.
//!
//! The state machine is Stopped -> Running -> Stopped: `start` spawns
//! `<binary> run -c <config>` with inherited stdio, a one-shot monitor
//! task observes exit and flips the running flag, `stop` sends SIGTERM
//! and escalates to SIGKILL after the grace period. `restart` leaves a
//! short gap so listening sockets are released before the new process
//! binds them.

use crate::CoreError;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{error, info, warn};

const STOP_GRACE: Duration = Duration::from_secs(5);
const RESTART_GAP: Duration = Duration::from_millis(500);

#[derive(Default)]
struct ProcState {
    pid: Option<i32>,
    running: bool,
    exited: Option<watch::Receiver<bool>>,
}

/// Supervisor for the core child process. Cheap to clone; all clones
/// share the same process slot.
#[derive(Clone)]
pub struct Supervisor {
    binary: PathBuf,
    config_path: PathBuf,
    asset_path: PathBuf,
    state: Arc<Mutex<ProcState>>,
}

impl Supervisor {
    pub fn new(
        binary: impl Into<PathBuf>,
        config_path: impl Into<PathBuf>,
        asset_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            binary: binary.into(),
            config_path: config_path.into(),
            asset_path: asset_path.into(),
            state: Arc::new(Mutex::new(ProcState::default())),
        }
    }

    /// Spawn the core. Idempotent while a child is already running.
    pub async fn start(&self) -> Result<(), CoreError> {
        let (mut child, pid, exit_tx) = {
            // Spawn under the lock so concurrent starts cannot race
            // past the running check; Command::spawn does not await.
            let mut state = self.state.lock();
            if state.running {
                return Ok(());
            }
            let child = Command::new(&self.binary)
                .arg("run")
                .arg("-c")
                .arg(&self.config_path)
                .env("XRAY_LOCATION_ASSET", &self.asset_path)
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .spawn()
                .map_err(|source| CoreError::Spawn {
                    binary: self.binary.clone(),
                    source,
                })?;
            let pid = child.id().map(|p| p as i32);
            let (exit_tx, exit_rx) = watch::channel(false);
            state.pid = pid;
            state.running = true;
            state.exited = Some(exit_rx);
            (child, pid, exit_tx)
        };
        info!(pid, "core process started");

        let slot = Arc::clone(&self.state);
        tokio::spawn(async move {
            let status = child.wait().await;
            {
                let mut state = slot.lock();
                state.running = false;
                state.pid = None;
            }
            match status {
                Ok(es) if es.success() => info!("core process exited"),
                Ok(es) => error!(code = ?es.code(), "core process exited with error"),
                Err(e) => error!(error = %e, "waiting on core process failed"),
            }
            let _ = exit_tx.send(true);
        });

        Ok(())
    }

    /// Terminate the core: SIGTERM, then SIGKILL if the grace period
    /// elapses. A stopped core is a no-op.
    pub async fn stop(&self) -> Result<(), CoreError> {
        let (pid, exited) = {
            let state = self.state.lock();
            if !state.running {
                return Ok(());
            }
            (state.pid, state.exited.clone())
        };
        let Some(pid) = pid else {
            return Ok(());
        };

        info!(pid, "stopping core process");
        signal(pid, libc::SIGTERM);

        if let Some(mut exited) = exited {
            let graceful = tokio::time::timeout(STOP_GRACE, exited.wait_for(|done| *done))
                .await
                .is_ok();
            if graceful {
                info!("core process stopped gracefully");
            } else {
                warn!(pid, "core did not stop gracefully, killing");
                signal(pid, libc::SIGKILL);
                let _ = exited.wait_for(|done| *done).await;
            }
        }

        self.state.lock().running = false;
        Ok(())
    }

    /// Stop then start, with a gap so the old listeners are released.
    pub async fn restart(&self) -> Result<(), CoreError> {
        self.stop().await?;
        tokio::time::sleep(RESTART_GAP).await;
        self.start().await
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Raw `version` stdout of the core binary, best-effort.
    pub async fn version(&self) -> String {
        version_output(&self.binary).await.unwrap_or_else(|| "unknown".to_string())
    }
}

async fn version_output(binary: &Path) -> Option<String> {
    let output = Command::new(binary).arg("version").output().await.ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok().map(|s| s.trim().to_string())
}

fn signal(pid: i32, sig: libc::c_int) {
    // SAFETY: plain kill(2) on a pid we spawned; an exited pid yields
    // ESRCH which we deliberately ignore (the monitor has already
    // flagged the exit).
    let rc = unsafe { libc::kill(pid, sig) };
    if rc != 0 {
        tracing::debug!(pid, sig, "kill returned an error, process likely gone");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    /// A stand-in core: ignores its arguments and sleeps until signalled.
    fn fake_core(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("fake-core");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "#!/bin/sh\nif [ \"$1\" = version ]; then echo 'Xray 1.8.4 (fake)'; exit 0; fi\nexec sleep 60").unwrap();
        drop(f);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn supervisor(dir: &tempfile::TempDir) -> Supervisor {
        Supervisor::new(fake_core(dir), dir.path().join("config.json"), dir.path())
    }

    #[tokio::test]
    async fn start_stop_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir);

        sup.start().await.unwrap();
        assert!(sup.is_running());

        sup.stop().await.unwrap();
        assert!(!sup.is_running());
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir);

        sup.start().await.unwrap();
        let pid_first = sup.state.lock().pid;
        sup.start().await.unwrap();
        assert_eq!(sup.state.lock().pid, pid_first);

        sup.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_when_stopped_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir);
        sup.stop().await.unwrap();
        assert!(!sup.is_running());
    }

    #[tokio::test]
    async fn monitor_observes_external_exit() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir);
        sup.start().await.unwrap();
        let pid = sup.state.lock().pid.unwrap();

        signal(pid, libc::SIGKILL);
        // Give the monitor task a moment to reap the child.
        for _ in 0..50 {
            if !sup.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!sup.is_running());
    }

    #[tokio::test]
    async fn restart_spawns_a_new_process() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir);
        sup.start().await.unwrap();
        let pid_first = sup.state.lock().pid;

        sup.restart().await.unwrap();
        assert!(sup.is_running());
        assert_ne!(sup.state.lock().pid, pid_first);

        sup.stop().await.unwrap();
    }

    #[tokio::test]
    async fn version_reports_unknown_for_missing_binary() {
        let sup = Supervisor::new("/nonexistent/core", "/tmp/x.json", "/tmp");
        assert_eq!(sup.version().await, "unknown");
    }

    #[tokio::test]
    async fn version_returns_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir);
        assert_eq!(sup.version().await, "Xray 1.8.4 (fake)");
    }
}
