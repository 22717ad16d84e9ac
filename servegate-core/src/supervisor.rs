// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Process supervisor for the service under test.
//!
//! Spawns the launch command as the leader of a fresh process group and
//! hands back a [`ServiceHandle`]. The supervisor does not keep the child:
//! once `launch` returns, the process tree belongs to the teardown manager.

use std::fs::OpenOptions;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};

use crate::config::ServiceConfig;
use crate::error::SupervisorError;
use crate::types::ProcessId;

/// Identifies a launched service by its process-group leader.
///
/// Immutable after creation. Liveness checks read it but never change it.
#[derive(Debug)]
pub struct ServiceHandle {
    leader: ProcessId,
    started_at: Instant,
    started_at_utc: DateTime<Utc>,
}

impl ServiceHandle {
    /// PID of the group leader. The process group id is the same value.
    pub fn leader(&self) -> ProcessId {
        self.leader
    }

    pub fn started_at_utc(&self) -> DateTime<Utc> {
        self.started_at_utc
    }

    /// Time since launch, for teardown logging.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Spawn the service as a detached process group.
///
/// # Errors
/// Returns SupervisorError if the log file cannot be opened or the command
/// fails to start. Nothing is left running in that case.
pub fn launch(config: &ServiceConfig) -> Result<ServiceHandle, SupervisorError> {
    let (stdout, stderr) = match &config.log_file {
        Some(path) => {
            let log_err = |e: std::io::Error| SupervisorError::LogFile {
                path: path.clone(),
                reason: e.to_string(),
            };
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(log_err)?;
            let file_err = file.try_clone().map_err(log_err)?;
            (Stdio::from(file), Stdio::from(file_err))
        }
        None => (Stdio::inherit(), Stdio::inherit()),
    };

    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args)
        .envs(&config.environment)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .process_group(0);

    if let Some(dir) = &config.working_dir {
        cmd.current_dir(dir);
    }

    let child = cmd.spawn().map_err(|e| SupervisorError::SpawnFailed {
        program: config.command.clone(),
        reason: e.to_string(),
    })?;

    let pid = child.id();
    // Dropping a std Child neither kills nor waits; the leader is reaped by
    // is_alive or by teardown.
    drop(child);

    let leader = ProcessId::new(pid).map_err(|_| SupervisorError::InvalidPid { pid })?;

    tracing::info!(
        pid = leader.value(),
        command = %config.command,
        args = ?config.args,
        "Launched service process group"
    );

    Ok(ServiceHandle {
        leader,
        started_at: Instant::now(),
        started_at_utc: Utc::now(),
    })
}

/// Check whether the leader process still exists. Never blocks.
///
/// An exited leader that is still our child is reaped here, so it is not
/// mistaken for a live zombie.
pub fn is_alive(handle: &ServiceHandle) -> bool {
    let pid = handle.leader.as_nix();

    match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) => true,
        Ok(WaitStatus::Exited(_, code)) => {
            tracing::debug!(pid = %handle.leader, code, "Service leader exited");
            false
        }
        Ok(WaitStatus::Signaled(_, sig, _)) => {
            tracing::debug!(pid = %handle.leader, signal = ?sig, "Service leader killed by signal");
            false
        }
        Ok(_) => true,
        // Not our child (or already reaped): fall back to a signal-0 probe.
        Err(_) => signal_probe(handle.leader),
    }
}

/// Signal-0 existence probe. EPERM means the process exists but belongs to
/// someone else.
pub(crate) fn signal_probe(pid: ProcessId) -> bool {
    match signal::kill(pid.as_nix(), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn shell(script: &str) -> ServiceConfig {
        ServiceConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            environment: HashMap::new(),
            working_dir: None,
            log_file: None,
        }
    }

    #[test]
    fn test_launch_and_detect_exit() {
        let handle = launch(&shell("exit 0")).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while is_alive(&handle) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(!is_alive(&handle));
    }

    #[test]
    fn test_launch_runs_in_own_process_group() {
        let handle = launch(&shell("sleep 5")).unwrap();
        assert!(is_alive(&handle));

        let pgid = nix::unistd::getpgid(Some(handle.leader().as_nix())).unwrap();
        assert_eq!(pgid, handle.leader().as_nix());

        let _ = signal::killpg(handle.leader().as_nix(), signal::Signal::SIGKILL);
        let _ = waitpid(handle.leader().as_nix(), None);
    }

    #[test]
    fn test_launch_missing_binary() {
        let config = ServiceConfig {
            command: "/nonexistent/servegate-service".to_string(),
            ..shell("")
        };
        assert!(matches!(
            launch(&config),
            Err(SupervisorError::SpawnFailed { .. })
        ));
    }

    #[test]
    fn test_launch_writes_log_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join("service.log");
        let config = ServiceConfig {
            log_file: Some(log.clone()),
            ..shell("echo hello-from-service")
        };

        let handle = launch(&config).unwrap();
        let _ = waitpid(handle.leader().as_nix(), None);

        let content = std::fs::read_to_string(&log).unwrap();
        assert!(content.contains("hello-from-service"));
    }
}
