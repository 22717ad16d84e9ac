// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Teardown of the launched process tree.
//!
//! The service forks router and worker processes that outlive the leader if
//! only the leader is signalled. Descendants are snapshotted before any
//! signal is sent, since they are reparented once the leader dies. Members
//! of the leader's process group are tracked as well, which covers workers
//! already orphaned by a leader that crashed before teardown.
//!
//! Teardown is synchronous so [`ServiceGuard`] can run it from `Drop`.

use std::collections::HashSet;
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::getpgid;
use serde::Serialize;
use sysinfo::{Pid, ProcessStatus, System};

use crate::config::TeardownConfig;
use crate::supervisor::ServiceHandle;

/// Interval between liveness polls while waiting for the tree to exit.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long to wait for SIGKILL to take effect before counting leftovers.
const KILL_SETTLE: Duration = Duration::from_secs(1);

/// Counts of processes handled by one teardown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    /// Processes that were sent SIGTERM.
    pub signalled: usize,
    /// Processes still alive after the grace period and sent SIGKILL.
    pub forced: usize,
    /// Processes still present afterwards. Informational only.
    pub remaining: usize,
}

/// Stops everything the service started.
///
/// Implementations must not fail: every error is logged and swallowed.
pub trait Teardown {
    /// `handle` is `None` when the launch itself failed.
    fn teardown(&mut self, handle: Option<&ServiceHandle>) -> TeardownReport;
}

/// Default teardown: SIGTERM the whole tree and process group, wait the
/// grace period, SIGKILL survivors.
#[derive(Debug, Clone)]
pub struct ProcessTreeTeardown {
    config: TeardownConfig,
}

impl ProcessTreeTeardown {
    pub fn new(config: TeardownConfig) -> Self {
        Self { config }
    }

    fn stop_tree(&self, handle: &ServiceHandle, sys: &mut System) -> (TeardownReport, Vec<Pid>) {
        let leader = Pid::from_u32(handle.leader().value());
        let group = handle.leader().as_nix();

        reap_leader(handle);
        sys.refresh_processes();
        let descendants = descendants_of(sys, leader);
        let mut tree = descendants.clone();
        for pid in group_members(sys, group) {
            if pid != leader && !tree.contains(&pid) {
                tree.push(pid);
            }
        }

        tracing::info!(
            pid = handle.leader().value(),
            uptime_ms = handle.uptime().as_millis(),
            descendants = descendants.len(),
            group_members = tree.len() - descendants.len(),
            grace_ms = self.config.grace_period.as_millis(),
            "Tearing down service process tree"
        );

        let mut report = TeardownReport::default();
        for pid in &tree {
            if send(*pid, Signal::SIGTERM) {
                report.signalled += 1;
            }
        }
        tree.push(leader);
        if send(leader, Signal::SIGTERM) {
            report.signalled += 1;
        }
        if let Err(e) = signal::killpg(group, Signal::SIGTERM) {
            tracing::debug!(error = %e, "SIGTERM to process group failed");
        }

        let deadline = Instant::now() + self.config.grace_period;
        let mut survivors = live_members(sys, handle, &tree);
        while !survivors.is_empty() && Instant::now() < deadline {
            thread::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
            survivors = live_members(sys, handle, &tree);
        }

        // The group may outlive every pid we know about.
        if !survivors.is_empty() || group_exists(group) {
            if survivors.is_empty() {
                tracing::debug!("Process group still present, sending SIGKILL");
            } else {
                tracing::warn!(
                    survivors = survivors.len(),
                    "Processes ignored SIGTERM, sending SIGKILL"
                );
            }
            for pid in &survivors {
                if send(*pid, Signal::SIGKILL) {
                    report.forced += 1;
                }
            }
            if let Err(e) = signal::killpg(group, Signal::SIGKILL) {
                tracing::debug!(error = %e, "SIGKILL to process group failed");
            }

            let settle = Instant::now() + KILL_SETTLE;
            survivors = live_members(sys, handle, &tree);
            while !survivors.is_empty() && Instant::now() < settle {
                thread::sleep(POLL_INTERVAL);
                survivors = live_members(sys, handle, &tree);
            }
        }

        reap_leader(handle);
        (report, survivors)
    }
}

impl Teardown for ProcessTreeTeardown {
    fn teardown(&mut self, handle: Option<&ServiceHandle>) -> TeardownReport {
        let mut sys = System::new();

        let (mut report, survivors) = match handle {
            Some(handle) => self.stop_tree(handle, &mut sys),
            None => {
                tracing::info!("No service handle, running leftover sweep only");
                (TeardownReport::default(), Vec::new())
            }
        };

        sys.refresh_processes();
        let mut leftovers: HashSet<Pid> = survivors
            .into_iter()
            .filter(|pid| is_running(&sys, *pid))
            .collect();
        if let Some(handle) = handle {
            leftovers.extend(group_members(&sys, handle.leader().as_nix()));
        }
        if let Some(pattern) = &self.config.match_pattern {
            leftovers.extend(matching_processes(&sys, pattern));
        }
        report.remaining = leftovers.len();

        if report.remaining > 0 {
            tracing::warn!(
                remaining = report.remaining,
                "Processes still present after teardown"
            );
        } else {
            tracing::info!(
                signalled = report.signalled,
                forced = report.forced,
                "Teardown complete"
            );
        }

        report
    }
}

/// Owns the service handle for the lifetime of the run and guarantees one
/// teardown, whether the run ends normally, early, or by panic.
pub struct ServiceGuard<T: Teardown> {
    handle: Option<ServiceHandle>,
    teardown: T,
    done: bool,
}

impl<T: Teardown> ServiceGuard<T> {
    pub fn new(handle: ServiceHandle, teardown: T) -> Self {
        Self {
            handle: Some(handle),
            teardown,
            done: false,
        }
    }

    pub fn handle(&self) -> Option<&ServiceHandle> {
        self.handle.as_ref()
    }

    /// Tear down now and return what happened.
    pub fn release(mut self) -> TeardownReport {
        self.run()
    }

    fn run(&mut self) -> TeardownReport {
        if self.done {
            return TeardownReport::default();
        }
        self.done = true;
        let handle = self.handle.take();
        self.teardown.teardown(handle.as_ref())
    }
}

impl<T: Teardown> Drop for ServiceGuard<T> {
    fn drop(&mut self) {
        if !self.done {
            tracing::debug!("Service guard dropped without release, tearing down");
            self.run();
        }
    }
}

/// All transitive children of `root` in the current process table.
fn descendants_of(sys: &System, root: Pid) -> Vec<Pid> {
    let mut found = Vec::new();
    let mut frontier = vec![root];

    while let Some(parent) = frontier.pop() {
        for (pid, process) in sys.processes() {
            if process.parent() == Some(parent) && !found.contains(pid) && *pid != root {
                found.push(*pid);
                frontier.push(*pid);
            }
        }
    }
    found
}

/// Tree and group members that are still running. Reaps the leader as a
/// side effect so an exited leader is not counted as a zombie survivor.
fn live_members(sys: &mut System, handle: &ServiceHandle, tree: &[Pid]) -> Vec<Pid> {
    reap_leader(handle);
    sys.refresh_processes();
    let mut live: Vec<Pid> = tree.iter().copied().filter(|pid| is_running(sys, *pid)).collect();
    for pid in group_members(sys, handle.leader().as_nix()) {
        if !live.contains(&pid) {
            live.push(pid);
        }
    }
    live
}

/// Running processes in process group `group`, wherever they were
/// reparented to.
fn group_members(sys: &System, group: nix::unistd::Pid) -> Vec<Pid> {
    sys.processes()
        .iter()
        .filter(|(_, p)| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
        .filter(|(pid, _)| {
            let nix_pid = nix::unistd::Pid::from_raw(pid.as_u32() as i32);
            getpgid(Some(nix_pid)) == Ok(group)
        })
        .map(|(pid, _)| *pid)
        .collect()
}

/// Signal 0 to the group. EPERM still means someone is in it.
fn group_exists(group: nix::unistd::Pid) -> bool {
    match signal::killpg(group, None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

fn is_running(sys: &System, pid: Pid) -> bool {
    sys.process(pid)
        .map(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
        .unwrap_or(false)
}

fn matching_processes(sys: &System, pattern: &str) -> Vec<Pid> {
    let own = sysinfo::get_current_pid().ok();
    sys.processes()
        .iter()
        .filter(|(pid, _)| Some(**pid) != own)
        .filter(|(_, p)| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
        .filter(|(_, p)| p.cmd().join(" ").contains(pattern))
        .map(|(pid, _)| *pid)
        .collect()
}

fn send(pid: Pid, sig: Signal) -> bool {
    let nix_pid = nix::unistd::Pid::from_raw(pid.as_u32() as i32);
    match signal::kill(nix_pid, sig) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(pid = pid.as_u32(), signal = ?sig, error = %e, "Signal not delivered");
            false
        }
    }
}

fn reap_leader(handle: &ServiceHandle) {
    match waitpid(handle.leader().as_nix(), Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) | Err(_) => {}
        Ok(status) => tracing::debug!(status = ?status, "Reaped service leader"),
    }
}
