// Host checks, process signalling and status reporting

//! Host checks and status reporting
//!
//! Dependency and privilege checks run before any policy is built; the status
//! summary and the instance signalling back the `status` and `stop` commands.

use crate::error::{Result, RouteGuardError};
use crate::executor::CommandExecutor;
use crate::firewall::{FirewallController, NFT};
use crate::leak::IP;
use crate::state_file::StateStore;
use crate::types::RuntimeState;
use serde::Serialize;
use std::io;

/// Commands every run needs
pub const REQUIRED_COMMANDS: [&str; 2] = [IP, NFT];

/// Required commands missing from `PATH`
pub fn check_dependencies<E: CommandExecutor>(exec: &E) -> Vec<String> {
    REQUIRED_COMMANDS
        .iter()
        .filter(|cmd| !exec.has_program(cmd))
        .map(|cmd| cmd.to_string())
        .collect()
}

/// Fail with [`RouteGuardError::Dependency`] if anything is missing
pub fn require_dependencies<E: CommandExecutor>(exec: &E) -> Result<()> {
    let missing = check_dependencies(exec);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(RouteGuardError::Dependency(format!(
            "Missing dependencies: {}",
            missing.join(", ")
        )))
    }
}

/// Effective uid of this process
pub fn effective_uid() -> u32 {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() }
}

/// Fail with [`RouteGuardError::Privilege`] unless running as root
pub fn ensure_root() -> Result<()> {
    if effective_uid() == 0 {
        Ok(())
    } else {
        Err(RouteGuardError::Privilege)
    }
}

/// Send `signal` to `pid`
///
/// Pids that do not name a single process (0, or anything outside `pid_t`)
/// are rejected with `ESRCH` instead of reaching `kill(2)`, where they would
/// address a whole process group.
pub fn send_signal(pid: u32, signal: libc::c_int) -> io::Result<()> {
    let pid = match libc::pid_t::try_from(pid) {
        Ok(pid) if pid > 0 => pid,
        _ => return Err(io::Error::from_raw_os_error(libc::ESRCH)),
    };

    // SAFETY: kill takes plain integers; pid was checked to be positive
    if unsafe { libc::kill(pid, signal) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Whether a process with `pid` exists and may be signalled by us
pub fn process_alive(pid: u32) -> bool {
    send_signal(pid, 0).is_ok()
}

/// Snapshot for `status`
#[derive(Debug, Clone, Serialize)]
pub struct StatusSummary {
    /// Whether the managed nftables table is loaded
    pub routeguard_nft_table_present: bool,
    /// Recorded runtime state, if any
    pub state: Option<RuntimeState>,
}

/// Collect firewall and runtime state
pub async fn status_summary<E: CommandExecutor>(
    firewall: &FirewallController<E>,
    store: &StateStore,
) -> StatusSummary {
    StatusSummary {
        routeguard_nft_table_present: firewall.exists().await,
        state: store.read(),
    }
}

/// Result of asking the recorded instance to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// SIGTERM delivered
    Sent(u32),
    /// The recorded pid no longer exists
    NotRunning(u32),
    /// The pid exists but belongs to someone we may not signal
    NoPermission(u32),
    /// Signalling failed for another reason
    Failed(u32),
    /// No state file was found
    NoInstance,
}

fn classify(pid: u32, result: io::Result<()>) -> StopSignal {
    match result {
        Ok(()) => StopSignal::Sent(pid),
        Err(e) => match e.raw_os_error() {
            Some(libc::ESRCH) => StopSignal::NotRunning(pid),
            Some(libc::EPERM) => StopSignal::NoPermission(pid),
            _ => {
                log::warn!("Failed to signal PID {}: {}", pid, e);
                StopSignal::Failed(pid)
            }
        },
    }
}

/// Send SIGTERM to the instance recorded in the state file
pub fn signal_recorded_instance(store: &StateStore) -> StopSignal {
    let Some(state) = store.read() else {
        log::info!("No RouteGuard state file found.");
        return StopSignal::NoInstance;
    };

    let outcome = classify(state.pid, send_signal(state.pid, libc::SIGTERM));
    match outcome {
        StopSignal::Sent(pid) => log::info!("Sent SIGTERM to RouteGuard PID {}", pid),
        StopSignal::NotRunning(pid) => log::info!("PID {} is not running.", pid),
        StopSignal::NoPermission(pid) => log::info!("No permission to signal PID {}.", pid),
        StopSignal::Failed(_) | StopSignal::NoInstance => {}
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::FakeExecutor;
    use crate::types::{EndpointRule, Mode, PolicyModel};
    use std::fs;
    use std::os::unix::process::ExitStatusExt;
    use std::path::Path;
    use std::sync::Arc;

    fn policy() -> PolicyModel {
        PolicyModel::new(
            Mode::Protect,
            "wg0".into(),
            5,
            true,
            true,
            vec![EndpointRule::udp("203.0.113.5".parse().unwrap(), 51820)],
        )
        .unwrap()
    }

    fn record_pid(path: &Path, pid: u32) {
        let state = RuntimeState {
            pid,
            started_at: "2026-01-01 00:00:00".to_string(),
            config: policy(),
            extra: serde_json::Map::new(),
        };
        fs::write(path, serde_json::to_string(&state).unwrap()).unwrap();
    }

    #[test]
    fn test_check_dependencies() {
        assert!(check_dependencies(&FakeExecutor::default()).is_empty());

        let exec = FakeExecutor::default().without_program("nft");
        assert_eq!(check_dependencies(&exec), vec!["nft".to_string()]);
        assert!(matches!(
            require_dependencies(&exec),
            Err(RouteGuardError::Dependency(ref m)) if m.contains("nft")
        ));
    }

    #[test]
    fn test_ensure_root_follows_euid() {
        assert_eq!(ensure_root().is_ok(), effective_uid() == 0);
    }

    #[test]
    fn test_process_alive() {
        assert!(process_alive(std::process::id()));
        assert!(!process_alive(0));
        assert!(!process_alive(u32::MAX));
        // Above the kernel's pid_max ceiling
        assert!(!process_alive(i32::MAX as u32));
    }

    #[test]
    fn test_classify_errno() {
        let err = |code| Err(io::Error::from_raw_os_error(code));
        assert_eq!(classify(7, Ok(())), StopSignal::Sent(7));
        assert_eq!(classify(7, err(libc::ESRCH)), StopSignal::NotRunning(7));
        assert_eq!(classify(7, err(libc::EPERM)), StopSignal::NoPermission(7));
        assert_eq!(classify(7, err(libc::EINVAL)), StopSignal::Failed(7));
    }

    #[test]
    fn test_signal_without_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(vec![dir.path().join("state.json")]);
        assert_eq!(signal_recorded_instance(&store), StopSignal::NoInstance);
    }

    #[test]
    fn test_signal_stale_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        record_pid(&path, i32::MAX as u32);

        let store = StateStore::new(vec![path]);
        assert_eq!(
            signal_recorded_instance(&store),
            StopSignal::NotRunning(i32::MAX as u32)
        );
    }

    #[test]
    fn test_signal_terminates_recorded_process() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        record_pid(&path, child.id());

        let store = StateStore::new(vec![path]);
        assert_eq!(signal_recorded_instance(&store), StopSignal::Sent(child.id()));

        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(libc::SIGTERM));
    }

    #[tokio::test]
    async fn test_status_summary() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(vec![dir.path().join("state.json")]);
        let exec = Arc::new(FakeExecutor::default());
        let firewall = FirewallController::new(Arc::clone(&exec));

        let summary = status_summary(&firewall, &store).await;
        assert!(!summary.routeguard_nft_table_present);
        assert!(summary.state.is_none());

        store.write(&policy(), serde_json::Map::new()).unwrap();
        exec.set_table_present(true);

        let summary = status_summary(&firewall, &store).await;
        assert!(summary.routeguard_nft_table_present);
        assert_eq!(summary.state.as_ref().unwrap().config, policy());
        assert_eq!(summary.state.unwrap().pid, std::process::id());
    }
}
