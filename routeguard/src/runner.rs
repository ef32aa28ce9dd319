// Lifecycle runner for one protection/monitoring session

//! Lifecycle runner
//!
//! Sequences one run: optional tunnel bring-up, mode dispatch, state
//! persistence, the monitor loop and teardown. Cancellation is cooperative
//! through a [`StopHandle`] polled every tick, so a stop request is honoured
//! within one tick whatever the poll interval. Teardown runs on every exit
//! path, each step independent of the previous one's outcome.
//!
//! ```text
//! Starting -> [BringingUpTunnel] -> ModeDispatch -> Monitoring -> Stopping -> Terminated
//!                                        |  off                      ^
//!                                        +---------------------------+
//! ```

use crate::error::{Result, RouteGuardError};
use crate::executor::CommandExecutor;
use crate::firewall::FirewallController;
use crate::leak::LeakDetector;
use crate::state_file::StateStore;
use crate::tunnel::TunnelController;
use crate::types::{Mode, PolicyModel};
use std::collections::BTreeSet;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;

/// Granularity at which the monitor loop checks for a stop request
pub const STOP_TICK: Duration = Duration::from_millis(100);

/// Poll period while waiting for the tunnel device
pub const INTERFACE_POLL: Duration = Duration::from_millis(500);

/// Default bound on the tunnel device wait
pub const INTERFACE_TIMEOUT: Duration = Duration::from_secs(10);

/// Receives the runner's progress lines
///
/// Implemented by whatever observes a run: the CLI (via the `log` facade),
/// an embedding host (via a channel), or a test harness (via a closure).
pub trait RunLog: Send + Sync {
    /// Record one progress line
    fn line(&self, msg: &str);
}

impl<F> RunLog for F
where
    F: Fn(&str) + Send + Sync,
{
    fn line(&self, msg: &str) {
        self(msg)
    }
}

/// Forwards progress lines to the `log` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct LogFacade;

impl RunLog for LogFacade {
    fn line(&self, msg: &str) {
        if msg.starts_with("ALERT") || msg.starts_with("WARNING") {
            log::warn!("{}", msg);
        } else {
            log::info!("{}", msg);
        }
    }
}

/// Forwards progress lines over a channel to a host with its own event loop
#[derive(Debug, Clone)]
pub struct ChannelLog {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelLog {
    /// Create the sink and the receiving end the host drains
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl RunLog for ChannelLog {
    fn line(&self, msg: &str) {
        // The host may have gone away; the run must not care
        let _ = self.tx.send(msg.to_string());
    }
}

/// Shared stop flag
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// A handle with no stop requested
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to stop at its next tick
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested
    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Phases of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// Logging the start banner
    Starting,
    /// Running `wg-quick up`
    BringingUpTunnel,
    /// Acting on the policy mode
    ModeDispatch,
    /// Persisted state, looping over monitor cycles
    Monitoring,
    /// Tearing down
    Stopping,
    /// Teardown finished
    Terminated,
}

/// Knobs that are not part of the policy itself
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Run `wg-quick up` before anything else
    pub auto_up_vpn: bool,
    /// Run `wg-quick down` during teardown
    pub auto_down_vpn_on_exit: bool,
    /// Remove the managed table during teardown (protect mode only)
    pub cleanup_nft_on_exit: bool,
    /// Bound on the tunnel device wait in protect mode
    pub interface_timeout: Duration,
    /// Poll period of the tunnel device wait
    pub interface_poll: Duration,
    /// Stop-request polling granularity inside the poll interval
    pub tick: Duration,
    /// Extra top-level keys for the state record
    pub state_extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            auto_up_vpn: false,
            auto_down_vpn_on_exit: false,
            cleanup_nft_on_exit: true,
            interface_timeout: INTERFACE_TIMEOUT,
            interface_poll: INTERFACE_POLL,
            tick: STOP_TICK,
            state_extra: serde_json::Map::new(),
        }
    }
}

/// Orchestrates one run against the host
pub struct LifecycleRunner<E, L = LogFacade> {
    policy: PolicyModel,
    options: RunnerOptions,
    firewall: FirewallController<E>,
    tunnel: TunnelController<E>,
    detector: LeakDetector<E>,
    store: StateStore,
    log: L,
    stop: StopHandle,
    warned: BTreeSet<String>,
    phase: RunPhase,
}

impl<E: CommandExecutor, L: RunLog> LifecycleRunner<E, L> {
    /// Build a runner; nothing touches the host until [`run`](Self::run)
    pub fn new(
        policy: PolicyModel,
        options: RunnerOptions,
        exec: Arc<E>,
        store: StateStore,
        log: L,
    ) -> Self {
        let tunnel = TunnelController::new(Arc::clone(&exec), policy.vpn_iface().to_string());
        Self {
            firewall: FirewallController::new(Arc::clone(&exec)),
            detector: LeakDetector::new(exec),
            tunnel,
            policy,
            options,
            store,
            log,
            stop: StopHandle::new(),
            warned: BTreeSet::new(),
            phase: RunPhase::Starting,
        }
    }

    /// Handle for requesting a stop from elsewhere (signal task, host UI)
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Current phase
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Policy this runner enforces
    pub fn policy(&self) -> &PolicyModel {
        &self.policy
    }

    /// Run until stopped, then tear down
    ///
    /// Teardown runs whether the run ends normally, by stop request or by
    /// error; the original outcome is returned unchanged.
    pub async fn run(&mut self) -> Result<()> {
        let result = self.run_phases().await;
        self.enter(RunPhase::Stopping);
        self.teardown().await;
        self.enter(RunPhase::Terminated);
        result
    }

    fn enter(&mut self, phase: RunPhase) {
        log::debug!("Phase: {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    async fn run_phases(&mut self) -> Result<()> {
        self.enter(RunPhase::Starting);
        self.log.line(&format!(
            "RouteGuard starting: mode={}, iface={}, interval={}s",
            self.policy.mode(),
            self.policy.vpn_iface(),
            self.policy.poll_interval_sec()
        ));
        let endpoints: Vec<String> = self.policy.endpoints().iter().map(|e| e.to_string()).collect();
        self.log.line(&format!("Endpoints: {}", endpoints.join(", ")));

        if self.options.auto_up_vpn {
            self.enter(RunPhase::BringingUpTunnel);
            self.tunnel.bring_up().await?;
            self.log.line(&format!(
                "WireGuard interface '{}' is up (or already up).",
                self.tunnel.interface()
            ));
        }

        self.enter(RunPhase::ModeDispatch);
        match self.policy.mode() {
            Mode::Off => {
                self.firewall.remove().await;
                self.log.line("Off mode: exiting.");
                return Ok(());
            }
            Mode::Protect => {
                self.tunnel
                    .wait_until_up(self.options.interface_timeout, self.options.interface_poll)
                    .await?;
                self.firewall.apply(&self.policy).await?;
                self.log.line(&format!(
                    "Applied nftables rules for iface '{}' ({} endpoint rule(s)).",
                    self.policy.vpn_iface(),
                    self.policy.endpoints().len()
                ));
            }
            Mode::Monitor => {
                self.log
                    .line("Monitor mode: no nftables blocking rules will be applied.");
            }
        }

        self.enter(RunPhase::Monitoring);
        let path: PathBuf = self
            .store
            .write(&self.policy, self.options.state_extra.clone())?;
        self.log.line(&format!("State file: {}", path.display()));

        self.warned.clear();
        while !self.stop.is_stop_requested() {
            self.monitor_cycle().await;
            self.sleep_interval().await;
        }

        self.log.line("Stopping RouteGuard...");
        Ok(())
    }

    async fn monitor_cycle(&mut self) {
        if self.policy.mode() == Mode::Protect && !self.firewall.exists().await {
            self.log.line("WARNING: nft table missing, re-applying rules.");
            if let Err(e) = self.firewall.apply(&self.policy).await {
                self.log
                    .line(&format!("WARNING: re-applying rules failed, will retry: {}", e));
            }
        }

        let current = self.detector.scan_host(self.policy.vpn_iface()).await;
        for msg in self.record_alerts(current) {
            self.log
                .line(&format!("ALERT suspicious route detected: {}", msg));
        }
    }

    /// Replace the warned set with `current`, returning entries not in the previous set
    ///
    /// A route that disappears for one cycle and comes back is reported again.
    fn record_alerts(&mut self, current: BTreeSet<String>) -> Vec<String> {
        let fresh = current.difference(&self.warned).cloned().collect();
        self.warned = current;
        fresh
    }

    async fn sleep_interval(&self) {
        let interval = Duration::from_secs(self.policy.poll_interval_sec());
        let tick = self.options.tick.max(Duration::from_millis(1));
        let ticks = (interval.as_millis() / tick.as_millis()).max(1);

        for _ in 0..ticks {
            if self.stop.is_stop_requested() {
                break;
            }
            tokio::time::sleep(tick).await;
        }
    }

    async fn teardown(&mut self) {
        if self.options.cleanup_nft_on_exit && self.policy.mode() == Mode::Protect {
            self.firewall.remove().await;
        }

        if self.options.auto_down_vpn_on_exit {
            if let Err(e) = self.tunnel.bring_down().await {
                self.log.line(&format!("WARNING wg-quick down failed: {}", e));
            }
        }

        self.store.remove();
    }
}

/// Turn SIGINT and SIGTERM into stop requests
///
/// Only the owner of the process entry point should call this; an embedded
/// runner is stopped through its [`StopHandle`] instead.
pub fn watch_signals(stop: StopHandle) -> io::Result<tokio::task::JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sigterm.recv() => log::info!("Received SIGTERM, stopping..."),
                _ = sigint.recv() => log::info!("Received SIGINT, stopping..."),
            }
            stop.request_stop();
        }
    }))
}

/// A runner executing on its own thread
pub struct WorkerHandle {
    stop: StopHandle,
    thread: thread::JoinHandle<Result<()>>,
}

impl WorkerHandle {
    /// Ask the run to stop at its next tick
    pub fn request_stop(&self) {
        self.stop.request_stop();
    }

    /// Handle for stopping the run from another thread
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Whether the worker thread has exited
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the run (including teardown) to finish
    pub fn join(self) -> Result<()> {
        self.thread
            .join()
            .map_err(|_| RouteGuardError::Io(io::Error::other("runner thread panicked")))?
    }
}

/// Run `runner` on a dedicated thread with its own tokio runtime
///
/// Keeps a host event loop responsive; the host talks to the run only
/// through the returned handle and the runner's [`RunLog`].
pub fn spawn_worker<E, L>(mut runner: LifecycleRunner<E, L>) -> io::Result<WorkerHandle>
where
    E: CommandExecutor + 'static,
    L: RunLog + 'static,
{
    let stop = runner.stop_handle();
    let thread = thread::Builder::new()
        .name("routeguard-worker".to_string())
        .spawn(move || -> Result<()> {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(runner.run())
        })?;

    Ok(WorkerHandle { stop, thread })
}
