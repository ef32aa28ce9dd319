// WireGuard tunnel lifecycle controller

//! Tunnel control
//!
//! Brings the WireGuard interface up or down through `wg-quick` and checks
//! interface presence through `ip link`. Creating the tunnel itself is left
//! to those tools.

use crate::error::{Result, RouteGuardError};
use crate::executor::CommandExecutor;
use crate::leak::IP;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Tunnel up/down command
pub const WG_QUICK: &str = "wg-quick";

/// Controller for one WireGuard interface
pub struct TunnelController<E> {
    exec: Arc<E>,
    interface: String,
}

impl<E: CommandExecutor> TunnelController<E> {
    /// Create a controller for `interface`
    pub fn new(exec: Arc<E>, interface: String) -> Self {
        Self { exec, interface }
    }

    /// Get the interface name
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Check if the interface currently exists using `ip link show`
    pub async fn is_up(&self) -> bool {
        match self.exec.run(IP, &["link", "show", &self.interface], None).await {
            Ok(out) => out.success(),
            Err(_) => false,
        }
    }

    /// Poll until the interface appears or `timeout` elapses
    ///
    /// # Errors
    ///
    /// Returns [`RouteGuardError::InterfaceTimeout`] if it never shows up.
    pub async fn wait_until_up(&self, timeout: Duration, poll: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_up().await {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(RouteGuardError::InterfaceTimeout {
                    iface: self.interface.clone(),
                    timeout_secs: timeout.as_secs(),
                });
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Bring up the interface with `wg-quick up`; an already-up tunnel counts as success
    pub async fn bring_up(&self) -> Result<()> {
        if !self.exec.has_program(WG_QUICK) {
            return Err(RouteGuardError::Tunnel(
                "wg-quick not found. Install wireguard-tools.".to_string(),
            ));
        }

        log::info!("Bringing up WireGuard interface: {}", self.interface);

        let out = self
            .exec
            .run(WG_QUICK, &["up", &self.interface], None)
            .await
            .map_err(|e| RouteGuardError::Tunnel(format!("Failed to execute wg-quick up: {}", e)))?;

        let text = out.combined();
        if !out.success() && !text.contains("already exists") && !text.contains("already up") {
            return Err(RouteGuardError::Tunnel(format!(
                "wg-quick up {} failed:\n{}",
                self.interface, text
            )));
        }

        Ok(())
    }

    /// Bring down the interface with `wg-quick down`
    pub async fn bring_down(&self) -> Result<()> {
        if !self.exec.has_program(WG_QUICK) {
            return Err(RouteGuardError::Tunnel(
                "wg-quick not found, cannot bring tunnel down".to_string(),
            ));
        }

        log::info!("Bringing down WireGuard interface: {}", self.interface);

        let out = self
            .exec
            .run(WG_QUICK, &["down", &self.interface], None)
            .await
            .map_err(|e| {
                RouteGuardError::Tunnel(format!("Failed to execute wg-quick down: {}", e))
            })?;

        if !out.success() {
            let text = out.combined();
            // Don't fail if interface is already down
            if !text.contains("is not a WireGuard interface") {
                return Err(RouteGuardError::Tunnel(format!(
                    "wg-quick down {} failed: {}",
                    self.interface, text
                )));
            }
        }

        log::info!("WireGuard interface {} is down", self.interface);
        Ok(())
    }
}
