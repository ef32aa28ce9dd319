// Managed nftables table controller

//! Firewall control
//!
//! Applies, verifies and removes the managed `inet routeguard` table. Every
//! operation is idempotent and safe on a cold host, after removal, or when
//! another process (a separate `cleanup` invocation) races on the same table.

use crate::error::{Result, RouteGuardError};
use crate::executor::CommandExecutor;
use crate::ruleset::{build_nft_script, TABLE_FAMILY, TABLE_NAME};
use crate::types::PolicyModel;
use std::sync::Arc;

/// Firewall rule-management binary
pub const NFT: &str = "nft";

/// Controller for the managed nftables table
pub struct FirewallController<E> {
    exec: Arc<E>,
}

impl<E> Clone for FirewallController<E> {
    fn clone(&self) -> Self {
        Self {
            exec: Arc::clone(&self.exec),
        }
    }
}

impl<E: CommandExecutor> FirewallController<E> {
    /// Create a controller running `nft` through `exec`
    pub fn new(exec: Arc<E>) -> Self {
        Self { exec }
    }

    /// Replace the managed table with the ruleset compiled from `policy`
    ///
    /// # Errors
    ///
    /// Returns [`RouteGuardError::FirewallApply`] if `nft` is unavailable,
    /// rejects the script, or the table is missing afterwards.
    pub async fn apply(&self, policy: &PolicyModel) -> Result<()> {
        if !self.exec.has_program(NFT) {
            return Err(RouteGuardError::FirewallApply(
                "nft command not found. Install nftables.".to_string(),
            ));
        }

        self.delete_table().await;

        let script = build_nft_script(policy);
        let out = self
            .exec
            .run(NFT, &["-f", "-"], Some(&script))
            .await
            .map_err(|e| RouteGuardError::FirewallApply(format!("failed to run nft: {}", e)))?;

        if !out.success() {
            let diag = out.diagnostic();
            return Err(RouteGuardError::FirewallApply(format!(
                "nft failed to apply rules: {}",
                if diag.is_empty() { "unknown error" } else { diag.as_str() }
            )));
        }

        if !self.exists().await {
            return Err(RouteGuardError::FirewallApply(format!(
                "Failed to apply nft rules (table {} {} missing).",
                TABLE_FAMILY, TABLE_NAME
            )));
        }

        Ok(())
    }

    /// Delete the managed table if present; never fails
    pub async fn remove(&self) {
        if !self.exec.has_program(NFT) {
            log::debug!("nft not available, nothing to remove");
            return;
        }

        if self.delete_table().await {
            log::info!("Removed nftables table {} {}", TABLE_FAMILY, TABLE_NAME);
        } else {
            log::info!(
                "nftables table {} {} was not present (nothing to remove)",
                TABLE_FAMILY,
                TABLE_NAME
            );
        }
    }

    /// Whether the managed table is currently loaded
    pub async fn exists(&self) -> bool {
        if !self.exec.has_program(NFT) {
            return false;
        }

        match self
            .exec
            .run(NFT, &["list", "table", TABLE_FAMILY, TABLE_NAME], None)
            .await
        {
            Ok(out) => out.success(),
            Err(e) => {
                log::debug!("nft list table failed: {}", e);
                false
            }
        }
    }

    /// Returns true if a table was actually deleted
    async fn delete_table(&self) -> bool {
        match self
            .exec
            .run(NFT, &["delete", "table", TABLE_FAMILY, TABLE_NAME], None)
            .await
        {
            Ok(out) => out.success(),
            Err(e) => {
                log::debug!("nft delete table failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::FakeExecutor;
    use crate::types::{EndpointRule, Mode};

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

    fn controller(exec: FakeExecutor) -> (Arc<FakeExecutor>, FirewallController<FakeExecutor>) {
        let exec = Arc::new(exec);
        (Arc::clone(&exec), FirewallController::new(exec))
    }

    #[tokio::test]
    async fn test_apply_loads_compiled_script() {
        let (exec, fw) = controller(FakeExecutor::default());
        fw.apply(&policy()).await.unwrap();

        assert!(fw.exists().await);
        assert_eq!(exec.table_script().unwrap(), build_nft_script(&policy()));
    }

    #[tokio::test]
    async fn test_apply_twice_is_idempotent() {
        let (exec, fw) = controller(FakeExecutor::default());
        fw.apply(&policy()).await.unwrap();
        fw.apply(&policy()).await.unwrap();

        assert!(fw.exists().await);
        assert_eq!(exec.count_calls("nft -f -"), 2);
        assert_eq!(exec.count_calls("nft delete table"), 2);
    }

    #[tokio::test]
    async fn test_remove_after_apply() {
        let (_exec, fw) = controller(FakeExecutor::default());
        fw.apply(&policy()).await.unwrap();
        fw.remove().await;
        assert!(!fw.exists().await);
    }

    #[tokio::test]
    async fn test_remove_cold_start_and_double_remove() {
        let (_exec, fw) = controller(FakeExecutor::default());
        fw.remove().await;
        assert!(!fw.exists().await);
        fw.remove().await;
        assert!(!fw.exists().await);
    }

    #[tokio::test]
    async fn test_apply_rejected_script() {
        let (exec, fw) = controller(FakeExecutor::default().rejecting_scripts());
        let err = fw.apply(&policy()).await.unwrap_err();

        match err {
            RouteGuardError::FirewallApply(msg) => assert!(msg.contains("Operation not permitted")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!exec.table_present());
    }

    #[tokio::test]
    async fn test_nft_missing() {
        let (exec, fw) = controller(FakeExecutor::default().without_program("nft"));

        assert!(matches!(
            fw.apply(&policy()).await,
            Err(RouteGuardError::FirewallApply(_))
        ));
        fw.remove().await;
        assert!(!fw.exists().await);
        assert!(exec.calls().is_empty());
    }
}
