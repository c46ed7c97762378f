/*!
Test Harness pour les tests d'intégration de l'exporter

Démarre un mock BMC chargé avec le châssis par défaut, expose
l'environnement dont l'exporter a besoin pour le joindre, et fournit des
helpers d'attente et d'assertion sur le journal des requêtes du BMC.
*/

use crate::fixtures::MiramarChassis;
use crate::redfish_stub::{MockBmc, RunningBmc};
use anyhow::Result;
use std::collections::HashMap;
use std::time::Duration;

pub const TEST_USERNAME: &str = "admin";
pub const TEST_PASSWORD: &str = "Sup3rS3cret";

pub struct TestHarness {
    pub bmc: MockBmc,
    pub chassis: MiramarChassis,
    running: RunningBmc,
}

impl TestHarness {
    /// Mock BMC avec le châssis par défaut, basic auth et sessions acceptées
    pub async fn start() -> Result<Self> {
        Self::start_with(MiramarChassis::default(), false).await
    }

    /// Mock BMC n'acceptant que les tokens de session
    pub async fn start_session_only() -> Result<Self> {
        Self::start_with(MiramarChassis::default(), true).await
    }

    pub async fn start_with(chassis: MiramarChassis, sessions_only: bool) -> Result<Self> {
        env_logger::try_init().ok();

        let bmc = MockBmc::new(TEST_USERNAME, TEST_PASSWORD);
        if sessions_only {
            bmc.require_sessions();
        }
        chassis.install(&bmc);
        let running = bmc.start().await?;
        Ok(Self { bmc, chassis, running })
    }

    pub fn base_url(&self) -> &str {
        self.running.base_url()
    }

    /// Variables lues par l'exporter pour joindre ce BMC
    pub fn env(&self) -> HashMap<String, String> {
        [
            ("BMC_HOST", self.base_url()),
            ("BMC_USERNAME", TEST_USERNAME),
            ("BMC_PASSWORD", TEST_PASSWORD),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    /// Réinstalle le châssis (éventuellement modifié)
    pub fn reinstall(&self, chassis: &MiramarChassis) {
        chassis.install(&self.bmc);
    }

    /// Attend que `path` ait été demandé `count` fois
    pub async fn wait_for_requests(&self, path: &str, count: usize, timeout_ms: u64) -> bool {
        let start = std::time::Instant::now();

        while start.elapsed() < Duration::from_millis(timeout_ms) {
            if self.bmc.request_count(path) >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        log::warn!("⏰ Timeout waiting for {} request(s) on {}", count, path);
        false
    }

    pub fn assert_requested(&self, path: &str, at_least: usize) -> Result<()> {
        let actual = self.bmc.request_count(path);
        if actual < at_least {
            anyhow::bail!("expected at least {} GET {}, got {}", at_least, path, actual);
        }
        Ok(())
    }

    pub fn assert_not_requested(&self, path: &str) -> Result<()> {
        let actual = self.bmc.request_count(path);
        if actual != 0 {
            anyhow::bail!("expected no GET {}, got {}", path, actual);
        }
        Ok(())
    }
}
