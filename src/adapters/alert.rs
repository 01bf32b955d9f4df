//! Alerting for activities that end up in error states.

use anyhow::Result;
use async_trait::async_trait;
use tracing::error;

use crate::core::LiveActivityRunner;

use super::AlertStatusManager;

/// Raises alerts as error log lines
#[derive(Debug, Clone, Default)]
pub struct LoggingAlertStatusManager;

#[async_trait]
impl AlertStatusManager for LoggingAlertStatusManager {
    async fn announce(&self, runner: &LiveActivityRunner) -> Result<()> {
        let status = runner.cached_status();
        error!(
            uuid = %runner.uuid(),
            activity = %runner.display_name(),
            %status,
            "ALERT: live activity is in an error state"
        );
        Ok(())
    }
}
