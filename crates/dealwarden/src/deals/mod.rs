//! Deal proposal and state watching.

mod watch;

use crate::address::Address;
use crate::api::ChainApi;
use crate::config::DealsConfig;
use crate::core::{Cid, DealConfig};
use crate::error::{ConfigError, DealError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, error, info, warn};

/// Result of a [`DealModule::store`] call.
///
/// `proposals.len() + failed.len()` always equals the number of configs
/// passed in. Both lists keep input order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreOutcome {
    pub proposals: Vec<Cid>,
    pub failed: Vec<DealConfig>,
}

/// Proposes deals and watches their on-chain state.
pub struct DealModule {
    api: Arc<dyn ChainApi>,
    cfg: DealsConfig,
}

impl DealModule {
    pub fn new(api: Arc<dyn ChainApi>, cfg: DealsConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        Ok(Self { api, cfg })
    }

    pub fn config(&self) -> &DealsConfig {
        &self.cfg
    }

    /// Propose a deal for `data` to every provider in `configs`.
    ///
    /// The payload is staged to a temporary file under the import path and
    /// imported once; the file is removed before returning. A bad provider
    /// address or a rejected proposal only fails that config.
    ///
    /// # Errors
    ///
    /// Staging, import, a malformed `wallet` or a zero `duration` abort the
    /// whole call before any provider is contacted.
    pub async fn store<R>(
        &self,
        wallet: &str,
        data: R,
        configs: &[DealConfig],
        duration: u64,
    ) -> Result<StoreOutcome>
    where
        R: AsyncRead + Unpin + Send,
    {
        if duration == 0 {
            return Err(DealError::InvalidDuration);
        }

        let staged = self.stage(data).await?;
        let data_cid = self
            .api
            .client_import(staged.path())
            .await
            .map_err(DealError::Import)?;
        debug!(data = %data_cid, path = %staged.path().display(), "imported payload");

        let client: Address = wallet.parse()?;

        let mut outcome = StoreOutcome::default();
        for cfg in configs {
            let provider: Address = match cfg.provider.parse() {
                Ok(provider) => provider,
                Err(e) => {
                    error!(provider = %cfg.provider, error = %e, "invalid provider address");
                    outcome.failed.push(cfg.clone());
                    continue;
                }
            };

            match self
                .api
                .client_start_deal(&data_cid, &client, &provider, &cfg.epoch_price, duration)
                .await
            {
                Ok(proposal) => {
                    debug!(%provider, %proposal, "deal proposed");
                    outcome.proposals.push(proposal);
                }
                Err(e) => {
                    error!(%provider, price = %cfg.epoch_price, error = %e, "starting deal failed");
                    outcome.failed.push(cfg.clone());
                }
            }
        }

        if let Err(e) = staged.close() {
            warn!(error = %e, "removing staged import failed");
        }

        info!(
            data = %data_cid,
            proposed = outcome.proposals.len(),
            failed = outcome.failed.len(),
            "store finished"
        );
        Ok(outcome)
    }

    /// Copy the whole payload into a fresh `import-*` file.
    async fn stage<R>(&self, mut data: R) -> Result<NamedTempFile>
    where
        R: AsyncRead + Unpin + Send,
    {
        let staged = tempfile::Builder::new()
            .prefix("import-")
            .tempfile_in(&self.cfg.import_path)
            .map_err(DealError::TempFile)?;

        let file = staged.reopen().map_err(DealError::TempFile)?;
        let mut file = tokio::fs::File::from_std(file);
        tokio::io::copy(&mut data, &mut file)
            .await
            .map_err(DealError::TempFile)?;
        file.flush().await.map_err(DealError::TempFile)?;

        Ok(staged)
    }
}
