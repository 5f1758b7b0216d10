//! Daily stock scan
//!
//! Time-triggered full pass over every active lot, independent of API
//! traffic, to catch conditions that developed without a triggering
//! write (a lot silently crossing its expiration date). Read-only with
//! respect to quantities: it reads lot state and writes alert records,
//! nothing else, so racing a live mutation is harmless.
//!
//! 第一次 tick 在启动时立即触发, 重启后不会漏掉隔夜产生的过期批次。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::alerting::AlertService;
use crate::alerting::classifier::LotCondition;
use crate::inventory::InventoryLedger;
use crate::utils::time::today_utc;

/// One scan's tally, logged after each pass
#[derive(Debug, Default, Clone, Copy)]
pub struct ScanSummary {
    pub scanned: usize,
    pub low: usize,
    pub expiring: usize,
    pub expired: usize,
}

/// Periodic scan loop; runs until the shutdown token fires
pub async fn run(
    ledger: Arc<InventoryLedger>,
    alerts: Arc<AlertService>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Stock scan task stopped");
                break;
            }
            _ = interval.tick() => {
                let summary = scan_once(&ledger, &alerts).await;
                tracing::info!(
                    scanned = summary.scanned,
                    low = summary.low,
                    expiring = summary.expiring,
                    expired = summary.expired,
                    "Daily stock scan finished"
                );
            }
        }
    }
}

/// One full pass over all active lots
///
/// Listing failures abort this pass (the next tick retries); a single
/// lot never aborts the rest of the scan.
pub async fn scan_once(ledger: &InventoryLedger, alerts: &AlertService) -> ScanSummary {
    let mut summary = ScanSummary::default();

    let lots = match ledger.all_active().await {
        Ok(lots) => lots,
        Err(e) => {
            tracing::error!(error = %e, "Stock scan could not list lots, skipping this pass");
            return summary;
        }
    };

    let today = today_utc();
    for lot in &lots {
        summary.scanned += 1;
        match alerts.scan_lot(lot, today).await {
            Some(LotCondition::Low) => summary.low += 1,
            Some(LotCondition::Expiring) => summary.expiring += 1,
            Some(LotCondition::Expired) => summary.expired += 1,
            None => {}
        }
    }

    summary
}
