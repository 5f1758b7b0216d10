//! Inventory Ledger
//!
//! The single point of truth for lot quantities. Every quantity change in
//! the crate goes through this service (the transfer transactions embed
//! the same conditional-update statements the underlying repository owns).
//!
//! 存储连接类故障在这一层按有界指数退避重试; 业务错误直接上抛。

use chrono::NaiveDate;
use surrealdb::RecordId;

use crate::db::models::{LotIdentity, StockLot};
use crate::db::repository::StockRepository;
use crate::db::with_retry;
use crate::inventory::visibility::Scope;
use crate::utils::{AppError, AppResult};

/// Outcome of one quantity mutation - carries the pre-mutation quantity
/// so threshold crossings can be detected by the alerting layer.
#[derive(Debug, Clone)]
pub struct LotChange {
    pub lot: StockLot,
    pub previous_quantity: i64,
}

#[derive(Clone)]
pub struct InventoryLedger {
    stocks: StockRepository,
}

impl InventoryLedger {
    pub fn new(stocks: StockRepository) -> Self {
        Self { stocks }
    }

    /// Look up a lot, `NotFound` when missing
    pub async fn get(&self, id: &RecordId) -> AppResult<StockLot> {
        let lot = with_retry("stock.find_by_id", || self.stocks.find_by_id(id)).await?;
        lot.ok_or_else(|| AppError::not_found(format!("Stock lot {} not found", id)))
    }

    /// Merge-on-create: receiving the same batch at the same place twice
    /// never creates a duplicate row. Returns `(change, merged)`.
    pub async fn find_or_create(
        &self,
        identity: &LotIdentity,
        quantity: i64,
        expiration_date: NaiveDate,
        created_by: &str,
    ) -> AppResult<(LotChange, bool)> {
        if quantity <= 0 {
            return Err(AppError::validation("Quantity must be positive"));
        }
        let (lot, merged) = with_retry("stock.upsert_merge", || {
            self.stocks
                .upsert_merge(identity, quantity, expiration_date, created_by)
        })
        .await?;
        let previous_quantity = if merged { lot.quantity - quantity } else { 0 };
        Ok((
            LotChange {
                lot,
                previous_quantity,
            },
            merged,
        ))
    }

    /// Atomic conditional decrement of one specific lot
    ///
    /// `InsufficientStock` when the balance cannot cover `amount`; the
    /// guard and the subtraction are one storage operation, so two racing
    /// decrements serialize instead of losing one.
    pub async fn decrement(&self, id: &RecordId, amount: i64) -> AppResult<LotChange> {
        if amount <= 0 {
            return Err(AppError::validation("Amount must be positive"));
        }
        let updated = with_retry("stock.decrement", || self.stocks.decrement(id, amount)).await?;
        match updated {
            Some(lot) => Ok(LotChange {
                previous_quantity: lot.quantity + amount,
                lot,
            }),
            None => {
                // Guard did not match - distinguish missing from insufficient
                let lot = self.get(id).await?;
                Err(AppError::insufficient(format!(
                    "Lot {} holds {} doses, cannot debit {}",
                    lot.batch_number, lot.quantity, amount
                )))
            }
        }
    }

    /// Atomic increment (merge credits, restores)
    pub async fn credit(&self, id: &RecordId, amount: i64) -> AppResult<LotChange> {
        if amount <= 0 {
            return Err(AppError::validation("Amount must be positive"));
        }
        let updated = with_retry("stock.credit", || self.stocks.credit(id, amount)).await?;
        match updated {
            Some(lot) => Ok(LotChange {
                previous_quantity: lot.quantity - amount,
                lot,
            }),
            None => Err(AppError::not_found(format!("Stock lot {} not found", id))),
        }
    }

    /// FEFO consumption: pick the earliest-expiring lot at the facility
    /// able to cover `amount`; a caller that loses the decrement race
    /// retries against the next candidate.
    pub async fn consume_fefo(
        &self,
        vaccine: &str,
        health_center: &str,
        assigned_to: Option<&str>,
        amount: i64,
    ) -> AppResult<LotChange> {
        if amount <= 0 {
            return Err(AppError::validation("Amount must be positive"));
        }
        let candidates = with_retry("stock.fefo_candidates", || {
            self.stocks
                .fefo_candidates(vaccine, health_center, assigned_to, amount)
        })
        .await?;

        if candidates.is_empty() {
            return Err(AppError::insufficient(format!(
                "No lot of {} at {} can cover {} doses",
                vaccine, health_center, amount
            )));
        }

        for candidate in &candidates {
            let Some(id) = candidate.id.as_ref() else {
                continue;
            };
            match with_retry("stock.decrement", || self.stocks.decrement(id, amount)).await {
                Ok(Some(lot)) => {
                    return Ok(LotChange {
                        previous_quantity: lot.quantity + amount,
                        lot,
                    });
                }
                // 并发扣减输掉了这一批, 按 FEFO 顺序试下一批
                Ok(None) => {
                    tracing::debug!(
                        batch = %candidate.batch_number,
                        "Lost decrement race, trying next FEFO candidate"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::insufficient(format!(
            "No lot of {} at {} can cover {} doses",
            vaccine, health_center, amount
        )))
    }

    /// Field edit for `PUT /api/stocks/:id`
    pub async fn update(
        &self,
        id: &RecordId,
        quantity: Option<i64>,
        expiration_date: Option<NaiveDate>,
        assigned_to: Option<Option<String>>,
    ) -> AppResult<LotChange> {
        if let Some(q) = quantity {
            if q < 0 {
                return Err(AppError::validation("Quantity cannot be negative"));
            }
        }
        let before = self.get(id).await?;
        let updated = with_retry("stock.update_fields", || {
            self.stocks
                .update_fields(id, quantity, expiration_date, assigned_to.clone())
        })
        .await?;
        match updated {
            Some(lot) => Ok(LotChange {
                lot,
                previous_quantity: before.quantity,
            }),
            None => Err(AppError::not_found(format!("Stock lot {} not found", id))),
        }
    }

    /// Logical removal (authorized actors only - enforced at the route)
    pub async fn remove(&self, id: &RecordId) -> AppResult<bool> {
        Ok(with_retry("stock.soft_delete", || self.stocks.soft_delete(id)).await?)
    }

    /// Role-scoped listing
    pub async fn visible_lots(&self, scope: &Scope) -> AppResult<Vec<StockLot>> {
        Ok(with_retry("stock.visible", || self.stocks.visible(scope)).await?)
    }

    /// Every active lot (daily scan working set)
    pub async fn all_active(&self) -> AppResult<Vec<StockLot>> {
        Ok(with_retry("stock.all_active", || self.stocks.all_active()).await?)
    }

    /// Lot lookup by identity tuple
    pub async fn find_by_identity(&self, identity: &LotIdentity) -> AppResult<Option<StockLot>> {
        Ok(with_retry("stock.find_by_identity", || {
            self.stocks.find_by_identity(identity)
        })
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbService;
    use shared::StockLevel;

    async fn ledger() -> (tempfile::TempDir, InventoryLedger) {
        let tmp = tempfile::tempdir().unwrap();
        let service = DbService::new(tmp.path().to_str().unwrap()).await.unwrap();
        (tmp, InventoryLedger::new(StockRepository::new(service.db)))
    }

    fn identity(batch: &str) -> LotIdentity {
        LotIdentity {
            vaccine: "PENTA".into(),
            batch_number: batch.into(),
            level: StockLevel::Agent,
            region: Some("Dakar".into()),
            health_center: Some("Fann".into()),
            assigned_to: None,
        }
    }

    fn expiry(days: i64) -> NaiveDate {
        chrono::Utc::now().date_naive() + chrono::Duration::days(days)
    }

    #[tokio::test]
    async fn decrement_reports_previous_quantity() {
        let (_tmp, ledger) = ledger().await;
        let (change, _) = ledger
            .find_or_create(&identity("B100"), 12, expiry(60), "u1")
            .await
            .unwrap();
        let id = change.lot.id.unwrap();

        let change = ledger.decrement(&id, 5).await.unwrap();
        assert_eq!(change.previous_quantity, 12);
        assert_eq!(change.lot.quantity, 7);
    }

    #[tokio::test]
    async fn overdraft_is_rejected_not_clamped() {
        let (_tmp, ledger) = ledger().await;
        let (change, _) = ledger
            .find_or_create(&identity("B200"), 15, expiry(60), "u1")
            .await
            .unwrap();
        let id = change.lot.id.unwrap();

        let err = ledger.decrement(&id, 20).await.unwrap_err();
        assert!(matches!(err, AppError::InsufficientStock(_)));
        // Source untouched
        assert_eq!(ledger.get(&id).await.unwrap().quantity, 15);
    }

    #[tokio::test]
    async fn fefo_consumes_the_earliest_expiry_first() {
        let (_tmp, ledger) = ledger().await;
        ledger
            .find_or_create(&identity("LATE"), 50, expiry(180), "u1")
            .await
            .unwrap();
        ledger
            .find_or_create(&identity("SOON"), 50, expiry(14), "u1")
            .await
            .unwrap();

        let change = ledger.consume_fefo("PENTA", "Fann", None, 3).await.unwrap();
        assert_eq!(change.lot.batch_number, "SOON");
        assert_eq!(change.lot.quantity, 47);
    }

    #[tokio::test]
    async fn fefo_skips_lots_that_cannot_cover_the_amount() {
        let (_tmp, ledger) = ledger().await;
        ledger
            .find_or_create(&identity("TINY"), 2, expiry(5), "u1")
            .await
            .unwrap();
        ledger
            .find_or_create(&identity("BIG"), 40, expiry(90), "u1")
            .await
            .unwrap();

        // TINY expires first but holds too little; BIG must be picked
        let change = ledger.consume_fefo("PENTA", "Fann", None, 10).await.unwrap();
        assert_eq!(change.lot.batch_number, "BIG");

        let err = ledger
            .consume_fefo("PENTA", "Fann", None, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientStock(_)));
    }

    #[tokio::test]
    async fn concurrent_decrements_never_lose_an_update() {
        let (_tmp, ledger) = ledger().await;
        let (change, _) = ledger
            .find_or_create(&identity("RACE"), 40, expiry(60), "u1")
            .await
            .unwrap();
        let id = change.lot.id.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let ledger = ledger.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move { ledger.decrement(&id, 5).await }));
        }
        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }

        let final_lot = ledger.get(&id).await.unwrap();
        assert_eq!(final_lot.quantity, 40 - 5 * succeeded);
        assert!(final_lot.quantity >= 0);
    }
}
