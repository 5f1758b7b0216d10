//! Stock Lot Repository
//!
//! All quantity writes go through the conditional-update statements in
//! this module (or through transfer transactions that embed the same
//! statements); nothing else in the crate touches `quantity`.

use chrono::NaiveDate;
use surrealdb::RecordId;
use uuid::Uuid;

use super::{BaseRepository, RepoError, RepoResult};
use crate::db::models::{LotIdentity, StockLot};
use crate::inventory::visibility::Scope;
use crate::utils::time::now_millis;

pub const STOCK_TABLE: &str = "stock";

/// 合并路径: 同一身份已存在则原子加量并复活该行
///
/// Shared with the transfer-accept transaction, which credits the
/// destination identity with the same statement.
pub(crate) const MERGE_BY_IDENTITY_SQL: &str = "UPDATE stock \
    SET quantity += $qty, is_active = true, updated_at = $now \
    WHERE vaccine = $vaccine AND batch_number = $batch_number AND level = $level \
      AND region = $region AND health_center = $health_center AND assigned_to = $assigned_to \
    RETURN AFTER";

/// 条件扣减: 余额不足时不匹配任何行, 并发扣减由此串行化
pub(crate) const DEBIT_BY_ID_SQL: &str = "UPDATE $lot \
    SET quantity -= $amount, updated_at = $now \
    WHERE quantity >= $amount AND is_active = true \
    RETURN AFTER";

/// 无条件加量 (退回/贷记); 顺带复活已逻辑删除的行
pub(crate) const CREDIT_BY_ID_SQL: &str = "UPDATE $lot \
    SET quantity += $amount, is_active = true, updated_at = $now \
    RETURN AFTER";

// =============================================================================
// Stock Repository
// =============================================================================

#[derive(Clone)]
pub struct StockRepository {
    base: BaseRepository,
}

impl StockRepository {
    pub fn new(db: surrealdb::Surreal<surrealdb::engine::local::Db>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    /// Find lot by id (active or not)
    pub async fn find_by_id(&self, id: &RecordId) -> RepoResult<Option<StockLot>> {
        let lot: Option<StockLot> = self.base.db().select(id.clone()).await?;
        Ok(lot)
    }

    /// Merge-on-create: add `quantity` to the lot with this identity, or
    /// create it if absent. Returns `(lot, merged)`.
    ///
    /// 两步各自原子: 先尝试合并更新; 没有命中再 CREATE。并发创建撞车时
    /// 唯一索引让后到者失败, 它重试一次合并路径即可。
    pub async fn upsert_merge(
        &self,
        identity: &LotIdentity,
        quantity: i64,
        expiration_date: NaiveDate,
        created_by: &str,
    ) -> RepoResult<(StockLot, bool)> {
        for attempt in 0..2 {
            if let Some(lot) = self.merge_into_existing(identity, quantity).await? {
                return Ok((lot, true));
            }

            let now = now_millis();
            let content = StockLot {
                id: None,
                vaccine: identity.vaccine.clone(),
                batch_number: identity.batch_number.clone(),
                quantity,
                expiration_date,
                level: Some(identity.level),
                region: identity.region.clone(),
                health_center: identity.health_center.clone(),
                assigned_to: identity.assigned_to.clone(),
                created_by: created_by.to_string(),
                is_active: true,
                created_at: now,
                updated_at: now,
            };

            match self.create_lot(content).await {
                Ok(lot) => return Ok((lot, false)),
                // Lost the creation race - merge into the winner's row
                Err(RepoError::Duplicate(_)) if attempt == 0 => continue,
                Err(e) => return Err(e),
            }
        }

        Err(RepoError::Database(
            "lot merge/create retry exhausted".into(),
        ))
    }

    async fn merge_into_existing(
        &self,
        identity: &LotIdentity,
        quantity: i64,
    ) -> RepoResult<Option<StockLot>> {
        let mut res = self
            .base
            .db()
            .query(MERGE_BY_IDENTITY_SQL)
            .bind(("vaccine", identity.vaccine.clone()))
            .bind(("batch_number", identity.batch_number.clone()))
            .bind(("level", identity.level))
            .bind(("region", identity.region.clone()))
            .bind(("health_center", identity.health_center.clone()))
            .bind(("assigned_to", identity.assigned_to.clone()))
            .bind(("qty", quantity))
            .bind(("now", now_millis()))
            .await?;
        let merged: Vec<StockLot> = res.take(0)?;
        Ok(merged.into_iter().next())
    }

    async fn create_lot(&self, content: StockLot) -> RepoResult<StockLot> {
        let key = Uuid::new_v4().simple().to_string();
        let mut res = self
            .base
            .db()
            .query("CREATE type::thing('stock', $key) CONTENT $content")
            .bind(("key", key))
            .bind(("content", content))
            .await?;
        res.take::<Vec<StockLot>>(0)?
            .into_iter()
            .next()
            .ok_or_else(|| RepoError::Database("CREATE stock returned no record".into()))
    }

    /// Find the single lot carrying this identity tuple, if any
    pub async fn find_by_identity(&self, identity: &LotIdentity) -> RepoResult<Option<StockLot>> {
        let mut res = self
            .base
            .db()
            .query(
                "SELECT * FROM stock \
                 WHERE vaccine = $vaccine AND batch_number = $batch_number AND level = $level \
                   AND region = $region AND health_center = $health_center \
                   AND assigned_to = $assigned_to \
                 LIMIT 1",
            )
            .bind(("vaccine", identity.vaccine.clone()))
            .bind(("batch_number", identity.batch_number.clone()))
            .bind(("level", identity.level))
            .bind(("region", identity.region.clone()))
            .bind(("health_center", identity.health_center.clone()))
            .bind(("assigned_to", identity.assigned_to.clone()))
            .await?;
        Ok(res.take::<Vec<StockLot>>(0)?.into_iter().next())
    }

    /// Conditionally subtract `amount`; `None` means the guard did not
    /// match (insufficient balance, inactive or missing lot).
    pub async fn decrement(&self, id: &RecordId, amount: i64) -> RepoResult<Option<StockLot>> {
        let mut res = self
            .base
            .db()
            .query(DEBIT_BY_ID_SQL)
            .bind(("lot", id.clone()))
            .bind(("amount", amount))
            .bind(("now", now_millis()))
            .await?;
        Ok(res.take::<Vec<StockLot>>(0)?.into_iter().next())
    }

    /// Unconditionally add `amount` (merge credits, reject restores)
    pub async fn credit(&self, id: &RecordId, amount: i64) -> RepoResult<Option<StockLot>> {
        let mut res = self
            .base
            .db()
            .query(CREDIT_BY_ID_SQL)
            .bind(("lot", id.clone()))
            .bind(("amount", amount))
            .bind(("now", now_millis()))
            .await?;
        Ok(res.take::<Vec<StockLot>>(0)?.into_iter().next())
    }

    /// Field update for `PUT /api/stocks/:id`
    pub async fn update_fields(
        &self,
        id: &RecordId,
        quantity: Option<i64>,
        expiration_date: Option<NaiveDate>,
        assigned_to: Option<Option<String>>,
    ) -> RepoResult<Option<StockLot>> {
        let mut sets = vec!["updated_at = $now"];
        if quantity.is_some() {
            sets.push("quantity = $quantity");
        }
        if expiration_date.is_some() {
            sets.push("expiration_date = $expiration_date");
        }
        if assigned_to.is_some() {
            sets.push("assigned_to = $assigned_to");
        }
        let sql = format!(
            "UPDATE $lot SET {} WHERE is_active = true RETURN AFTER",
            sets.join(", ")
        );

        let mut query = self
            .base
            .db()
            .query(sql)
            .bind(("lot", id.clone()))
            .bind(("now", now_millis()));
        if let Some(q) = quantity {
            query = query.bind(("quantity", q));
        }
        if let Some(d) = expiration_date {
            query = query.bind(("expiration_date", d));
        }
        if let Some(a) = assigned_to {
            query = query.bind(("assigned_to", a));
        }

        let mut res = query.await?;
        Ok(res.take::<Vec<StockLot>>(0)?.into_iter().next())
    }

    /// Logical removal: deactivate and zero out. The row itself stays so
    /// transfer history keeps resolving; a later receipt of the same
    /// batch resurrects it.
    pub async fn soft_delete(&self, id: &RecordId) -> RepoResult<bool> {
        let mut res = self
            .base
            .db()
            .query(
                "UPDATE $lot SET is_active = false, quantity = 0, updated_at = $now \
                 WHERE is_active = true RETURN AFTER",
            )
            .bind(("lot", id.clone()))
            .bind(("now", now_millis()))
            .await?;
        Ok(!res.take::<Vec<StockLot>>(0)?.is_empty())
    }

    /// FEFO candidates able to cover `amount` at one health center
    pub async fn fefo_candidates(
        &self,
        vaccine: &str,
        health_center: &str,
        assigned_to: Option<&str>,
        amount: i64,
    ) -> RepoResult<Vec<StockLot>> {
        let mut sql = String::from(
            "SELECT * FROM stock \
             WHERE vaccine = $vaccine AND health_center = $health_center \
               AND is_active = true AND quantity >= $amount",
        );
        if assigned_to.is_some() {
            sql.push_str(" AND assigned_to = $assigned_to");
        }
        sql.push_str(" ORDER BY expiration_date ASC");

        let mut query = self
            .base
            .db()
            .query(sql)
            .bind(("vaccine", vaccine.to_string()))
            .bind(("health_center", health_center.to_string()))
            .bind(("amount", amount));
        if let Some(user) = assigned_to {
            query = query.bind(("assigned_to", user.to_string()));
        }

        let mut res = query.await?;
        Ok(res.take(0)?)
    }

    /// Role-scoped listing (see [`crate::inventory::visibility`])
    pub async fn visible(&self, scope: &Scope) -> RepoResult<Vec<StockLot>> {
        let mut res = match scope {
            Scope::National => {
                self.base
                    .db()
                    .query(
                        "SELECT * FROM stock WHERE is_active = true \
                           AND (level = 'national' \
                                OR ((level = NONE OR level = NULL) \
                                    AND (region = NONE OR region = NULL))) \
                         ORDER BY vaccine ASC, expiration_date ASC",
                    )
                    .await?
            }
            Scope::Region(region) => {
                self.base
                    .db()
                    .query(
                        "SELECT * FROM stock WHERE is_active = true \
                           AND level = 'regional' AND region = $region \
                         ORDER BY vaccine ASC, expiration_date ASC",
                    )
                    .bind(("region", region.clone()))
                    .await?
            }
            Scope::HealthCenter {
                health_center,
                assigned_to,
            } => {
                let mut sql = String::from(
                    "SELECT * FROM stock WHERE is_active = true \
                       AND health_center = $health_center",
                );
                if assigned_to.is_some() {
                    sql.push_str(" AND assigned_to = $assigned_to");
                }
                sql.push_str(" ORDER BY vaccine ASC, expiration_date ASC");

                let mut query = self
                    .base
                    .db()
                    .query(sql)
                    .bind(("health_center", health_center.clone()));
                if let Some(user) = assigned_to {
                    query = query.bind(("assigned_to", user.clone()));
                }
                query.await?
            }
        };
        Ok(res.take(0)?)
    }

    /// Every active lot - the daily scan's working set
    pub async fn all_active(&self) -> RepoResult<Vec<StockLot>> {
        let mut res = self
            .base
            .db()
            .query("SELECT * FROM stock WHERE is_active = true ORDER BY expiration_date ASC")
            .await?;
        Ok(res.take(0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbService;
    use shared::StockLevel;

    async fn repo() -> (tempfile::TempDir, StockRepository) {
        let tmp = tempfile::tempdir().unwrap();
        let service = DbService::new(tmp.path().to_str().unwrap()).await.unwrap();
        (tmp, StockRepository::new(service.db))
    }

    fn identity(vaccine: &str, batch: &str) -> LotIdentity {
        LotIdentity {
            vaccine: vaccine.into(),
            batch_number: batch.into(),
            level: StockLevel::District,
            region: Some("Dakar".into()),
            health_center: Some("Fann".into()),
            assigned_to: None,
        }
    }

    fn expiry(days: i64) -> NaiveDate {
        chrono::Utc::now().date_naive() + chrono::Duration::days(days)
    }

    #[tokio::test]
    async fn same_identity_merges_instead_of_duplicating() {
        let (_tmp, repo) = repo().await;
        let id = identity("PENTA", "B100");

        let (first, merged) = repo.upsert_merge(&id, 40, expiry(60), "u1").await.unwrap();
        assert!(!merged);
        assert_eq!(first.quantity, 40);

        let (second, merged) = repo.upsert_merge(&id, 25, expiry(60), "u1").await.unwrap();
        assert!(merged);
        assert_eq!(second.quantity, 65);
        assert_eq!(first.id, second.id);

        let all = repo.all_active().await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn decrement_refuses_to_go_negative() {
        let (_tmp, repo) = repo().await;
        let (lot, _) = repo
            .upsert_merge(&identity("BCG", "K7"), 5, expiry(90), "u1")
            .await
            .unwrap();
        let lot_id = lot.id.unwrap();

        assert!(repo.decrement(&lot_id, 6).await.unwrap().is_none());
        let after = repo.decrement(&lot_id, 5).await.unwrap().unwrap();
        assert_eq!(after.quantity, 0);
        // 余额归零后继续扣减同样被拒绝
        assert!(repo.decrement(&lot_id, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fefo_orders_candidates_by_expiration() {
        let (_tmp, repo) = repo().await;
        repo.upsert_merge(&identity("PENTA", "LATE"), 30, expiry(120), "u1")
            .await
            .unwrap();
        repo.upsert_merge(&identity("PENTA", "SOON"), 30, expiry(10), "u1")
            .await
            .unwrap();
        repo.upsert_merge(&identity("PENTA", "MID"), 30, expiry(45), "u1")
            .await
            .unwrap();

        let candidates = repo
            .fefo_candidates("PENTA", "Fann", None, 1)
            .await
            .unwrap();
        let batches: Vec<&str> = candidates
            .iter()
            .map(|lot| lot.batch_number.as_str())
            .collect();
        assert_eq!(batches, vec!["SOON", "MID", "LATE"]);
    }

    #[tokio::test]
    async fn soft_delete_hides_and_resurrects() {
        let (_tmp, repo) = repo().await;
        let id = identity("VPO", "R2");
        let (lot, _) = repo.upsert_merge(&id, 12, expiry(30), "u1").await.unwrap();
        let lot_id = lot.id.unwrap();

        assert!(repo.soft_delete(&lot_id).await.unwrap());
        assert!(repo.all_active().await.unwrap().is_empty());
        // second delete is a no-op
        assert!(!repo.soft_delete(&lot_id).await.unwrap());

        // 同批次再次入库: 同一行复活, 数量从零重新累计
        let (revived, merged) = repo.upsert_merge(&id, 8, expiry(30), "u1").await.unwrap();
        assert!(merged);
        assert_eq!(revived.id, Some(lot_id));
        assert_eq!(revived.quantity, 8);
    }
}
