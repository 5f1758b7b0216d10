//! Transfer Repository
//!
//! Each workflow transition is one storage transaction: the status flip,
//! the quantity movement and (for accept) the destination creation either
//! all happen or none do. Business violations abort via `THROW` markers
//! mapped back to typed errors in [`super::RepoError`].

use surrealdb::RecordId;
use uuid::Uuid;

use super::stock::{CREDIT_BY_ID_SQL, DEBIT_BY_ID_SQL, MERGE_BY_IDENTITY_SQL};
use super::{BaseRepository, RepoError, RepoResult, check_transaction, markers};
use crate::db::models::{LotIdentity, StockLot, TransferRecord, TransferStatus};
use crate::utils::time::now_millis;

use shared::Role;

pub const TRANSFER_TABLE: &str = "transfer";

#[derive(Clone)]
pub struct TransferRepository {
    base: BaseRepository,
}

impl TransferRepository {
    pub fn new(db: surrealdb::Surreal<surrealdb::engine::local::Db>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    pub async fn find_by_id(&self, id: &RecordId) -> RepoResult<Option<TransferRecord>> {
        let record: Option<TransferRecord> = self.base.db().select(id.clone()).await?;
        Ok(record)
    }

    /// Debit the source lot and write the `pending` record atomically
    ///
    /// 扣减即预留: 事务提交后这些剂量对源批次不可再花费。
    pub async fn initiate(&self, record: TransferRecord) -> RepoResult<TransferRecord> {
        debug_assert!(record.status == TransferStatus::Pending);

        let sql = format!(
            "BEGIN TRANSACTION; \
             LET $debited = ({DEBIT_BY_ID_SQL}); \
             IF array::len($debited) == 0 {{ THROW \"{insufficient}\" }}; \
             CREATE type::thing('transfer', $key) CONTENT $record; \
             COMMIT TRANSACTION;",
            insufficient = markers::INSUFFICIENT_QUANTITY,
        );

        let key = Uuid::new_v4().simple().to_string();
        let source = record.source_lot.clone();
        let quantity = record.quantity;

        let mut response = self
            .base
            .db()
            .query(sql)
            .bind(("lot", source))
            .bind(("amount", quantity))
            .bind(("now", now_millis()))
            .bind(("key", key.clone()))
            .bind(("record", record))
            .await?;
        check_transaction(&mut response)?;

        let id = RecordId::from_table_key(TRANSFER_TABLE, key);
        self.find_by_id(&id)
            .await?
            .ok_or_else(|| RepoError::Database("transfer record vanished after create".into()))
    }

    /// Flip `pending → accepted` and credit the destination identity
    /// (creating the destination lot when absent), atomically.
    ///
    /// Returns the resolved record. `AlreadyResolved` when the guard on
    /// `status = 'pending'` does not match - the losing side of an
    /// accept/reject race lands here.
    pub async fn accept(
        &self,
        transfer_id: &RecordId,
        destination: &LotIdentity,
        stock_content: StockLot,
    ) -> RepoResult<TransferRecord> {
        let sql = format!(
            "BEGIN TRANSACTION; \
             LET $resolved = (UPDATE $transfer SET status = 'accepted', accepted_date = $now \
                 WHERE status = 'pending' RETURN AFTER); \
             IF array::len($resolved) == 0 {{ THROW \"{already}\" }}; \
             LET $credited = ({MERGE_BY_IDENTITY_SQL}); \
             IF array::len($credited) == 0 {{ \
                 CREATE type::thing('stock', $stock_key) CONTENT $stock_content \
             }}; \
             COMMIT TRANSACTION;",
            already = markers::ALREADY_RESOLVED,
        );

        let quantity = stock_content.quantity;
        // 目标批次创建与并发接受撞车时整个事务回滚, 重试一次走合并分支
        for attempt in 0..2 {
            let stock_key = Uuid::new_v4().simple().to_string();
            let mut response = self
                .base
                .db()
                .query(sql.clone())
                .bind(("transfer", transfer_id.clone()))
                .bind(("now", now_millis()))
                .bind(("vaccine", destination.vaccine.clone()))
                .bind(("batch_number", destination.batch_number.clone()))
                .bind(("level", destination.level))
                .bind(("region", destination.region.clone()))
                .bind(("health_center", destination.health_center.clone()))
                .bind(("assigned_to", destination.assigned_to.clone()))
                .bind(("qty", quantity))
                .bind(("stock_key", stock_key))
                .bind(("stock_content", stock_content.clone()))
                .await?;

            match check_transaction(&mut response) {
                Ok(()) => break,
                Err(RepoError::Duplicate(_)) if attempt == 0 => continue,
                Err(e) => return Err(e),
            }
        }

        self.find_by_id(transfer_id)
            .await?
            .ok_or_else(|| RepoError::NotFound("transfer record".into()))
    }

    /// Flip `pending → rejected` and restore the full reservation to the
    /// source lot, atomically.
    pub async fn reject(
        &self,
        transfer_id: &RecordId,
        source_lot: &RecordId,
        quantity: i64,
        reason: Option<String>,
    ) -> RepoResult<TransferRecord> {
        let sql = format!(
            "BEGIN TRANSACTION; \
             LET $resolved = (UPDATE $transfer SET status = 'rejected', rejected_date = $now, \
                 notes = $notes WHERE status = 'pending' RETURN AFTER); \
             IF array::len($resolved) == 0 {{ THROW \"{already}\" }}; \
             LET $restored = ({CREDIT_BY_ID_SQL}); \
             IF array::len($restored) == 0 {{ THROW \"{missing}\" }}; \
             COMMIT TRANSACTION;",
            already = markers::ALREADY_RESOLVED,
            missing = markers::SOURCE_LOT_MISSING,
        );
        self.resolve_with_restore(sql, transfer_id, source_lot, quantity, reason)
            .await
    }

    /// Flip `pending → cancelled` (originator backed out) and restore the
    /// reservation, atomically.
    pub async fn cancel(
        &self,
        transfer_id: &RecordId,
        source_lot: &RecordId,
        quantity: i64,
        reason: Option<String>,
    ) -> RepoResult<TransferRecord> {
        let sql = format!(
            "BEGIN TRANSACTION; \
             LET $resolved = (UPDATE $transfer SET status = 'cancelled', \
                 notes = $notes WHERE status = 'pending' RETURN AFTER); \
             IF array::len($resolved) == 0 {{ THROW \"{already}\" }}; \
             LET $restored = ({CREDIT_BY_ID_SQL}); \
             IF array::len($restored) == 0 {{ THROW \"{missing}\" }}; \
             COMMIT TRANSACTION;",
            already = markers::ALREADY_RESOLVED,
            missing = markers::SOURCE_LOT_MISSING,
        );
        self.resolve_with_restore(sql, transfer_id, source_lot, quantity, reason)
            .await
    }

    async fn resolve_with_restore(
        &self,
        sql: String,
        transfer_id: &RecordId,
        source_lot: &RecordId,
        quantity: i64,
        reason: Option<String>,
    ) -> RepoResult<TransferRecord> {
        let mut response = self
            .base
            .db()
            .query(sql)
            .bind(("transfer", transfer_id.clone()))
            .bind(("now", now_millis()))
            .bind(("notes", reason))
            .bind(("lot", source_lot.clone()))
            .bind(("amount", quantity))
            .await?;
        check_transaction(&mut response)?;

        self.find_by_id(transfer_id)
            .await?
            .ok_or_else(|| RepoError::NotFound("transfer record".into()))
    }

    /// Pending transfers addressed to this actor - directly by user id, or
    /// by role + location fallback.
    pub async fn incoming(
        &self,
        user_id: &str,
        role: Role,
        region: Option<&str>,
        health_center: Option<&str>,
    ) -> RepoResult<Vec<TransferRecord>> {
        let location_clause = match role {
            Role::Regional => "AND to_region = $region",
            Role::District | Role::Agent => "AND to_health_center = $health_center",
            // transfers never flow upward; national only receives direct
            Role::National => "AND to_user != NONE",
        };
        let sql = format!(
            "SELECT * FROM transfer WHERE status = 'pending' \
               AND (to_user = $user \
                    OR (to_user = NONE AND to_level = $role {location_clause})) \
             ORDER BY transfer_date DESC",
        );

        let mut res = self
            .base
            .db()
            .query(sql)
            .bind(("user", user_id.to_string()))
            .bind(("role", role))
            .bind(("region", region.map(str::to_string)))
            .bind(("health_center", health_center.map(str::to_string)))
            .await?;
        Ok(res.take(0)?)
    }

    /// Transfers initiated by this actor, any status
    pub async fn outgoing(&self, user_id: &str) -> RepoResult<Vec<TransferRecord>> {
        let mut res = self
            .base
            .db()
            .query("SELECT * FROM transfer WHERE from_user = $user ORDER BY transfer_date DESC")
            .bind(("user", user_id.to_string()))
            .await?;
        Ok(res.take(0)?)
    }

    /// Everything this actor was party to, newest first
    pub async fn history(
        &self,
        user_id: &str,
        role: Role,
        region: Option<&str>,
        health_center: Option<&str>,
    ) -> RepoResult<Vec<TransferRecord>> {
        let location_clause = match role {
            Role::Regional => "AND to_region = $region",
            Role::District | Role::Agent => "AND to_health_center = $health_center",
            Role::National => "AND to_user != NONE",
        };
        let sql = format!(
            "SELECT * FROM transfer WHERE from_user = $user OR to_user = $user \
               OR (to_user = NONE AND to_level = $role {location_clause}) \
             ORDER BY transfer_date DESC",
        );

        let mut res = self
            .base
            .db()
            .query(sql)
            .bind(("user", user_id.to_string()))
            .bind(("role", role))
            .bind(("region", region.map(str::to_string)))
            .bind(("health_center", health_center.map(str::to_string)))
            .await?;
        Ok(res.take(0)?)
    }
}
