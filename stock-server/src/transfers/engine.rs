//! Transfer Engine
//!
//! 单一状态机: `pending → accepted | rejected | cancelled`, 每条记录
//! 恰好到达一个终态。直接调拨不再是独立代码路径, 而是 initiate 带
//! `auto_accept` 标志后立即走同一个 accept 路径。
//!
//! 每个状态转换是一个存储事务 (见 [`TransferRepository`]); 引擎负责
//! 校验、目的地解析、收件人鉴权, 以及转换完成后的阈值复查与通知。

use std::sync::Arc;

use surrealdb::RecordId;

use shared::StockLevel;

use crate::alerting::AlertService;
use crate::auth::CurrentUser;
use crate::db::models::{StockLot, TransferInitiate, TransferRecord, TransferStatus};
use crate::db::repository::stock::STOCK_TABLE;
use crate::db::repository::transfer::TRANSFER_TABLE;
use crate::db::repository::{TransferRepository, parse_record_id};
use crate::db::with_retry;
use crate::inventory::{InventoryLedger, LotChange, can_access};
use crate::transfers::destination::{self, destination_identity};
use crate::utils::time::now_millis;
use crate::utils::{AppError, AppResult};

#[derive(Clone)]
pub struct TransferEngine {
    transfers: TransferRepository,
    ledger: Arc<InventoryLedger>,
    alerts: Arc<AlertService>,
}

impl TransferEngine {
    pub fn new(
        transfers: TransferRepository,
        ledger: Arc<InventoryLedger>,
        alerts: Arc<AlertService>,
    ) -> Self {
        Self {
            transfers,
            ledger,
            alerts,
        }
    }

    /// Initiate a transfer: validate, resolve the destination from the
    /// actor's role, debit the source (the reservation) and write the
    /// `pending` record in one unit of work, then notify the recipient.
    pub async fn initiate(
        &self,
        actor: &CurrentUser,
        request: &TransferInitiate,
    ) -> AppResult<TransferRecord> {
        if request.quantity <= 0 {
            return Err(AppError::validation("Transfer quantity must be positive"));
        }

        let source_id = parse_record_id(STOCK_TABLE, &request.stock_id)?;
        let source = self.ledger.get(&source_id).await?;
        if !can_access(actor, &source) {
            return Err(AppError::forbidden(
                "Source lot is outside your visibility scope",
            ));
        }
        // 友好预检; 真正的判定在事务内的条件扣减上
        if request.quantity > source.quantity {
            return Err(AppError::insufficient(format!(
                "Lot {} holds {} doses, cannot transfer {}",
                source.batch_number, source.quantity, request.quantity
            )));
        }

        let dest = destination::resolve(actor, request)?;
        let record = TransferRecord {
            id: None,
            vaccine: source.vaccine.clone(),
            batch_number: source.batch_number.clone(),
            quantity: request.quantity,
            expiration_date: source.expiration_date,
            from_level: source.level.unwrap_or_else(|| StockLevel::from(actor.role)),
            to_level: dest.level,
            from_region: source.region.clone(),
            from_health_center: source.health_center.clone(),
            to_region: dest.region.clone(),
            to_health_center: dest.health_center.clone(),
            from_user: actor.id.clone(),
            to_user: dest.user.clone(),
            source_lot: source_id.clone(),
            status: TransferStatus::Pending,
            transfer_date: now_millis(),
            accepted_date: None,
            rejected_date: None,
            notes: request.notes.clone(),
        };

        let record = with_retry("transfer.initiate", || {
            self.transfers.initiate(record.clone())
        })
        .await?;

        // 预留扣减之后复查源批次阈值
        if let Ok(after) = self.ledger.get(&source_id).await {
            self.alerts
                .lot_quantity_changed(&LotChange {
                    previous_quantity: source.quantity,
                    lot: after,
                })
                .await;
        }
        if request.auto_accept {
            // Trusted direct move: same state machine, resolved by the
            // originator in the same request. The recipient is told the
            // stock arrived rather than asked to respond.
            let resolved = self.resolve_acceptance(&record, &actor.id).await?;
            self.alerts.transfer_delivered(&resolved).await;
            Ok(resolved)
        } else {
            self.alerts.transfer_initiated(&record).await;
            Ok(record)
        }
    }

    /// Accept a pending transfer as its recipient
    pub async fn accept(&self, actor: &CurrentUser, transfer_id: &str) -> AppResult<TransferRecord> {
        let id = parse_record_id(TRANSFER_TABLE, transfer_id)?;
        let record = self.get_record(&id).await?;
        ensure_pending(&record)?;
        authorize_recipient(actor, &record)?;
        self.resolve_acceptance(&record, &actor.id).await
    }

    /// Reject a pending transfer; the full reservation flows back to the
    /// source lot exactly once.
    pub async fn reject(
        &self,
        actor: &CurrentUser,
        transfer_id: &str,
        reason: Option<String>,
    ) -> AppResult<TransferRecord> {
        let id = parse_record_id(TRANSFER_TABLE, transfer_id)?;
        let record = self.get_record(&id).await?;
        ensure_pending(&record)?;
        authorize_recipient(actor, &record)?;

        let resolved = with_retry("transfer.reject", || {
            self.transfers
                .reject(&id, &record.source_lot, record.quantity, reason.clone())
        })
        .await?;

        self.recheck_source_after_restore(&record).await;
        self.alerts.transfer_resolved(&resolved).await;
        Ok(resolved)
    }

    /// Originator backs out of a still-pending transfer
    pub async fn cancel(
        &self,
        actor: &CurrentUser,
        transfer_id: &str,
        reason: Option<String>,
    ) -> AppResult<TransferRecord> {
        let id = parse_record_id(TRANSFER_TABLE, transfer_id)?;
        let record = self.get_record(&id).await?;
        ensure_pending(&record)?;
        if record.from_user != actor.id {
            return Err(AppError::forbidden("Only the originator can cancel"));
        }

        let resolved = with_retry("transfer.cancel", || {
            self.transfers
                .cancel(&id, &record.source_lot, record.quantity, reason.clone())
        })
        .await?;

        self.recheck_source_after_restore(&record).await;
        self.alerts.transfer_resolved(&resolved).await;
        Ok(resolved)
    }

    /// Pending transfers awaiting this actor
    pub async fn incoming(&self, actor: &CurrentUser) -> AppResult<Vec<TransferRecord>> {
        Ok(with_retry("transfer.incoming", || {
            self.transfers.incoming(
                &actor.id,
                actor.role,
                actor.region.as_deref(),
                actor.health_center.as_deref(),
            )
        })
        .await?)
    }

    /// Transfers this actor initiated
    pub async fn outgoing(&self, actor: &CurrentUser) -> AppResult<Vec<TransferRecord>> {
        Ok(with_retry("transfer.outgoing", || self.transfers.outgoing(&actor.id)).await?)
    }

    /// Everything this actor was party to
    pub async fn history(&self, actor: &CurrentUser) -> AppResult<Vec<TransferRecord>> {
        Ok(with_retry("transfer.history", || {
            self.transfers.history(
                &actor.id,
                actor.role,
                actor.region.as_deref(),
                actor.health_center.as_deref(),
            )
        })
        .await?)
    }

    // ========== internals ==========

    async fn get_record(&self, id: &RecordId) -> AppResult<TransferRecord> {
        let record = with_retry("transfer.find_by_id", || self.transfers.find_by_id(id)).await?;
        record.ok_or_else(|| AppError::not_found(format!("Transfer {} not found", id)))
    }

    /// Shared by `accept` and the auto-accept path: credit the
    /// destination identity and flip the record, then notify.
    async fn resolve_acceptance(
        &self,
        record: &TransferRecord,
        acceptor_id: &str,
    ) -> AppResult<TransferRecord> {
        let id = record
            .id
            .clone()
            .ok_or_else(|| AppError::internal("Transfer record without id"))?;
        let dest = destination_identity(record);
        // 记下贷记前的目标余额, 事后才能判断阈值穿越
        let dest_before = self
            .ledger
            .find_by_identity(&dest)
            .await
            .ok()
            .flatten()
            .map(|lot| lot.quantity);

        let now = now_millis();
        let stock_content = StockLot {
            id: None,
            vaccine: dest.vaccine.clone(),
            batch_number: dest.batch_number.clone(),
            quantity: record.quantity,
            expiration_date: record.expiration_date,
            level: Some(dest.level),
            region: dest.region.clone(),
            health_center: dest.health_center.clone(),
            assigned_to: dest.assigned_to.clone(),
            created_by: acceptor_id.to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let resolved = with_retry("transfer.accept", || {
            self.transfers.accept(&id, &dest, stock_content.clone())
        })
        .await?;

        // 目标批次刚刚入账, 复查其阈值。本次接受新建的批次没有先前
        // 状态, 以入账后的数量充当 previous 来跳过 restored 穿越。
        match self.ledger.find_by_identity(&dest).await {
            Ok(Some(dest_lot)) => {
                self.alerts
                    .lot_quantity_changed(&LotChange {
                        previous_quantity: dest_before.unwrap_or(dest_lot.quantity),
                        lot: dest_lot,
                    })
                    .await;
            }
            Ok(None) => {
                tracing::warn!(transfer = %id, "Destination lot missing after acceptance");
            }
            Err(e) => {
                tracing::warn!(transfer = %id, error = %e, "Destination re-check failed");
            }
        }

        self.alerts.transfer_resolved(&resolved).await;
        Ok(resolved)
    }

    async fn recheck_source_after_restore(&self, record: &TransferRecord) {
        match self.ledger.get(&record.source_lot).await {
            Ok(after) => {
                self.alerts
                    .lot_quantity_changed(&LotChange {
                        previous_quantity: after.quantity - record.quantity,
                        lot: after,
                    })
                    .await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Source re-check failed after restore");
            }
        }
    }
}

/// `pending` gate shared by every transition (the storage transaction
/// re-checks it atomically; this is the friendly early error)
fn ensure_pending(record: &TransferRecord) -> AppResult<()> {
    if record.status.is_terminal() {
        return Err(AppError::AlreadyResolved(format!(
            "Transfer is already {}",
            record.status
        )));
    }
    Ok(())
}

/// The intended recipient: exact `to_user` when named, else any actor
/// whose role and location match the destination.
fn authorize_recipient(actor: &CurrentUser, record: &TransferRecord) -> AppResult<()> {
    if let Some(to_user) = &record.to_user {
        if actor.id == *to_user {
            return Ok(());
        }
        return Err(AppError::forbidden("Not the intended recipient"));
    }

    let actor_level = StockLevel::from(actor.role);
    let located = actor_level == record.to_level
        && match record.to_level {
            StockLevel::Regional => {
                actor.region.is_some() && actor.region == record.to_region
            }
            StockLevel::District | StockLevel::Agent => {
                actor.health_center.is_some()
                    && actor.health_center == record.to_health_center
            }
            StockLevel::National => false,
        };
    if located {
        Ok(())
    } else {
        Err(AppError::forbidden("Not the intended recipient"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use shared::Role;

    fn actor(id: &str, role: Role, region: Option<&str>, hc: Option<&str>) -> CurrentUser {
        CurrentUser {
            id: id.into(),
            username: id.into(),
            role,
            region: region.map(str::to_string),
            health_center: hc.map(str::to_string),
            assigned_only: false,
        }
    }

    fn record(to_user: Option<&str>, to_level: StockLevel, to_region: Option<&str>, to_hc: Option<&str>) -> TransferRecord {
        TransferRecord {
            id: Some(RecordId::from_table_key("transfer", "t1")),
            vaccine: "PENTA".into(),
            batch_number: "B100".into(),
            quantity: 10,
            expiration_date: NaiveDate::from_ymd_opt(2027, 1, 1).unwrap(),
            from_level: StockLevel::National,
            to_level,
            from_region: None,
            from_health_center: None,
            to_region: to_region.map(str::to_string),
            to_health_center: to_hc.map(str::to_string),
            from_user: "sender".into(),
            to_user: to_user.map(str::to_string),
            source_lot: RecordId::from_table_key("stock", "s1"),
            status: TransferStatus::Pending,
            transfer_date: 0,
            accepted_date: None,
            rejected_date: None,
            notes: None,
        }
    }

    #[test]
    fn named_recipient_must_match_exactly() {
        let rec = record(Some("u9"), StockLevel::Regional, Some("Thiès"), None);
        assert!(authorize_recipient(&actor("u9", Role::Regional, Some("Thiès"), None), &rec).is_ok());
        // 地点匹配也救不了错误的用户
        assert!(
            authorize_recipient(&actor("u8", Role::Regional, Some("Thiès"), None), &rec).is_err()
        );
    }

    #[test]
    fn unnamed_recipient_falls_back_to_role_and_location() {
        let rec = record(None, StockLevel::Regional, Some("Thiès"), None);
        assert!(
            authorize_recipient(&actor("u1", Role::Regional, Some("Thiès"), None), &rec).is_ok()
        );
        assert!(
            authorize_recipient(&actor("u1", Role::Regional, Some("Dakar"), None), &rec).is_err()
        );
        assert!(
            authorize_recipient(&actor("u1", Role::District, Some("Thiès"), None), &rec).is_err()
        );

        let rec = record(None, StockLevel::District, None, Some("Fann"));
        assert!(
            authorize_recipient(&actor("u1", Role::District, None, Some("Fann")), &rec).is_ok()
        );
        assert!(
            authorize_recipient(&actor("u1", Role::District, None, Some("Pikine")), &rec)
                .is_err()
        );
    }

    #[test]
    fn record_ids_parse_in_both_forms() {
        assert_eq!(
            parse_record_id("stock", "stock:abc").unwrap(),
            RecordId::from_table_key("stock", "abc")
        );
        assert_eq!(
            parse_record_id("stock", "abc").unwrap(),
            RecordId::from_table_key("stock", "abc")
        );
        assert!(parse_record_id("stock", "transfer:abc").is_err());
    }

    #[test]
    fn terminal_records_refuse_transitions() {
        let mut rec = record(None, StockLevel::Regional, Some("Thiès"), None);
        rec.status = TransferStatus::Rejected;
        assert!(matches!(
            ensure_pending(&rec),
            Err(AppError::AlreadyResolved(_))
        ));
    }
}
