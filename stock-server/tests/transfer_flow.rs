//! End-to-end transfer workflow tests against a throwaway RocksDB store
//!
//! Covers conservation across debit/credit, the reservation semantics of
//! initiate, terminal-state exclusivity and the auto-accept direct path.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;

use shared::{Role, StockLevel};
use stock_server::alerting::{AlertDeduplicator, AlertService, Thresholds};
use stock_server::auth::CurrentUser;
use stock_server::db::DbService;
use stock_server::db::models::{LotIdentity, TransferInitiate, TransferStatus};
use stock_server::db::repository::{
    NotificationRepository, StockRepository, TransferRepository,
};
use stock_server::inventory::InventoryLedger;
use stock_server::realtime::{ConnectionRegistry, NotificationFanout};
use stock_server::transfers::TransferEngine;
use stock_server::utils::AppError;

struct Harness {
    _tmp: tempfile::TempDir,
    ledger: Arc<InventoryLedger>,
    engine: TransferEngine,
}

async fn harness() -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let db = DbService::new(tmp.path().to_str().unwrap())
        .await
        .unwrap()
        .db;

    let registry = Arc::new(ConnectionRegistry::new(Duration::from_secs(1800)));
    let fanout = NotificationFanout::new(registry);
    let notifications = NotificationRepository::new(db.clone());
    let dedup = AlertDeduplicator::new(notifications.clone(), 24);
    let thresholds = Thresholds {
        low_stock: 10,
        expiring_window_days: 30,
    };
    let alerts = Arc::new(AlertService::new(thresholds, notifications, dedup, fanout));

    let ledger = Arc::new(InventoryLedger::new(StockRepository::new(db.clone())));
    let engine = TransferEngine::new(TransferRepository::new(db), ledger.clone(), alerts);

    Harness {
        _tmp: tmp,
        ledger,
        engine,
    }
}

fn national() -> CurrentUser {
    CurrentUser {
        id: "nat-1".into(),
        username: "direction".into(),
        role: Role::National,
        region: None,
        health_center: None,
        assigned_only: false,
    }
}

fn regional(region: &str) -> CurrentUser {
    CurrentUser {
        id: format!("reg-{}", region.to_lowercase()),
        username: region.into(),
        role: Role::Regional,
        region: Some(region.into()),
        health_center: None,
        assigned_only: false,
    }
}

fn expiry(days: i64) -> NaiveDate {
    chrono::Utc::now().date_naive() + chrono::Duration::days(days)
}

fn national_identity(vaccine: &str, batch: &str) -> LotIdentity {
    LotIdentity {
        vaccine: vaccine.into(),
        batch_number: batch.into(),
        level: StockLevel::National,
        region: None,
        health_center: None,
        assigned_to: None,
    }
}

fn initiate_to_region(stock_id: String, quantity: i64, region: &str) -> TransferInitiate {
    TransferInitiate {
        stock_id,
        quantity,
        to_region: Some(region.into()),
        to_health_center: None,
        to_user_id: None,
        auto_accept: false,
        notes: None,
    }
}

#[tokio::test]
async fn accepted_transfer_conserves_quantity() {
    let h = harness().await;
    let sender = national();
    let receiver = regional("Thiès");

    let (change, _) = h
        .ledger
        .find_or_create(&national_identity("PENTA", "B100"), 200, expiry(120), &sender.id)
        .await
        .unwrap();
    let source_id = change.lot.id.clone().unwrap();

    // initiate 即扣减源批次 (预留)
    let record = h
        .engine
        .initiate(&sender, &initiate_to_region(source_id.to_string(), 50, "Thiès"))
        .await
        .unwrap();
    assert_eq!(record.status, TransferStatus::Pending);
    assert_eq!(h.ledger.get(&source_id).await.unwrap().quantity, 150);

    // 目标批次在接受之前不存在
    let dest_identity = LotIdentity {
        vaccine: "PENTA".into(),
        batch_number: "B100".into(),
        level: StockLevel::Regional,
        region: Some("Thiès".into()),
        health_center: None,
        assigned_to: None,
    };
    assert!(h.ledger.find_by_identity(&dest_identity).await.unwrap().is_none());

    // 接受方在 incoming 里能看到
    let incoming = h.engine.incoming(&receiver).await.unwrap();
    assert_eq!(incoming.len(), 1);

    let transfer_id = record.id.clone().unwrap().to_string();
    let resolved = h.engine.accept(&receiver, &transfer_id).await.unwrap();
    assert_eq!(resolved.status, TransferStatus::Accepted);
    assert!(resolved.accepted_date.is_some());

    // 守恒: 源 -50, 目标 +50
    assert_eq!(h.ledger.get(&source_id).await.unwrap().quantity, 150);
    let dest = h
        .ledger
        .find_by_identity(&dest_identity)
        .await
        .unwrap()
        .expect("acceptance must create the destination lot");
    assert_eq!(dest.quantity, 50);
}

#[tokio::test]
async fn insufficient_initiate_leaves_the_source_untouched() {
    let h = harness().await;
    let sender = national();

    let (change, _) = h
        .ledger
        .find_or_create(&national_identity("BCG", "K7"), 15, expiry(90), &sender.id)
        .await
        .unwrap();
    let source_id = change.lot.id.clone().unwrap();

    let err = h
        .engine
        .initiate(&sender, &initiate_to_region(source_id.to_string(), 20, "Dakar"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InsufficientStock(_)));

    assert_eq!(h.ledger.get(&source_id).await.unwrap().quantity, 15);
    assert!(h.engine.outgoing(&sender).await.unwrap().is_empty());
}

#[tokio::test]
async fn reject_restores_the_reservation_exactly_once() {
    let h = harness().await;
    let sender = national();
    let receiver = regional("Dakar");

    let (change, _) = h
        .ledger
        .find_or_create(&national_identity("VPO", "R2"), 100, expiry(60), &sender.id)
        .await
        .unwrap();
    let source_id = change.lot.id.clone().unwrap();

    let record = h
        .engine
        .initiate(&sender, &initiate_to_region(source_id.to_string(), 30, "Dakar"))
        .await
        .unwrap();
    assert_eq!(h.ledger.get(&source_id).await.unwrap().quantity, 70);

    let transfer_id = record.id.clone().unwrap().to_string();
    let resolved = h
        .engine
        .reject(&receiver, &transfer_id, Some("cold chain broken".into()))
        .await
        .unwrap();
    assert_eq!(resolved.status, TransferStatus::Rejected);
    assert_eq!(resolved.notes.as_deref(), Some("cold chain broken"));
    assert_eq!(h.ledger.get(&source_id).await.unwrap().quantity, 100);

    // 终态排他: 拒绝后不可再接受, 余额不再变动
    let err = h.engine.accept(&receiver, &transfer_id).await.unwrap_err();
    assert!(matches!(err, AppError::AlreadyResolved(_)));
    let err = h
        .engine
        .reject(&receiver, &transfer_id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AlreadyResolved(_)));
    assert_eq!(h.ledger.get(&source_id).await.unwrap().quantity, 100);
}

#[tokio::test]
async fn acceptance_merges_into_an_existing_destination_lot() {
    let h = harness().await;
    let sender = national();
    let receiver = regional("Thiès");

    let dest_identity = LotIdentity {
        vaccine: "PENTA".into(),
        batch_number: "B200".into(),
        level: StockLevel::Regional,
        region: Some("Thiès".into()),
        health_center: None,
        assigned_to: None,
    };
    h.ledger
        .find_or_create(&dest_identity, 20, expiry(120), &receiver.id)
        .await
        .unwrap();

    let (change, _) = h
        .ledger
        .find_or_create(&national_identity("PENTA", "B200"), 80, expiry(120), &sender.id)
        .await
        .unwrap();
    let source_id = change.lot.id.clone().unwrap();

    let record = h
        .engine
        .initiate(&sender, &initiate_to_region(source_id.to_string(), 40, "Thiès"))
        .await
        .unwrap();
    h.engine
        .accept(&receiver, &record.id.clone().unwrap().to_string())
        .await
        .unwrap();

    // 同一身份合并, 不产生第二行
    let dest = h
        .ledger
        .find_by_identity(&dest_identity)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dest.quantity, 60);
}

#[tokio::test]
async fn auto_accept_resolves_in_the_same_request() {
    let h = harness().await;
    let sender = national();

    let (change, _) = h
        .ledger
        .find_or_create(&national_identity("ROTA", "Z1"), 60, expiry(90), &sender.id)
        .await
        .unwrap();
    let source_id = change.lot.id.clone().unwrap();

    let mut request = initiate_to_region(source_id.to_string(), 25, "Dakar");
    request.auto_accept = true;
    let record = h.engine.initiate(&sender, &request).await.unwrap();

    assert_eq!(record.status, TransferStatus::Accepted);
    assert_eq!(h.ledger.get(&source_id).await.unwrap().quantity, 35);
    let dest = h
        .ledger
        .find_by_identity(&LotIdentity {
            vaccine: "ROTA".into(),
            batch_number: "Z1".into(),
            level: StockLevel::Regional,
            region: Some("Dakar".into()),
            health_center: None,
            assigned_to: None,
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dest.quantity, 25);
}

#[tokio::test]
async fn only_the_intended_recipient_may_respond() {
    let h = harness().await;
    let sender = national();
    let wrong_region = regional("Dakar");

    let (change, _) = h
        .ledger
        .find_or_create(&national_identity("MEASLES", "M3"), 50, expiry(90), &sender.id)
        .await
        .unwrap();
    let record = h
        .engine
        .initiate(
            &sender,
            &initiate_to_region(change.lot.id.clone().unwrap().to_string(), 10, "Thiès"),
        )
        .await
        .unwrap();

    let transfer_id = record.id.clone().unwrap().to_string();
    let err = h
        .engine
        .accept(&wrong_region, &transfer_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
    // still pending for the right region
    assert_eq!(h.engine.incoming(&regional("Thiès")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn cancel_is_originator_only_and_restores() {
    let h = harness().await;
    let sender = national();
    let receiver = regional("Thiès");

    let (change, _) = h
        .ledger
        .find_or_create(&national_identity("YF", "Y9"), 40, expiry(90), &sender.id)
        .await
        .unwrap();
    let source_id = change.lot.id.clone().unwrap();

    let record = h
        .engine
        .initiate(&sender, &initiate_to_region(source_id.to_string(), 10, "Thiès"))
        .await
        .unwrap();
    let transfer_id = record.id.clone().unwrap().to_string();

    let err = h
        .engine
        .cancel(&receiver, &transfer_id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let resolved = h
        .engine
        .cancel(&sender, &transfer_id, Some("wrong region".into()))
        .await
        .unwrap();
    assert_eq!(resolved.status, TransferStatus::Cancelled);
    assert_eq!(h.ledger.get(&source_id).await.unwrap().quantity, 40);

    // cancelled 也是终态
    let err = h.engine.accept(&receiver, &transfer_id).await.unwrap_err();
    assert!(matches!(err, AppError::AlreadyResolved(_)));
}

#[tokio::test]
async fn concurrent_accept_and_reject_have_one_winner() {
    let h = harness().await;
    let sender = national();
    let receiver = regional("Thiès");

    let (change, _) = h
        .ledger
        .find_or_create(&national_identity("PENTA", "RACE"), 100, expiry(90), &sender.id)
        .await
        .unwrap();
    let source_id = change.lot.id.clone().unwrap();

    let record = h
        .engine
        .initiate(&sender, &initiate_to_region(source_id.to_string(), 30, "Thiès"))
        .await
        .unwrap();
    let transfer_id = record.id.clone().unwrap().to_string();

    let accept = {
        let engine = h.engine.clone();
        let receiver = receiver.clone();
        let id = transfer_id.clone();
        tokio::spawn(async move { engine.accept(&receiver, &id).await })
    };
    let reject = {
        let engine = h.engine.clone();
        let receiver = receiver.clone();
        let id = transfer_id.clone();
        tokio::spawn(async move { engine.reject(&receiver, &id, None).await })
    };

    let accept_result = accept.await.unwrap();
    let reject_result = reject.await.unwrap();
    // 恰好一方成功
    assert!(accept_result.is_ok() ^ reject_result.is_ok());

    let source_after = h.ledger.get(&source_id).await.unwrap().quantity;
    if accept_result.is_ok() {
        assert_eq!(source_after, 70);
    } else {
        assert_eq!(source_after, 100);
    }
}
