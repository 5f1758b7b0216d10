//! Database Module
//!
//! 嵌入式 SurrealDB (RocksDB 引擎) 连接与 schema 定义。
//!
//! 数量一致性依赖两个存储层机制:
//! - 条件更新 (`UPDATE ... WHERE quantity >= $amt`) 串行化并发扣减
//! - 多语句事务 (`BEGIN/COMMIT` + `THROW`) 保证转移的借/贷/记录原子性

pub mod models;
pub mod repository;

use std::time::Duration;

use surrealdb::Surreal;
use surrealdb::engine::local::{Db, RocksDb};

use repository::{RepoError, RepoResult};

/// Database service - owns the embedded SurrealDB handle
#[derive(Clone)]
pub struct DbService {
    pub db: Surreal<Db>,
}

impl DbService {
    /// Open (or create) the datastore at `db_path` and define the schema
    pub async fn new(db_path: &str) -> RepoResult<Self> {
        let db: Surreal<Db> = Surreal::new::<RocksDb>(db_path)
            .await
            .map_err(|e| RepoError::Database(format!("Failed to open datastore: {}", e)))?;

        db.use_ns("vaxtrack")
            .use_db("stock")
            .await
            .map_err(|e| RepoError::Database(format!("Failed to select namespace: {}", e)))?;

        define_schema(&db).await?;

        tracing::info!(path = %db_path, "Datastore opened (embedded SurrealDB, RocksDB)");
        Ok(Self { db })
    }
}

/// Table and index definitions
///
/// 身份元组唯一索引是 merge-on-create 语义的兜底: 并发创建撞上同一
/// 身份时, 后到者收到唯一索引冲突并改走合并路径。
async fn define_schema(db: &Surreal<Db>) -> RepoResult<()> {
    db.query(
        "
        DEFINE TABLE IF NOT EXISTS stock SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS stock_identity ON stock
            FIELDS vaccine, batch_number, level, region, health_center, assigned_to UNIQUE;
        DEFINE INDEX IF NOT EXISTS stock_expiry ON stock FIELDS expiration_date;

        DEFINE TABLE IF NOT EXISTS transfer SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS transfer_status ON transfer FIELDS status;

        DEFINE TABLE IF NOT EXISTS notification SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS notification_dedup ON notification FIELDS kind, title, created_at;
        ",
    )
    .await?
    .check()?;
    Ok(())
}

/// Bounded-exponential-backoff wrapper for transient storage failures
///
/// 只重试 [`RepoError::Database`] (连接类故障); 业务错误原样返回,
/// 永不重试。预算耗尽后以 [`RepoError::Unavailable`] 收场。
pub async fn with_retry<T, F, Fut>(operation: &'static str, mut op: F) -> RepoResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RepoResult<T>>,
{
    const MAX_ATTEMPTS: u32 = 3;
    let mut delay = Duration::from_millis(100);
    let mut last_error = String::new();

    for attempt in 1..=MAX_ATTEMPTS {
        match op().await {
            Err(RepoError::Database(msg)) => {
                tracing::warn!(
                    operation = %operation,
                    attempt,
                    error = %msg,
                    "Transient storage failure, retrying"
                );
                last_error = msg;
                if attempt < MAX_ATTEMPTS {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
            other => return other,
        }
    }

    Err(RepoError::Unavailable(format!(
        "{} failed after {} attempts: {}",
        operation, MAX_ATTEMPTS, last_error
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_exhausts_into_unavailable() {
        let calls = AtomicU32::new(0);
        let result: RepoResult<()> = with_retry("test_op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RepoError::Database("connection reset".into())) }
        })
        .await;

        assert!(matches!(result, Err(RepoError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn business_errors_are_never_retried() {
        let calls = AtomicU32::new(0);
        let result: RepoResult<()> = with_retry("test_op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RepoError::InsufficientQuantity("5 > 3".into())) }
        })
        .await;

        assert!(matches!(result, Err(RepoError::InsufficientQuantity(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn success_passes_through() {
        let result = with_retry("test_op", || async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
