//! Repository Module
//!
//! Provides storage operations for SurrealDB tables.
//!
//! # ID Convention
//!
//! 全栈统一使用 `table:id` 格式, 通过 `surrealdb::RecordId` 处理:
//!   - 解析: `let id: RecordId = "stock:abc".parse()?;`
//!   - 创建: `RecordId::from_table_key("stock", "abc")`
//!   - CRUD: `db.select(id)` / `db.delete(id)` 直接使用 RecordId

pub mod notification;
pub mod stock;
pub mod transfer;

// Re-exports
pub use notification::NotificationRepository;
pub use stock::StockRepository;
pub use transfer::TransferRepository;

use surrealdb::Surreal;
use surrealdb::engine::local::Db;
use thiserror::Error;

/// 事务内 `THROW` 标记 - 存储层把业务违例抛成错误字符串,
/// [`RepoError::from`] 负责映射回类型化错误。
pub mod markers {
    pub const INSUFFICIENT_QUANTITY: &str = "insufficient_quantity";
    pub const ALREADY_RESOLVED: &str = "already_resolved";
    pub const SOURCE_LOT_MISSING: &str = "source_lot_missing";
}

/// Repository error types
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Insufficient quantity: {0}")]
    InsufficientQuantity(String),

    #[error("Already resolved: {0}")]
    AlreadyResolved(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl From<surrealdb::Error> for RepoError {
    fn from(err: surrealdb::Error) -> Self {
        let msg = err.to_string();
        if msg.contains(markers::INSUFFICIENT_QUANTITY) {
            RepoError::InsufficientQuantity("debit exceeds balance".into())
        } else if msg.contains(markers::ALREADY_RESOLVED) {
            RepoError::AlreadyResolved("transfer is not pending".into())
        } else if msg.contains(markers::SOURCE_LOT_MISSING) {
            RepoError::NotFound("source lot no longer exists".into())
        } else if msg.contains("already contains") {
            // 唯一索引冲突 (并发创建撞上同一身份元组)
            RepoError::Duplicate(msg)
        } else {
            RepoError::Database(msg)
        }
    }
}

/// Result type for repository operations
pub type RepoResult<T> = Result<T, RepoError>;

/// Surface the outcome of a multi-statement transaction
///
/// 事务被取消时, 其它语句只报告笼统的 "not executed" 错误, 真正的
/// THROW 标记挂在出错的那条语句上, 必须扫全部错误而不是取第一条。
pub(crate) fn check_transaction(response: &mut surrealdb::Response) -> RepoResult<()> {
    let errors = response.take_errors();
    if errors.is_empty() {
        return Ok(());
    }

    let mut generic: Option<RepoError> = None;
    for (_, err) in errors {
        match RepoError::from(err) {
            RepoError::Database(msg) => {
                if generic.is_none() {
                    generic = Some(RepoError::Database(msg));
                }
            }
            specific => return Err(specific),
        }
    }
    Err(generic.unwrap_or_else(|| RepoError::Database("transaction failed".into())))
}

/// Parse an id in either `table:key` or bare `key` form
pub fn parse_record_id(table: &str, raw: &str) -> RepoResult<surrealdb::RecordId> {
    if raw.contains(':') {
        let id: surrealdb::RecordId = raw
            .parse()
            .map_err(|_| RepoError::Validation(format!("Malformed id: {}", raw)))?;
        if id.table() != table {
            return Err(RepoError::Validation(format!(
                "Expected a {} id, got {}",
                table, raw
            )));
        }
        Ok(id)
    } else {
        Ok(surrealdb::RecordId::from_table_key(table, raw))
    }
}

/// Base repository with database reference
#[derive(Clone)]
pub struct BaseRepository {
    db: Surreal<Db>,
}

impl BaseRepository {
    pub fn new(db: Surreal<Db>) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Surreal<Db> {
        &self.db
    }
}
