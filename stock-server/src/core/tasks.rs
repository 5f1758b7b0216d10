//! 后台任务管理
//!
//! 服务器的三个常驻任务 (实时通道监听、空闲连接清扫、每日库存扫描)
//! 统一注册到 [`BackgroundTasks`]: 同一个取消令牌驱动优雅关闭, 任务内
//! 的 panic 被捕获记录而不是悄悄消失。

use std::any::Any;
use std::fmt;

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 任务类型, 只用于日志归类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// 长期后台工作者
    Worker,
    /// 连接监听器
    Listener,
    /// 定时任务
    Periodic,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Worker => write!(f, "Worker"),
            TaskKind::Listener => write!(f, "Listener"),
            TaskKind::Periodic => write!(f, "Periodic"),
        }
    }
}

struct TaskEntry {
    name: &'static str,
    kind: TaskKind,
    handle: JoinHandle<()>,
}

/// 后台任务管理器
pub struct BackgroundTasks {
    entries: Vec<TaskEntry>,
    shutdown: CancellationToken,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// 所有任务共享的取消令牌; 任务体内 select 监听它退出
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// 注册并启动一个任务
    pub fn spawn<F>(&mut self, name: &'static str, kind: TaskKind, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(supervise(name, kind, future));
        tracing::debug!(task = %name, kind = %kind, "Registered background task");
        self.entries.push(TaskEntry { name, kind, handle });
    }

    /// 启动完成后记录一条任务清单
    pub fn log_summary(&self) {
        let count_of = |kind: TaskKind| self.entries.iter().filter(|t| t.kind == kind).count();
        tracing::info!(
            "Background tasks registered: {} total (Worker: {}, Listener: {}, Periodic: {})",
            self.entries.len(),
            count_of(TaskKind::Worker),
            count_of(TaskKind::Listener),
            count_of(TaskKind::Periodic),
        );
    }

    /// 优雅关闭: 触发取消令牌并等全部任务退出
    pub async fn shutdown(self) {
        tracing::info!("Shutting down {} background tasks...", self.entries.len());
        self.shutdown.cancel();

        for entry in self.entries {
            match entry.handle.await {
                Ok(()) => tracing::debug!(task = %entry.name, "Task completed"),
                Err(e) if e.is_cancelled() => {
                    tracing::debug!(task = %entry.name, "Task cancelled");
                }
                Err(e) => tracing::error!(task = %entry.name, error = ?e, "Task panicked"),
            }
        }

        tracing::info!("All background tasks stopped");
    }
}

/// 包一层 panic 捕获, 任务崩溃留下日志而不是无声终止
async fn supervise<F>(name: &'static str, kind: TaskKind, future: F)
where
    F: std::future::Future<Output = ()>,
{
    if let Err(payload) = AssertUnwindSafe(future).catch_unwind().await {
        tracing::error!(
            task = %name,
            kind = %kind,
            panic = %panic_text(payload.as_ref()),
            "Background task panicked! This is a bug that should be reported."
        );
    }
}

fn panic_text(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
