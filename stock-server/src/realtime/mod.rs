//! 实时通道模块
//!
//! 房间制的实时分发: 连接在握手时注册用户身份并加入房间, 服务端按
//! 房间交集推送通知。
//!
//! - [`ConnectionRegistry`] - 活动连接注册表 (last-connection-wins)
//! - [`NotificationFanout`] - 按房间分发
//! - [`tcp_server`] - TCP 监听与会话协议
//! - [`transport`] - 可插拔传输层 (TCP / 内存)

pub mod fanout;
pub mod registry;
pub mod tcp_server;
pub mod transport;

pub use fanout::NotificationFanout;
pub use registry::{ClientConnection, ConnectionRegistry, run_sweeper};
pub use tcp_server::run_listener;
pub use transport::{MemoryTransport, TcpTransport, Transport};
