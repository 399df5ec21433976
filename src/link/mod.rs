// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// PLC 通信 (Telemetry Link)
///
/// - s7:        ISO-on-TCP / S7 报文编解码
/// - client:    基于 TcpStream 的数据块读写客户端
/// - telemetry: 字段更新策略、心跳与重连
pub mod client;
pub mod s7;
pub mod telemetry;

use std::io;

use thiserror::Error;

pub use client::S7Client;
pub use telemetry::{run_heartbeat, ReportOutcome, TelemetryLink, TelemetrySnapshot};

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("网络错误: {0}")]
    Io(#[from] io::Error),

    #[error("通信超时")]
    Timeout,

    #[error("报文错误: {0}")]
    Protocol(String),

    #[error("PLC 拒绝请求 (class=0x{class:02X}, code=0x{code:02X})")]
    Rejected { class: u8, code: u8 },

    #[error("数据项访问失败 (return code=0x{0:02X})")]
    ItemFailed(u8),

    #[error("未连接")]
    NotConnected,

    #[error("正在连接中")]
    Connecting,

    #[error("请求超出 PDU 长度 ({requested} > {limit})")]
    PduTooLarge { requested: usize, limit: usize },
}

impl LinkError {
    /// 读写超时归一为 Timeout
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => LinkError::Timeout,
            _ => LinkError::Io(err),
        }
    }
}

pub type LinkResult<T> = std::result::Result<T, LinkError>;

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSession {
    Disconnected,
    Connected,
}

impl std::fmt::Display for LinkSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkSession::Disconnected => write!(f, "未连接"),
            LinkSession::Connected => write!(f, "已连接"),
        }
    }
}

/// 数据块读写能力 (PLC 传输层)
pub trait BlockClient: Send {
    fn connect(&mut self) -> LinkResult<()>;

    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    fn db_read(&mut self, db: u16, start: u32, len: usize) -> LinkResult<Vec<u8>>;

    fn db_write(&mut self, db: u16, start: u32, data: &[u8]) -> LinkResult<()>;
}

impl<C: BlockClient + ?Sized> BlockClient for Box<C> {
    fn connect(&mut self) -> LinkResult<()> {
        (**self).connect()
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn db_read(&mut self, db: u16, start: u32, len: usize) -> LinkResult<Vec<u8>> {
        (**self).db_read(db, start, len)
    }

    fn db_write(&mut self, db: u16, start: u32, data: &[u8]) -> LinkResult<()> {
        (**self).db_write(db, start, data)
    }
}
