// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 遥测上报 (Telemetry Link)
//!
//! DB 字段布局 (大端):
//! | 偏移 | 字段 | 编码 | 策略 |
//! |---|---|---|---|
//! | 0  | 有人标志 | 0x01/0x00 | 变化时写 |
//! | 2  | 人数     | u16 | 随有人标志一起写 |
//! | 4  | 最近距离 | f32 cm | 有人时每次写 |
//! | 8  | 最大速度 | f32 km/h | 有人时每次写 |
//! | 12 | 时间戳   | u32 unix | 每次写 |
//! | 16 | 系统在线 | bit 0 | 连接时置位, 心跳重写, 退出时清零 |

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{BlockClient, LinkError, LinkResult, LinkSession};
use crate::config::LinkConfig;
use crate::detection::types::DetectionSet;

pub const OFFSET_PRESENCE: u32 = 0;
pub const OFFSET_COUNT: u32 = 2;
pub const OFFSET_MIN_DISTANCE: u32 = 4;
pub const OFFSET_MAX_SPEED: u32 = 8;
pub const OFFSET_TIMESTAMP: u32 = 12;
pub const OFFSET_ALIVE: u32 = 16;

/// 速度超过该值时输出详细日志 (km/h)
const MOVEMENT_LOG_KMH: f32 = 0.1;

/// 最近一次成功写入的字段值
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetrySnapshot {
    pub presence: bool,
    pub count: u16,
    pub min_distance: Option<f32>,
    pub max_speed: Option<f32>,
    pub timestamp: u32,
    pub alive: bool,
}

#[derive(Debug)]
pub enum ReportOutcome {
    /// 全部字段写入成功
    Sent { presence_changed: bool },
    /// 未连接, 本次不上报 (由心跳负责重连)
    Skipped,
    /// 写入失败, 会话已断开
    Failed(LinkError),
}

/// 会话状态
///
/// 连接握手期间客户端被取出锁外使用, `client` 为 None;
/// 此时上报直接跳过, 不等待握手完成。
struct LinkState<C> {
    client: Option<C>,
    session: LinkSession,
    snapshot: TelemetrySnapshot,
}

impl<C: BlockClient> LinkState<C> {
    /// 已连接时的客户端
    fn connected(&mut self) -> Option<&mut C> {
        match self.session {
            LinkSession::Connected => self.client.as_mut(),
            LinkSession::Disconnected => None,
        }
    }

    fn drop_session(&mut self) {
        if let Some(client) = self.client.as_mut() {
            client.disconnect();
        }
        self.session = LinkSession::Disconnected;
    }
}

pub struct TelemetryLink<C: BlockClient> {
    state: Mutex<LinkState<C>>,
    db: u16,
    heartbeat_interval: Duration,
    reconnect_pause: Duration,
}

impl<C: BlockClient> TelemetryLink<C> {
    pub fn new(client: C, config: &LinkConfig) -> Self {
        Self {
            state: Mutex::new(LinkState {
                client: Some(client),
                session: LinkSession::Disconnected,
                snapshot: TelemetrySnapshot::default(),
            }),
            db: config.db_number,
            heartbeat_interval: config.heartbeat_interval(),
            reconnect_pause: config.reconnect_pause(),
        }
    }

    pub fn session(&self) -> LinkSession {
        self.state.lock().session
    }

    pub fn is_connected(&self) -> bool {
        self.session() == LinkSession::Connected
    }

    /// 是否有握手正在进行
    pub fn is_connecting(&self) -> bool {
        self.state.lock().client.is_none()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.state.lock().snapshot
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// 建立会话并置位在线标志
    ///
    /// 握手与在线标志写入在锁外进行, 期间 `report` 返回 Skipped。
    pub fn connect(&self) -> LinkResult<()> {
        let mut client = {
            let mut st = self.state.lock();
            let client = st.client.take().ok_or(LinkError::Connecting)?;
            st.session = LinkSession::Disconnected;
            client
        };

        let result = client
            .connect()
            .and_then(|()| write_alive(&mut client, self.db, true));
        if result.is_err() {
            client.disconnect();
        }

        let mut st = self.state.lock();
        st.client = Some(client);
        match result {
            Ok(()) => {
                st.session = LinkSession::Connected;
                st.snapshot.alive = true;
                info!("✅ PLC 已连接 (DB{})", self.db);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// 断开 → 暂停 → 重新连接, 暂停期间不持有锁
    pub fn reconnect(&self) -> LinkResult<()> {
        self.state.lock().drop_session();
        thread::sleep(self.reconnect_pause);
        self.connect()
    }

    /// 心跳: 已连接时重写在线标志, 未连接时尝试重连
    pub fn send_heartbeat(&self) {
        {
            let mut st = self.state.lock();
            if let Some(client) = st.connected() {
                match write_alive(client, self.db, true) {
                    Ok(()) => debug!("💓 心跳"),
                    Err(e) => {
                        warn!("⚠️ 心跳写入失败: {}", e);
                        st.drop_session();
                    }
                }
                return;
            }
        }

        info!("🔄 尝试重新连接 PLC...");
        if let Err(e) = self.reconnect() {
            warn!("❌ 重连失败: {}", e);
        }
    }

    /// 上报一帧检测结果
    ///
    /// 字段按偏移顺序写入; 任一写入失败即断开会话并放弃本次剩余字段。
    pub fn report(&self, set: &DetectionSet) -> ReportOutcome {
        let mut st = self.state.lock();
        let LinkState {
            client,
            session,
            snapshot,
        } = &mut *st;
        let client = match (*session, client.as_mut()) {
            (LinkSession::Connected, Some(client)) => client,
            _ => return ReportOutcome::Skipped,
        };

        match write_report(client, snapshot, self.db, set) {
            Ok(presence_changed) => ReportOutcome::Sent { presence_changed },
            Err(e) => {
                warn!("❌ PLC 写入失败, 会话断开: {}", e);
                st.drop_session();
                ReportOutcome::Failed(e)
            }
        }
    }

    pub fn set_alive(&self, alive: bool) -> LinkResult<()> {
        let mut st = self.state.lock();
        let client = st.connected().ok_or(LinkError::NotConnected)?;
        match write_alive(client, self.db, alive) {
            Ok(()) => {
                st.snapshot.alive = alive;
                Ok(())
            }
            Err(e) => {
                st.drop_session();
                Err(e)
            }
        }
    }

    /// 退出: 清零在线标志并关闭会话
    pub fn shutdown(&self) {
        let mut st = self.state.lock();
        if let Some(client) = st.connected() {
            match write_alive(client, self.db, false) {
                Ok(()) => st.snapshot.alive = false,
                Err(e) => warn!("⚠️ 清除在线标志失败: {}", e),
            }
        }
        st.drop_session();
        info!("🔌 PLC 连接已关闭");
    }
}

/// 在线标志: 读-改-写, 保留同字节其它位
fn write_alive<C: BlockClient>(client: &mut C, db: u16, alive: bool) -> LinkResult<()> {
    let current = client.db_read(db, OFFSET_ALIVE, 1)?;
    let byte = current.first().copied().unwrap_or(0);
    let updated = if alive { byte | 0x01 } else { byte & !0x01 };
    client.db_write(db, OFFSET_ALIVE, &[updated])
}

fn write_report<C: BlockClient>(
    client: &mut C,
    snapshot: &mut TelemetrySnapshot,
    db: u16,
    set: &DetectionSet,
) -> LinkResult<bool> {
    let has_people = set.has_people();
    let count = set.count().min(u16::MAX as usize) as u16;

    // 1-2. 有人标志 + 人数 (仅变化时)
    let presence_changed = has_people != snapshot.presence;
    if presence_changed {
        client.db_write(db, OFFSET_PRESENCE, &[has_people as u8])?;
        client.db_write(db, OFFSET_COUNT, &count.to_be_bytes())?;
        snapshot.presence = has_people;
        snapshot.count = count;
        info!(
            "👥 人员状态: {} ({}人)",
            if has_people { "有人" } else { "无人" },
            count
        );
    }

    // 3-4. 最近距离 + 最大速度 (有人时每次)
    if has_people {
        let min_distance = set.min_distance().unwrap_or(0.0);
        let max_speed = set.max_speed().unwrap_or(0.0);

        client.db_write(db, OFFSET_MIN_DISTANCE, &min_distance.to_be_bytes())?;
        snapshot.min_distance = Some(min_distance);
        client.db_write(db, OFFSET_MAX_SPEED, &max_speed.to_be_bytes())?;
        snapshot.max_speed = Some(max_speed);

        if max_speed > MOVEMENT_LOG_KMH {
            info!(
                "🏃 最近距离: {:.1}cm | 最大速度: {:.2}km/h",
                min_distance, max_speed
            );
        }
    }

    // 5. 时间戳 (每次, 单调不减)
    let timestamp = unix_now().max(snapshot.timestamp);
    client.db_write(db, OFFSET_TIMESTAMP, &timestamp.to_be_bytes())?;
    snapshot.timestamp = timestamp;

    Ok(presence_changed)
}

fn unix_now() -> u32 {
    chrono::Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32
}

/// 心跳线程主循环
///
/// 以短间隔检查 active, 退出不必等满一个心跳周期。
pub fn run_heartbeat<C: BlockClient>(link: Arc<TelemetryLink<C>>, active: Arc<AtomicBool>) {
    const POLL: Duration = Duration::from_millis(100);
    info!("💓 心跳线程启动 (间隔 {:?})", link.heartbeat_interval());

    let mut last = Instant::now();
    while active.load(Ordering::Relaxed) {
        if last.elapsed() >= link.heartbeat_interval() {
            link.send_heartbeat();
            last = Instant::now();
        }
        thread::sleep(POLL.min(link.heartbeat_interval()));
    }

    info!("✅ 心跳线程退出");
}
