// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 区域哨兵 (Area Sentinel)
///
/// RTSP → 人体检测 → 距离/速度 → PLC (S7)
///
/// 系统架构:
/// 1. 解码线程: RTSP 拉流与 YUV → RGB
/// 2. 检测线程: 人体检测、帧间匹配、距离/速度
/// 3. 心跳线程: PLC 在线标志与重连
/// 4. 主线程:   采集节奏与结果上报
///
/// 运行: cargo run --bin sentinel --release --features onnx,rtsp
use std::io::BufRead;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use crossbeam_channel::{unbounded, Sender};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use area_sentinel::input::RtspSource;
use area_sentinel::models::YoloPersonDetector;
use area_sentinel::{
    S7Client, SentinelConfig, SentinelError, Supervisor, SupervisorControl, TelemetryLink,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// 区域哨兵参数
#[derive(Parser, Debug)]
#[command(author, version, about = "区域哨兵 - 人员距离/速度监控", long_about = None)]
struct Args {
    /// 配置文件 (不存在时写出默认配置)
    #[arg(short, long, default_value = "sentinel.json")]
    config: String,

    /// RTSP流地址 (覆盖配置文件)
    #[arg(short, long)]
    rtsp_url: Option<String>,

    /// PLC 地址 (覆盖配置文件)
    #[arg(long)]
    plc: Option<String>,

    /// ONNX 模型路径 (覆盖配置文件)
    #[arg(short, long)]
    model: Option<String>,

    /// 输出预处理/推理耗时 (debug 级别)
    #[arg(long)]
    profile: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("❌ 致命错误: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    info!("🚀 区域哨兵启动");

    let mut config = SentinelConfig::load(&args.config);
    if let Some(url) = args.rtsp_url {
        config.camera.rtsp_url = url;
    }
    if let Some(plc) = args.plc {
        config.link.address = plc;
    }
    if let Some(model) = args.model {
        config.detection.model_path = model;
    }
    config.validate()?;
    config.print_summary();

    // 启动失败均为致命错误
    let detector = YoloPersonDetector::new(&config.detection)?.with_profile(args.profile);
    let source = RtspSource::open(&config.camera)?;
    let link = Arc::new(TelemetryLink::new(S7Client::new(&config.link), &config.link));

    let (control_tx, control_rx) = unbounded();
    spawn_console(control_tx);
    info!("⌨️ 输入 p 暂停/继续, q 退出");

    let supervisor = Supervisor::new(config, source, detector, link, control_rx);
    match supervisor.run() {
        Ok(report) => {
            info!("✅ 正常退出 (采集{}帧)", report.frames_acquired);
            Ok(())
        }
        Err(SentinelError::StreamClosed) => {
            warn!("🛑 视频流已结束");
            Err(SentinelError::StreamClosed.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// 控制台命令线程: 阻塞读 stdin
fn spawn_console(tx: Sender<SupervisorControl>) {
    let spawned = std::thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                let command = match line.trim() {
                    "p" | "P" => SupervisorControl::TogglePause,
                    "q" | "Q" => SupervisorControl::Shutdown,
                    "" => continue,
                    other => {
                        warn!("⚠️ 未知命令: {}", other);
                        continue;
                    }
                };
                let quit = command == SupervisorControl::Shutdown;
                if tx.send(command).is_err() || quit {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!("⚠️ 控制台线程启动失败: {}", e);
    }
}
