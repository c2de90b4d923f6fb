//! # avsync-play
//!
//! avsync 音视频同步播放器, 对标 ffplay 的同步播放路径.
//!
//! - 解封装/解码: FFmpeg (ffmpeg-next)
//! - 音频输出与窗口: SDL2
//! - A/V 同步: 以音频时钟为主时钟, 视频按时钟差调整显示延迟
//! - 控制: ESC/Q 或关闭窗口退出

mod backend;
mod logging;
mod sdl_output;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::thread;

use anyhow::{Context, anyhow};
use avsync_engine::{Player, PlayerEvent, ReaderState, SyncConfig};
use clap::Parser;
use log::{debug, error, info};
use sdl2::EventPump;
use sdl2::event::{Event, WindowEvent};
use sdl2::keyboard::Scancode;

use crate::backend::FfmpegBackend;
use crate::sdl_output::{AudioHost, SdlSurface};

/// avsync 音视频同步播放器 (对标 ffplay)
#[derive(Parser)]
#[command(name = "avsync-play", about = "avsync 音视频同步播放器")]
struct Args {
    /// 输入文件路径
    input: String,

    /// JSON 配置文件, 命令行参数优先
    #[arg(long)]
    config: Option<PathBuf>,

    /// 数据包队列上限 (包数)
    #[arg(long)]
    packet_ceiling: Option<usize>,

    /// 视频帧队列容量
    #[arg(long)]
    video_queue: Option<usize>,

    /// 音频帧队列容量
    #[arg(long)]
    audio_queue: Option<usize>,

    /// 播放完毕后自动退出
    #[arg(long)]
    autoexit: bool,

    /// 日志详细程度 (-v debug, -vv trace avsync, -vvv trace 全部)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn sync_config(&self) -> anyhow::Result<SyncConfig> {
        let mut config = match &self.config {
            Some(path) => SyncConfig::from_json_file(path)
                .with_context(|| format!("加载配置 {} 失败", path.display()))?,
            None => SyncConfig::default(),
        };
        if let Some(ceiling) = self.packet_ceiling {
            config.packet_queue_ceiling = ceiling;
        }
        if let Some(size) = self.video_queue {
            config.video_queue_size = size;
        }
        if let Some(size) = self.audio_queue {
            config.audio_queue_size = size;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() {
    let args = Args::parse();
    if let Err(e) = logging::init("avsync-play", args.verbose) {
        eprintln!("初始化日志失败: {e:#}");
        std::process::exit(1);
    }

    if let Err(e) = run(&args) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let config = args.sync_config()?;
    info!("avsync-play: 打开 {}", args.input);

    let sdl = sdl2::init().map_err(|e| anyhow!("SDL 初始化失败: {e}"))?;
    let video = sdl.video().map_err(|e| anyhow!("SDL 视频子系统: {e}"))?;
    let audio = sdl.audio().map_err(|e| anyhow!("SDL 音频子系统: {e}"))?;
    let mut events = sdl.event_pump().map_err(|e| anyhow!("SDL 事件: {e}"))?;

    let window = video
        .window("avsync-play", 640, 480)
        .position_centered()
        .resizable()
        .build()
        .context("创建窗口失败")?;
    let canvas = window.into_canvas().build().context("创建渲染器失败")?;
    let creator = canvas.texture_creator();
    let mut surface = SdlSurface::new(canvas, &creator);

    let (mut audio_host, sink) = AudioHost::new(audio);
    let backend = Arc::new(FfmpegBackend::new()?);
    let (mut player, player_events) =
        Player::open(args.input.clone(), config, backend, Box::new(sink))?;

    let outcome = event_loop(
        args,
        &mut events,
        &player_events,
        &mut surface,
        &mut audio_host,
        &mut player,
    );

    // 先中止会话: 音频回调不再等待数据, 关闭设备时 SDL 音频线程可以退出.
    // 再关闭设备宿主, 解除可能阻塞在打开设备上的音频解码线程
    player.abort();
    audio_host.shutdown();
    let state = player.stop();
    debug!("读取线程终态: {}", state.map_or("-".to_string(), |s| s.to_string()));

    match outcome? {
        Some(reason) => Err(anyhow!(reason)),
        None if state == Some(ReaderState::Failed) => Err(anyhow!("读取线程失败")),
        None => Ok(()),
    }
}

/// 宿主事件循环: 处理窗口与播放器事件, 服务音频设备请求, 驱动视频刷新
///
/// 返回播放器上报的致命错误原因, 用户退出或播放完毕时返回 `None`.
fn event_loop(
    args: &Args,
    events: &mut EventPump,
    player_events: &Receiver<PlayerEvent>,
    surface: &mut SdlSurface<'_>,
    audio_host: &mut AudioHost,
    player: &mut Player,
) -> anyhow::Result<Option<String>> {
    loop {
        for event in events.poll_iter() {
            match event {
                Event::Quit { .. }
                | Event::KeyDown {
                    scancode: Some(Scancode::Escape | Scancode::Q),
                    ..
                } => {
                    info!("用户请求退出");
                    return Ok(None);
                }
                Event::Window {
                    win_event: WindowEvent::Exposed | WindowEvent::SizeChanged(..),
                    ..
                } => player.force_refresh(),
                _ => {}
            }
        }

        while let Ok(event) = player_events.try_recv() {
            match event {
                PlayerEvent::VideoSize { width, height } => {
                    surface.resize(width, height)?;
                    player.force_refresh();
                }
                PlayerEvent::AudioOpened(params) => debug!(
                    "音频输出: {}Hz, {}ch, {} 字节/秒",
                    params.freq, params.channels, params.bytes_per_sec
                ),
                PlayerEvent::ReaderEof => debug!("输入已读完"),
                PlayerEvent::Quit { reason } => return Ok(Some(reason)),
            }
        }

        audio_host.serve();
        let wait = player.refresh(surface)?;
        if args.autoexit && player.is_drained() {
            info!("播放完毕");
            return Ok(None);
        }
        thread::sleep(wait);
    }
}
