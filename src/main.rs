//! Spectrum Player - 带实时频谱的音频播放器
//!
//! 播放位置来自设备（已提交帧数减去硬件延迟），
//! 频谱窗口跟随真实播放位置，画面与声音同步。

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::Context;
use clap::Parser;

use spectrum_player::audio::{AccessStyle, SinkConfig};
use spectrum_player::decode;
use spectrum_player::engine::{EngineConfig, Renderer, SyncLoop};
use spectrum_player::tui::{StatusRenderer, TuiRenderer};

/// Spectrum Player - audio player with a real-time spectrum display
#[derive(Parser)]
#[command(name = "spectrum-player")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Audio file to play
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Output device (ALSA PCM name, or 'null' / 'null:nodelay')
    #[arg(value_name = "DEVICE", conflicts_with = "device")]
    device_arg: Option<String>,

    /// Output device (same as the positional DEVICE)
    #[arg(short, long)]
    device: Option<String>,

    /// Use memory-mapped access instead of direct writes
    #[arg(long)]
    mapped: bool,

    /// Period size in frames
    #[arg(long, default_value = "1024")]
    period: usize,

    /// Target frames per second for the display
    #[arg(long, default_value = "60")]
    fps: u32,

    /// Print a status line instead of the full-screen display
    #[arg(long)]
    no_tui: bool,

    /// Show verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    }

    let config = create_engine_config(&cli);
    let device = cli.device.as_deref().or(cli.device_arg.as_deref());

    let buffer = decode::load(&cli.file)
        .with_context(|| format!("failed to load {}", cli.file.display()))?;

    let title = cli
        .file
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned();

    if cli.no_tui {
        println!("Spectrum Player - Playing: {}", cli.file.display());
        println!("Press Ctrl+C to stop.\n");
        play(buffer, device, &config, StatusRenderer::stdout())
    } else {
        let label = device.unwrap_or("default").to_string();
        let renderer = TuiRenderer::new(title, label).context("failed to set up terminal")?;
        play(buffer, device, &config, renderer)
    }
}

/// 运行一个播放会话，结束后打印统计
fn play<R: Renderer>(
    buffer: spectrum_player::audio::SampleBuffer,
    device: Option<&str>,
    config: &EngineConfig,
    renderer: R,
) -> anyhow::Result<()> {
    let mut session = SyncLoop::open(buffer, device, config, renderer)
        .with_context(|| format!("failed to open output '{}'", device.unwrap_or("default")))?;

    let stop = session.stop_handle();
    ctrlc::set_handler(move || {
        stop.store(true, Ordering::SeqCst);
    })?;

    // 出错时也要关闭设备
    let result = session.run(config.frame_interval());
    let report = session.finish();

    println!();
    result.context("playback failed")?;
    let report = report.context("failed to close output")?;
    println!("{}", report);

    Ok(())
}

/// 创建引擎配置
fn create_engine_config(cli: &Cli) -> EngineConfig {
    EngineConfig {
        sink: SinkConfig {
            access: if cli.mapped {
                AccessStyle::Mapped
            } else {
                AccessStyle::Push
            },
            period_frames: cli.period.clamp(16, 1 << 16),
            ..SinkConfig::default()
        },
        target_fps: cli.fps.clamp(1, 240),
    }
}
