//! 同步循环
//!
//! 每个渲染帧执行一次：
//! 查询播放位置 → 频谱分析 → 交给渲染器 → 向设备喂数据
//!
//! 单线程驱动，没有音频回调线程，也没有锁。
//! 宿主通过 `Arc<AtomicBool>` 请求停止（Ctrl-C 或按键）。

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::audio::{AudioSink, SampleBuffer, SinkConfig, SinkError, SinkState, StatsReport};
use crate::spectrum::{Spectrum, SpectrumAnalyzer};

/// 引擎配置
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// 输出配置
    pub sink: SinkConfig,
    /// 目标渲染帧率
    pub target_fps: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sink: SinkConfig::default(),
            target_fps: 60,
        }
    }
}

impl EngineConfig {
    /// 每帧的时间间隔
    pub fn frame_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.target_fps.max(1) as u64)
    }
}

/// 引擎错误
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("output error: {0}")]
    Sink(#[from] SinkError),
    #[error("render error: {0}")]
    Render(#[from] io::Error),
}

/// 交给渲染器的帧信息
#[derive(Debug, Clone, Copy)]
pub struct FrameInfo {
    /// 渲染帧序号
    pub frame: u64,
    /// 播放位置（帧）
    pub position: u64,
    pub total_frames: u64,
    /// 设备实际采样率
    pub rate: u32,
    pub underruns: u64,
    pub state: SinkState,
}

impl FrameInfo {
    pub fn position_secs(&self) -> f64 {
        self.position as f64 / self.rate as f64
    }

    pub fn duration_secs(&self) -> f64 {
        self.total_frames as f64 / self.rate as f64
    }
}

/// 渲染器接口
///
/// `spectrum` 为 `None` 表示剩余帧数不足一个窗口，
/// 渲染器应保持上一帧画面
pub trait Renderer {
    fn render(&mut self, frame: &FrameInfo, spectrum: Option<&Spectrum>) -> io::Result<()>;

    /// 渲染器请求结束会话（如按下 q）
    fn should_quit(&self) -> bool {
        false
    }
}

/// 会话报告
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub frames_rendered: u64,
    /// 没有频谱的帧
    pub frames_skipped: u64,
    pub final_position: u64,
    pub total_frames: u64,
    pub rate: u32,
    /// 是否被宿主中断
    pub interrupted: bool,
    pub sink: StatsReport,
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Session: {} frames rendered ({} without spectrum){}",
            self.frames_rendered,
            self.frames_skipped,
            if self.interrupted { ", interrupted" } else { "" }
        )?;
        writeln!(
            f,
            "Position: {:.2} / {:.2} s",
            self.final_position as f64 / self.rate as f64,
            self.total_frames as f64 / self.rate as f64
        )?;
        writeln!(f)?;
        write!(f, "{}", self.sink)
    }
}

/// 播放 + 可视化同步循环
pub struct SyncLoop<R: Renderer> {
    buffer: SampleBuffer,
    sink: AudioSink,
    analyzer: SpectrumAnalyzer,
    renderer: R,
    stop: Arc<AtomicBool>,
    frames_rendered: u64,
    frames_skipped: u64,
}

impl<R: Renderer> SyncLoop<R> {
    pub fn new(buffer: SampleBuffer, sink: AudioSink, renderer: R) -> Self {
        let analyzer = SpectrumAnalyzer::new(buffer.nchannel());
        Self {
            buffer,
            sink,
            analyzer,
            renderer,
            stop: Arc::new(AtomicBool::new(false)),
            frames_rendered: 0,
            frames_skipped: 0,
        }
    }

    /// 按缓冲区格式打开输出设备并创建循环
    pub fn open(
        buffer: SampleBuffer,
        device_selector: Option<&str>,
        config: &EngineConfig,
        renderer: R,
    ) -> Result<Self, EngineError> {
        let sink = AudioSink::open(buffer.format(), device_selector, &config.sink)?;
        Ok(Self::new(buffer, sink, renderer))
    }

    /// 停止标志，宿主置 true 后循环在下一帧结束
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// 执行一帧
    pub fn advance(&mut self) -> Result<(), EngineError> {
        if self.is_finished() {
            return Ok(());
        }

        let position = self.sink.position();
        let info = FrameInfo {
            frame: self.frames_rendered,
            position,
            total_frames: self.buffer.total_frames() as u64,
            rate: self.sink.negotiated_rate(),
            underruns: self.sink.stats().underrun_count(),
            state: self.sink.state(),
        };

        let spectrum = self.analyzer.analyze(&self.buffer, position);
        if spectrum.is_none() {
            self.frames_skipped += 1;
        }
        self.renderer.render(&info, spectrum)?;
        self.frames_rendered += 1;

        if self.renderer.should_quit() {
            log::info!("Renderer requested quit at frame {}", position);
            self.stop.store(true, Ordering::SeqCst);
        }

        self.sink.feed(&self.buffer)?;
        Ok(())
    }

    /// 宿主请求停止，或全部数据已提交
    pub fn is_finished(&self) -> bool {
        self.stop.load(Ordering::SeqCst) || self.sink.is_drained()
    }

    /// 以固定帧间隔驱动循环直到结束
    pub fn run(&mut self, frame_interval: Duration) -> Result<(), EngineError> {
        while !self.is_finished() {
            let started = Instant::now();
            self.advance()?;
            if let Some(rest) = frame_interval.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }
        Ok(())
    }

    /// 结束会话：排空并关闭设备，返回报告
    pub fn finish(mut self) -> Result<SessionReport, EngineError> {
        let interrupted = self.stop.load(Ordering::SeqCst) && !self.sink.is_drained();
        self.sink.close()?;

        let report = SessionReport {
            frames_rendered: self.frames_rendered,
            frames_skipped: self.frames_skipped,
            final_position: self.sink.position(),
            total_frames: self.buffer.total_frames() as u64,
            rate: self.sink.negotiated_rate(),
            interrupted,
            sink: self.sink.report(),
        };
        log::debug!(
            "Session finished after {} frames, {} without spectrum",
            report.frames_rendered,
            report.frames_skipped
        );
        Ok(report)
    }

    pub fn sink(&self) -> &AudioSink {
        &self.sink
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }
}
