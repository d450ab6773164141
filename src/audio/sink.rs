//! 音频输出 Sink
//!
//! 在单一驱动线程上向设备喂数据：
//! - 非阻塞 feed：设备队列满时立即返回，不拖慢渲染循环
//! - underrun 恢复：重新 prepare 后从当前游标继续，不回退也不跳过
//! - 播放位置：支持延迟查询时为"已提交 - 硬件延迟"，否则为已提交帧数
//!
//! Push / Mapped 两种设备共享同一套状态机，区别只在 `transfer` 中

use thiserror::Error;

use super::device::{
    AccessStyle, DeviceError, DeviceState, DeviceStyle, HwParams, HwRequest, MappedDevice,
    MmapArea,
};
use super::format::{SampleBuffer, StreamFormat};
use super::null::NullDevice;
use super::stats::{SinkStats, StatsReport};

/// Sink 配置
#[derive(Clone, Debug)]
pub struct SinkConfig {
    /// 设备访问方式
    pub access: AccessStyle,
    /// 每次传输的帧数（设备可能调整）
    pub period_frames: usize,
    /// 设备缓冲区包含的周期数
    pub buffer_periods: usize,
    /// 单次 feed 最多传输的周期数
    pub max_periods_per_feed: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            access: AccessStyle::Push,
            period_frames: 1024,
            buffer_periods: 4,
            max_periods_per_feed: 8,
        }
    }
}

/// 设备缓冲区上限（帧）
pub const MAX_BUFFER_FRAMES: usize = 1 << 22;

/// 平台默认设备名
const PLATFORM_DEFAULT_DEVICE: &str = "default";

/// Sink 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    /// 设备已配置但尚未 prepare，第一次 feed 时完成
    Uninitialized,
    Prepared,
    Running,
    Underrun,
    /// 恢复失败，会话必须终止
    Fatal,
    Closed,
}

/// Sink 错误
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("audio format not supported: {0}")]
    FormatUnsupported(String),
    #[error("fatal audio device error: {0}")]
    FatalDevice(#[source] DeviceError),
    #[error("audio sink is closed")]
    Closed,
}

/// 音频输出
pub struct AudioSink {
    device: DeviceStyle,
    format: StreamFormat,
    params: HwParams,
    state: SinkState,
    /// 已提交给设备的帧数
    cursor: usize,
    /// 第一次 feed 时记录
    total_frames: Option<usize>,
    last_position: u64,
    supports_delay_query: bool,
    /// 自上次 prepare 以来排队的帧数（mapped 方式据此决定何时 start）
    queued_since_prepare: usize,
    max_periods_per_feed: usize,
    fatal: Option<DeviceError>,
    stats: SinkStats,
}

impl AudioSink {
    /// 按设备选择器打开输出
    ///
    /// - `None`：平台默认设备（Linux 上为 ALSA `default`）
    /// - `"null"`：模拟设备；`"null:nodelay"`：不支持延迟查询的模拟设备
    /// - 其他：ALSA PCM 名称
    pub fn open(
        format: StreamFormat,
        device_selector: Option<&str>,
        config: &SinkConfig,
    ) -> Result<Self, SinkError> {
        if format.nchannel == 0 || format.rate == 0 {
            return Err(SinkError::FormatUnsupported(format!(
                "{} channels @ {} Hz",
                format.nchannel, format.rate
            )));
        }

        let period = config.period_frames.max(1);
        let buffer_frames = period
            .checked_mul(config.buffer_periods.max(2))
            .filter(|&frames| frames <= MAX_BUFFER_FRAMES)
            .ok_or_else(|| {
                SinkError::FormatUnsupported(format!(
                    "buffer of {} periods x {} frames is too large",
                    config.buffer_periods, period
                ))
            })?;
        let request = HwRequest {
            channels: format.nchannel,
            rate: format.rate,
            period_frames: period,
            buffer_frames,
            access: config.access,
        };

        let device = open_device(device_selector, &request)?;
        Self::with_device(device, format, config)
    }

    /// 使用已打开的设备创建 Sink
    ///
    /// 设备声道数必须与流一致；采样率以设备协商值为准
    pub fn with_device(
        mut device: DeviceStyle,
        format: StreamFormat,
        config: &SinkConfig,
    ) -> Result<Self, SinkError> {
        let params = device.params();

        if params.channels != format.nchannel {
            return Err(SinkError::FormatUnsupported(format!(
                "requested {} channels, device negotiated {}",
                format.nchannel, params.channels
            )));
        }
        if params.rate == 0 {
            return Err(SinkError::FormatUnsupported("device reported 0 Hz".to_string()));
        }
        if params.rate != format.rate {
            log::warn!(
                "Device rate {} Hz differs from stream rate {} Hz, positions follow the device clock",
                params.rate,
                format.rate
            );
        }

        let state = match device.state() {
            DeviceState::Prepared | DeviceState::Running => SinkState::Prepared,
            DeviceState::Open | DeviceState::Setup => SinkState::Uninitialized,
            other => {
                return Err(SinkError::DeviceUnavailable(format!(
                    "device in state {:?}",
                    other
                )));
            }
        };

        let supports_delay_query = device.supports_delay_query();
        log::info!(
            "Audio sink ready: {:?} access, {}ch {}Hz, period {} frames, position from {}",
            device.access(),
            params.channels,
            params.rate,
            params.period_frames,
            if supports_delay_query {
                "hardware delay"
            } else {
                "submitted frames"
            }
        );

        Ok(Self {
            device,
            format,
            params,
            state,
            cursor: 0,
            total_frames: None,
            last_position: 0,
            supports_delay_query,
            queued_since_prepare: 0,
            max_periods_per_feed: config.max_periods_per_feed.max(1),
            fatal: None,
            stats: SinkStats::new(),
        })
    }

    /// 推送下一段未播放的数据，返回设备接受的帧数
    ///
    /// 非阻塞：设备队列满时返回 0 或部分帧数，剩余部分在下次调用时重试
    pub fn feed(&mut self, buffer: &SampleBuffer) -> Result<usize, SinkError> {
        match self.state {
            SinkState::Closed => return Err(SinkError::Closed),
            SinkState::Fatal => return Err(self.fatal_error()),
            _ => {}
        }
        if buffer.nchannel() != self.format.nchannel {
            return Err(SinkError::FormatUnsupported(format!(
                "buffer has {} channels, sink was opened for {}",
                buffer.nchannel(),
                self.format.nchannel
            )));
        }

        let total = buffer.total_frames();
        self.total_frames = Some(total);
        self.stats.record_feed();

        if self.cursor >= total {
            return Ok(0);
        }

        self.ensure_ready()?;

        let period = self.params.period_frames.max(1);
        let mut fed = 0;
        for _ in 0..self.max_periods_per_feed {
            let offered = period.min(total - self.cursor);
            if offered == 0 {
                break;
            }
            let accepted = self.transfer_with_recovery(buffer, offered)?;
            self.stats.record_transfer(offered, accepted);
            self.advance(accepted);
            fed += accepted;
            if accepted < offered {
                break;
            }
        }

        self.maybe_start()?;
        Ok(fed)
    }

    /// 当前播放位置（帧）
    ///
    /// 单调不减，不超过总帧数
    pub fn position(&mut self) -> u64 {
        let submitted = self.cursor as u64;
        let estimate = match self.state {
            SinkState::Closed => submitted,
            SinkState::Fatal => self.last_position,
            _ if self.supports_delay_query => match self.device.delay() {
                Ok(delay) => {
                    self.stats.record_delay(delay);
                    submitted.saturating_sub(delay as u64)
                }
                // xrun：已提交的帧都已播放完
                Err(DeviceError::Xrun) => submitted,
                Err(e) => {
                    log::debug!("Delay query failed: {}", e);
                    self.last_position
                }
            },
            _ => submitted,
        };

        let total = self.total_frames.map_or(submitted, |t| t as u64);
        let position = estimate.max(self.last_position).min(total);
        self.last_position = position;
        position
    }

    /// 播放位置（秒，按设备实际采样率换算）
    pub fn position_secs(&mut self) -> f64 {
        self.position() as f64 / self.params.rate as f64
    }

    /// 所有数据是否已提交
    ///
    /// 注意：只表示提交完成，最后一个周期可能仍在设备中播放
    pub fn is_drained(&self) -> bool {
        self.total_frames.is_some_and(|total| self.cursor >= total)
    }

    /// 播放完已排队的音频后释放设备
    ///
    /// 可重复调用
    pub fn close(&mut self) -> Result<(), SinkError> {
        if self.state == SinkState::Closed {
            return Ok(());
        }
        // Fatal 不再 drain；Uninitialized 没有排队的数据
        let needs_drain = !matches!(self.state, SinkState::Fatal | SinkState::Uninitialized);
        self.state = SinkState::Closed;

        let mut result = Ok(());
        if needs_drain {
            // mapped 方式：已排队但尚未启动的帧需要先 start，否则 drain 播放不到
            if self.device.access() == AccessStyle::Mapped
                && self.queued_since_prepare > 0
                && self.device.state() == DeviceState::Prepared
            {
                result = self.device.start();
            }
            if result.is_ok() {
                result = match self.device.drain() {
                    // 设备已经播空，没有需要等待的数据
                    Err(DeviceError::Xrun) => Ok(()),
                    other => other,
                };
            }
        }
        let closed = self.device.close();

        log::info!(
            "Audio sink closed: {} of {} frames submitted, {} underruns",
            self.cursor,
            self.total_frames.unwrap_or(0),
            self.stats.underrun_count()
        );

        result.and(closed).map_err(SinkError::FatalDevice)
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    /// 已提交帧数
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn access(&self) -> AccessStyle {
        self.device.access()
    }

    /// 设备实际协商的参数
    pub fn params(&self) -> HwParams {
        self.params
    }

    /// 设备实际采样率
    pub fn negotiated_rate(&self) -> u32 {
        self.params.rate
    }

    pub fn supports_delay_query(&self) -> bool {
        self.supports_delay_query
    }

    pub fn stats(&self) -> &SinkStats {
        &self.stats
    }

    pub fn report(&self) -> StatsReport {
        self.stats.report(self.params.period_frames, self.params.rate)
    }

    fn fatal_error(&self) -> SinkError {
        let err = self
            .fatal
            .clone()
            .unwrap_or_else(|| DeviceError::os("feed", -libc::EIO, "sink failed earlier"));
        SinkError::FatalDevice(err)
    }

    /// 进入 Fatal 状态
    fn fail(&mut self, err: DeviceError) -> SinkError {
        log::error!("Audio device failed at frame {}: {}", self.cursor, err);
        self.state = SinkState::Fatal;
        self.fatal = Some(err.clone());
        SinkError::FatalDevice(err)
    }

    /// 确保设备处于可写状态
    fn ensure_ready(&mut self) -> Result<(), SinkError> {
        match self.device.state() {
            DeviceState::Prepared | DeviceState::Running => Ok(()),
            DeviceState::Xrun | DeviceState::Suspended => self.recover_underrun(),
            DeviceState::Open | DeviceState::Setup => match self.device.prepare() {
                Ok(()) => {
                    self.state = SinkState::Prepared;
                    self.queued_since_prepare = 0;
                    Ok(())
                }
                Err(e) => Err(self.fail(e)),
            },
            other => Err(self.fail(DeviceError::os(
                "state",
                -libc::EIO,
                format!("device in unexpected state {:?}", other),
            ))),
        }
    }

    /// underrun 恢复：重新 prepare，游标保持不变
    fn recover_underrun(&mut self) -> Result<(), SinkError> {
        self.state = SinkState::Underrun;
        self.stats.record_underrun();
        log::warn!("Audio underrun at frame {}, re-preparing device", self.cursor);

        match self.device.prepare() {
            Ok(()) => {
                self.stats.record_recovery();
                self.state = SinkState::Prepared;
                self.queued_since_prepare = 0;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn transfer_with_recovery(
        &mut self,
        buffer: &SampleBuffer,
        frames: usize,
    ) -> Result<usize, SinkError> {
        match self.transfer(buffer, frames) {
            Ok(n) => Ok(n),
            Err(DeviceError::WouldBlock) => {
                self.stats.record_would_block();
                Ok(0)
            }
            Err(DeviceError::Xrun) => {
                self.recover_underrun()?;
                match self.transfer(buffer, frames) {
                    Ok(n) => Ok(n),
                    Err(DeviceError::WouldBlock) => {
                        self.stats.record_would_block();
                        Ok(0)
                    }
                    // 刚 prepare 完又 xrun：留给下一次 feed 处理
                    Err(DeviceError::Xrun) => {
                        self.state = SinkState::Underrun;
                        Ok(0)
                    }
                    Err(e) => Err(self.fail(e)),
                }
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// 从游标处传输最多 `frames` 帧
    fn transfer(&mut self, buffer: &SampleBuffer, frames: usize) -> Result<usize, DeviceError> {
        let src = buffer.frames(self.cursor, frames);
        match &mut self.device {
            DeviceStyle::Push(dev) => dev.writei(src),
            DeviceStyle::Mapped(dev) => {
                mapped_transfer(dev.as_mut(), src, self.format.samples_per_frame())
            }
        }
    }

    fn advance(&mut self, frames: usize) {
        if frames == 0 {
            return;
        }
        self.cursor += frames;
        self.queued_since_prepare += frames;

        // push 方式：首次成功写入即隐式启动
        if self.device.access() == AccessStyle::Push && self.state == SinkState::Prepared {
            log::debug!("Playback started at frame {}", self.cursor - frames);
            self.state = SinkState::Running;
        }
    }

    /// mapped 方式：排队足够帧后显式启动
    fn maybe_start(&mut self) -> Result<(), SinkError> {
        if self.device.access() != AccessStyle::Mapped
            || self.state != SinkState::Prepared
            || self.queued_since_prepare == 0
        {
            return Ok(());
        }

        let threshold = self.params.period_frames.max(1);
        if self.queued_since_prepare < threshold && !self.is_drained() {
            return Ok(());
        }

        // 设备可能已按自身阈值自动启动
        if self.device.state() == DeviceState::Running {
            self.state = SinkState::Running;
            return Ok(());
        }

        match self.device.start() {
            Ok(()) => {
                log::debug!(
                    "Playback started with {} frames queued",
                    self.queued_since_prepare
                );
                self.state = SinkState::Running;
                Ok(())
            }
            Err(DeviceError::Xrun) => self.recover_underrun(),
            Err(e) => Err(self.fail(e)),
        }
    }
}

impl Drop for AudioSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("Failed to close audio sink: {}", e);
        }
    }
}

/// 认领 → 拷贝 → 提交
///
/// 认领到的帧数可能少于请求值，以认领值作为本次传输量
fn mapped_transfer(
    dev: &mut dyn MappedDevice,
    src: &[i16],
    samples_per_frame: usize,
) -> Result<usize, DeviceError> {
    let wanted = src.len() / samples_per_frame;
    let frames = wanted.min(dev.avail_update()?);
    if frames == 0 {
        return Err(DeviceError::WouldBlock);
    }

    let claimed = dev.mmap_begin(frames)?;
    let area = MmapArea {
        frames: claimed.frames.min(frames),
        ..claimed
    };
    if area.frames == 0 {
        return Err(DeviceError::WouldBlock);
    }

    let n = area.frames * samples_per_frame;
    dev.mmap_region(&area)[..n].copy_from_slice(&src[..n]);
    dev.mmap_commit(area)
}

/// 解析后的设备选择
#[derive(Debug, PartialEq, Eq)]
enum DeviceChoice<'a> {
    /// 模拟设备
    Null { delay_query: bool },
    /// 平台后端的设备名
    Platform(&'a str),
}

fn resolve_selector(selector: Option<&str>) -> DeviceChoice<'_> {
    match selector {
        Some("null:nodelay") => DeviceChoice::Null { delay_query: false },
        Some(name) if name == "null" || name.starts_with("null:") => {
            DeviceChoice::Null { delay_query: true }
        }
        Some(name) => DeviceChoice::Platform(name),
        None => DeviceChoice::Platform(PLATFORM_DEFAULT_DEVICE),
    }
}

/// 按选择器打开设备
fn open_device(selector: Option<&str>, request: &HwRequest) -> Result<DeviceStyle, SinkError> {
    match resolve_selector(selector) {
        DeviceChoice::Null { delay_query } => {
            let device = NullDevice::open(request).with_delay_query(delay_query);
            Ok(DeviceStyle::from_device(request.access, device))
        }
        DeviceChoice::Platform(name) => open_platform(name, request),
    }
}

#[cfg(target_os = "linux")]
fn open_platform(name: &str, request: &HwRequest) -> Result<DeviceStyle, SinkError> {
    use super::alsa::{AlsaDevice, AlsaOpenError};

    match AlsaDevice::open(name, request) {
        Ok(device) => Ok(DeviceStyle::from_device(request.access, device)),
        Err(AlsaOpenError::Unavailable(e)) => {
            Err(SinkError::DeviceUnavailable(format!("'{}': {}", name, e)))
        }
        Err(AlsaOpenError::Format(e)) => Err(SinkError::FormatUnsupported(format!(
            "{}ch {}Hz on '{}': {}",
            request.channels, request.rate, name, e
        ))),
    }
}

#[cfg(not(target_os = "linux"))]
fn open_platform(name: &str, _request: &HwRequest) -> Result<DeviceStyle, SinkError> {
    Err(SinkError::DeviceUnavailable(format!(
        "'{}': no audio backend on this platform, use 'null'",
        name
    )))
}
