//! PCM 设备抽象
//!
//! 两种结构不同的数据提交方式：
//! - Push：直接写入交织样本（writei）
//! - Mapped：先认领设备内存区域，拷贝后提交（mmap begin/commit）
//!
//! 两者共享 PcmDevice 的状态查询 / prepare / start / drain / close 接口，
//! AudioSink 的状态机只针对这些接口编写一次。

use thiserror::Error;

/// 访问方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AccessStyle {
    /// 直接交织写入，设备在首次写入后自动启动
    #[default]
    Push,
    /// 内存映射拉取，需要显式 start
    Mapped,
}

/// 设备状态（与 ALSA 的 snd_pcm_state_t 对应）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceState {
    Open,
    Setup,
    Prepared,
    Running,
    Xrun,
    Draining,
    Paused,
    Suspended,
    Disconnected,
}

/// 设备调用错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// 设备队列已满（EAGAIN），稍后重试
    #[error("device queue full")]
    WouldBlock,
    /// 缓冲区耗尽（EPIPE / ESTRPIPE）
    #[error("buffer underrun")]
    Xrun,
    /// 其他设备错误
    #[error("{call} failed ({code}): {message}")]
    Os {
        call: &'static str,
        code: i32,
        message: String,
    },
}

impl DeviceError {
    pub fn os(call: &'static str, code: i32, message: impl Into<String>) -> Self {
        Self::Os {
            call,
            code,
            message: message.into(),
        }
    }
}

/// 打开设备时的请求参数
#[derive(Clone, Copy, Debug)]
pub struct HwRequest {
    pub channels: u16,
    pub rate: u32,
    pub period_frames: usize,
    pub buffer_frames: usize,
    pub access: AccessStyle,
}

/// 设备实际协商的参数
///
/// 设备可能调整采样率和周期大小，必须以这里的值为准
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HwParams {
    pub channels: u16,
    pub rate: u32,
    pub period_frames: usize,
    pub buffer_frames: usize,
}

/// 已认领的映射区域
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MmapArea {
    /// 区域在设备缓冲区中的起始帧
    pub offset: usize,
    /// 实际认领的帧数（可能少于请求值）
    pub frames: usize,
}

/// 公共设备接口
pub trait PcmDevice {
    /// 协商后的硬件参数
    fn params(&self) -> HwParams;

    /// 当前设备状态
    fn state(&mut self) -> DeviceState;

    /// 重置设备内部状态，进入 Prepared
    fn prepare(&mut self) -> Result<(), DeviceError>;

    /// 显式启动
    fn start(&mut self) -> Result<(), DeviceError>;

    /// 是否支持硬件延迟查询
    fn supports_delay_query(&self) -> bool;

    /// 已提交但尚未播放出去的帧数
    fn delay(&mut self) -> Result<usize, DeviceError>;

    /// 阻塞直到已排队的音频全部播放完毕
    fn drain(&mut self) -> Result<(), DeviceError>;

    /// 释放设备
    fn close(&mut self) -> Result<(), DeviceError>;
}

/// Push 方式：直接写入
pub trait PushDevice: PcmDevice {
    /// 写入交织样本，返回实际接受的帧数
    ///
    /// 非阻塞：队列满时返回 `WouldBlock` 或部分帧数
    fn writei(&mut self, samples: &[i16]) -> Result<usize, DeviceError>;
}

/// Mapped 方式：认领 → 拷贝 → 提交
pub trait MappedDevice: PcmDevice {
    /// 当前可写帧数
    fn avail_update(&mut self) -> Result<usize, DeviceError>;

    /// 认领最多 `frames` 帧的连续区域
    fn mmap_begin(&mut self, frames: usize) -> Result<MmapArea, DeviceError>;

    /// 已认领区域对应的样本内存（长度 = frames * channels）
    fn mmap_region(&mut self, area: &MmapArea) -> &mut [i16];

    /// 提交区域，返回实际提交的帧数
    fn mmap_commit(&mut self, area: MmapArea) -> Result<usize, DeviceError>;
}

/// 按访问方式区分的设备句柄
///
/// PushStyleSink / MappedStyleSink 两个变体共享同一套状态机，
/// 只有数据拷贝方式不同
pub enum DeviceStyle {
    Push(Box<dyn PushDevice>),
    Mapped(Box<dyn MappedDevice>),
}

impl DeviceStyle {
    /// 按访问方式包装同时支持两种方式的设备
    pub fn from_device<D>(access: AccessStyle, device: D) -> Self
    where
        D: PushDevice + MappedDevice + 'static,
    {
        match access {
            AccessStyle::Push => Self::Push(Box::new(device)),
            AccessStyle::Mapped => Self::Mapped(Box::new(device)),
        }
    }

    pub fn access(&self) -> AccessStyle {
        match self {
            Self::Push(_) => AccessStyle::Push,
            Self::Mapped(_) => AccessStyle::Mapped,
        }
    }

    pub fn params(&self) -> HwParams {
        match self {
            Self::Push(dev) => dev.params(),
            Self::Mapped(dev) => dev.params(),
        }
    }

    pub fn state(&mut self) -> DeviceState {
        match self {
            Self::Push(dev) => dev.state(),
            Self::Mapped(dev) => dev.state(),
        }
    }

    pub fn prepare(&mut self) -> Result<(), DeviceError> {
        match self {
            Self::Push(dev) => dev.prepare(),
            Self::Mapped(dev) => dev.prepare(),
        }
    }

    pub fn start(&mut self) -> Result<(), DeviceError> {
        match self {
            Self::Push(dev) => dev.start(),
            Self::Mapped(dev) => dev.start(),
        }
    }

    pub fn supports_delay_query(&self) -> bool {
        match self {
            Self::Push(dev) => dev.supports_delay_query(),
            Self::Mapped(dev) => dev.supports_delay_query(),
        }
    }

    pub fn delay(&mut self) -> Result<usize, DeviceError> {
        match self {
            Self::Push(dev) => dev.delay(),
            Self::Mapped(dev) => dev.delay(),
        }
    }

    pub fn drain(&mut self) -> Result<(), DeviceError> {
        match self {
            Self::Push(dev) => dev.drain(),
            Self::Mapped(dev) => dev.drain(),
        }
    }

    pub fn close(&mut self) -> Result<(), DeviceError> {
        match self {
            Self::Push(dev) => dev.close(),
            Self::Mapped(dev) => dev.close(),
        }
    }
}

/// 测试用的脚本化设备
///
/// 可以限制每次接受的帧数、注入 xrun / prepare 失败，
/// 并记录所有写入的样本，便于检查游标行为
#[cfg(test)]
pub(crate) mod fake {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use super::*;

    /// 设备侧可观测的记录（测试与设备共享）
    #[derive(Debug, Default)]
    pub struct FakeLog {
        /// 按顺序写入设备的全部样本
        pub written: Vec<i16>,
        pub prepare_calls: usize,
        pub start_calls: usize,
        pub drained: bool,
        pub closed: usize,
        /// delay() 返回值（帧）
        pub delay: usize,
    }

    /// 单次传输的脚本结果
    #[derive(Clone, Debug)]
    pub enum Step {
        /// 最多接受 n 帧
        Accept(usize),
        WouldBlock,
        Xrun,
    }

    pub struct FakeDevice {
        params: HwParams,
        state: DeviceState,
        script: VecDeque<Step>,
        /// 每次传输的默认上限
        cap: usize,
        pub delay_query: bool,
        pub fail_prepare: bool,
        pending: Vec<i16>,
        log: Rc<RefCell<FakeLog>>,
    }

    impl FakeDevice {
        pub fn new(channels: u16, rate: u32, period_frames: usize) -> Self {
            Self {
                params: HwParams {
                    channels,
                    rate,
                    period_frames,
                    buffer_frames: period_frames * 4,
                },
                state: DeviceState::Prepared,
                script: VecDeque::new(),
                cap: usize::MAX,
                delay_query: false,
                fail_prepare: false,
                pending: Vec::new(),
                log: Rc::new(RefCell::new(FakeLog::default())),
            }
        }

        pub fn with_cap(mut self, cap: usize) -> Self {
            self.cap = cap;
            self
        }

        pub fn with_state(mut self, state: DeviceState) -> Self {
            self.state = state;
            self
        }

        pub fn with_rate(mut self, rate: u32) -> Self {
            self.params.rate = rate;
            self
        }

        pub fn with_script(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
            self.script.extend(steps);
            self
        }

        pub fn log(&self) -> Rc<RefCell<FakeLog>> {
            Rc::clone(&self.log)
        }

        fn next_limit(&mut self) -> Result<usize, DeviceError> {
            match self.script.pop_front() {
                Some(Step::Accept(n)) => Ok(n.min(self.cap)),
                Some(Step::WouldBlock) => Err(DeviceError::WouldBlock),
                Some(Step::Xrun) => {
                    self.state = DeviceState::Xrun;
                    Err(DeviceError::Xrun)
                }
                None => Ok(self.cap),
            }
        }

        fn accept(&mut self, samples: &[i16], limit: usize) -> usize {
            let ch = self.params.channels as usize;
            let frames = (samples.len() / ch).min(limit);
            self.log
                .borrow_mut()
                .written
                .extend_from_slice(&samples[..frames * ch]);
            frames
        }
    }

    impl PcmDevice for FakeDevice {
        fn params(&self) -> HwParams {
            self.params
        }

        fn state(&mut self) -> DeviceState {
            self.state
        }

        fn prepare(&mut self) -> Result<(), DeviceError> {
            self.log.borrow_mut().prepare_calls += 1;
            if self.fail_prepare {
                return Err(DeviceError::os("prepare", -5, "injected failure"));
            }
            self.state = DeviceState::Prepared;
            Ok(())
        }

        fn start(&mut self) -> Result<(), DeviceError> {
            self.log.borrow_mut().start_calls += 1;
            self.state = DeviceState::Running;
            Ok(())
        }

        fn supports_delay_query(&self) -> bool {
            self.delay_query
        }

        fn delay(&mut self) -> Result<usize, DeviceError> {
            Ok(self.log.borrow().delay)
        }

        fn drain(&mut self) -> Result<(), DeviceError> {
            self.log.borrow_mut().drained = true;
            self.state = DeviceState::Setup;
            Ok(())
        }

        fn close(&mut self) -> Result<(), DeviceError> {
            self.log.borrow_mut().closed += 1;
            Ok(())
        }
    }

    impl PushDevice for FakeDevice {
        fn writei(&mut self, samples: &[i16]) -> Result<usize, DeviceError> {
            let limit = self.next_limit()?;
            let frames = self.accept(samples, limit);
            if frames > 0 && self.state == DeviceState::Prepared {
                // push 方式首次写入即自动启动
                self.state = DeviceState::Running;
            }
            Ok(frames)
        }
    }

    impl MappedDevice for FakeDevice {
        fn avail_update(&mut self) -> Result<usize, DeviceError> {
            if self.state == DeviceState::Xrun {
                return Err(DeviceError::Xrun);
            }
            Ok(self.params.buffer_frames)
        }

        fn mmap_begin(&mut self, frames: usize) -> Result<MmapArea, DeviceError> {
            let limit = self.next_limit()?;
            let frames = frames.min(limit);
            self.pending = vec![0; frames * self.params.channels as usize];
            Ok(MmapArea { offset: 0, frames })
        }

        fn mmap_region(&mut self, area: &MmapArea) -> &mut [i16] {
            let n = area.frames * self.params.channels as usize;
            &mut self.pending[..n]
        }

        fn mmap_commit(&mut self, area: MmapArea) -> Result<usize, DeviceError> {
            let pending = std::mem::take(&mut self.pending);
            Ok(self.accept(&pending, area.frames))
        }
    }
}
