//! 模拟输出设备
//!
//! 没有真实硬件时使用：用单调时钟模拟 DAC 按采样率消费帧。
//! - 支持 Push 和 Mapped 两种访问方式
//! - 队列空时报告 xrun，行为与真实设备一致
//! - 延迟查询可关闭，用于验证"已提交帧数"回退路径

use std::time::{Duration, Instant};

use super::device::{
    DeviceError, DeviceState, HwParams, HwRequest, MappedDevice, MmapArea, PcmDevice, PushDevice,
};
use super::ring_buffer::FrameRing;

/// 模拟设备
pub struct NullDevice {
    params: HwParams,
    state: DeviceState,
    ring: FrameRing,
    delay_query: bool,
    /// 上次结算时钟的时间点（仅 Running 时有效）
    last_tick: Option<Instant>,
    /// 不足一帧的剩余时间（纳秒 * rate 精度）
    carry_ns: u128,
    /// 累计播放帧数
    frames_played: u64,
}

impl NullDevice {
    /// 打开模拟设备
    ///
    /// 采样率原样接受，缓冲区向上取整到 2 的幂帧
    pub fn open(request: &HwRequest) -> Self {
        let ring = FrameRing::with_min_capacity(
            request.buffer_frames.max(request.period_frames),
            request.channels as usize,
        );
        let params = HwParams {
            channels: request.channels,
            rate: request.rate,
            period_frames: request.period_frames.min(ring.capacity()),
            buffer_frames: ring.capacity(),
        };

        log::info!(
            "Null device: {}ch {}Hz, period {} frames, buffer {} frames",
            params.channels,
            params.rate,
            params.period_frames,
            params.buffer_frames
        );

        Self {
            params,
            state: DeviceState::Prepared,
            ring,
            delay_query: true,
            last_tick: None,
            carry_ns: 0,
            frames_played: 0,
        }
    }

    /// 设置是否支持延迟查询
    pub fn with_delay_query(mut self, enabled: bool) -> Self {
        self.delay_query = enabled;
        self
    }

    /// 累计播放帧数
    pub fn frames_played(&self) -> u64 {
        self.frames_played
    }

    /// 按时钟结算已播放的帧
    fn sync_clock(&mut self) {
        if self.state != DeviceState::Running {
            return;
        }
        let now = Instant::now();
        let Some(last) = self.last_tick.replace(now) else {
            return;
        };
        let elapsed = now.duration_since(last).as_nanos() * self.params.rate as u128 + self.carry_ns;
        let frames = (elapsed / 1_000_000_000) as usize;
        self.carry_ns = elapsed % 1_000_000_000;
        self.play(frames);
    }

    /// 模拟硬件消费 `frames` 帧
    ///
    /// 队列不足时进入 Xrun
    pub(crate) fn play(&mut self, frames: usize) {
        if self.state != DeviceState::Running {
            return;
        }
        let played = self.ring.consume(frames);
        self.frames_played += played as u64;
        if played < frames {
            log::debug!("Null device ran dry after {} frames", self.frames_played);
            self.state = DeviceState::Xrun;
            self.last_tick = None;
        }
    }

    fn begin_running(&mut self) {
        self.state = DeviceState::Running;
        self.last_tick = Some(Instant::now());
        self.carry_ns = 0;
    }

    fn check_writable(&mut self) -> Result<(), DeviceError> {
        self.sync_clock();
        match self.state {
            DeviceState::Prepared | DeviceState::Running => Ok(()),
            DeviceState::Xrun => Err(DeviceError::Xrun),
            other => Err(DeviceError::os(
                "write",
                -libc::EIO,
                format!("device not ready ({:?})", other),
            )),
        }
    }

    fn queued_duration(&self) -> Duration {
        let frames = self.ring.available() as u64;
        Duration::from_nanos(frames * 1_000_000_000 / self.params.rate as u64)
    }
}

impl PcmDevice for NullDevice {
    fn params(&self) -> HwParams {
        self.params
    }

    fn state(&mut self) -> DeviceState {
        self.sync_clock();
        self.state
    }

    fn prepare(&mut self) -> Result<(), DeviceError> {
        if self.state == DeviceState::Disconnected {
            return Err(DeviceError::os("prepare", -libc::ENODEV, "device closed"));
        }
        self.ring.clear();
        self.state = DeviceState::Prepared;
        self.last_tick = None;
        Ok(())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        match self.state {
            DeviceState::Prepared => {
                self.begin_running();
                Ok(())
            }
            DeviceState::Running => Ok(()),
            other => Err(DeviceError::os(
                "start",
                -libc::EIO,
                format!("cannot start from {:?}", other),
            )),
        }
    }

    fn supports_delay_query(&self) -> bool {
        self.delay_query
    }

    fn delay(&mut self) -> Result<usize, DeviceError> {
        self.sync_clock();
        if self.state == DeviceState::Xrun {
            return Err(DeviceError::Xrun);
        }
        Ok(self.ring.available())
    }

    fn drain(&mut self) -> Result<(), DeviceError> {
        self.sync_clock();
        if self.state == DeviceState::Prepared && self.ring.available() > 0 {
            self.begin_running();
        }
        if self.state == DeviceState::Running {
            self.state = DeviceState::Draining;
            std::thread::sleep(self.queued_duration());
            self.frames_played += self.ring.available() as u64;
            self.ring.clear();
        }
        self.state = DeviceState::Setup;
        self.last_tick = None;
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.ring.clear();
        self.state = DeviceState::Disconnected;
        log::debug!("Null device closed after {} frames", self.frames_played);
        Ok(())
    }
}

impl PushDevice for NullDevice {
    fn writei(&mut self, samples: &[i16]) -> Result<usize, DeviceError> {
        self.check_writable()?;
        let frames = self.ring.write(samples);
        if frames == 0 && samples.len() >= self.params.channels as usize {
            return Err(DeviceError::WouldBlock);
        }
        if frames > 0 && self.state == DeviceState::Prepared {
            self.begin_running();
        }
        Ok(frames)
    }
}

impl MappedDevice for NullDevice {
    fn avail_update(&mut self) -> Result<usize, DeviceError> {
        self.check_writable()?;
        Ok(self.ring.free_space())
    }

    fn mmap_begin(&mut self, frames: usize) -> Result<MmapArea, DeviceError> {
        self.check_writable()?;
        let (offset, frames) = self.ring.claim(frames);
        Ok(MmapArea { offset, frames })
    }

    fn mmap_region(&mut self, area: &MmapArea) -> &mut [i16] {
        self.ring.region_mut(area.offset, area.frames)
    }

    fn mmap_commit(&mut self, area: MmapArea) -> Result<usize, DeviceError> {
        Ok(self.ring.commit(area.frames))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::AccessStyle;

    fn request(period: usize, buffer: usize) -> HwRequest {
        HwRequest {
            channels: 2,
            rate: 48000,
            period_frames: period,
            buffer_frames: buffer,
            access: AccessStyle::Push,
        }
    }

    #[test]
    fn test_push_full_queue_would_block() {
        let mut dev = NullDevice::open(&request(4, 8));
        assert_eq!(dev.params().buffer_frames, 8);

        assert_eq!(dev.writei(&[1; 20]).unwrap(), 8);
        assert_eq!(dev.state(), DeviceState::Running);
        // 时钟几乎没有前进，队列仍然是满的
        dev.last_tick = Some(Instant::now() + Duration::from_secs(3600));
        assert_eq!(dev.writei(&[1; 4]), Err(DeviceError::WouldBlock));
    }

    #[test]
    fn test_running_dry_reports_xrun() {
        let mut dev = NullDevice::open(&request(4, 8));
        dev.writei(&[0; 8]).unwrap();
        dev.play(3);
        assert_eq!(dev.state, DeviceState::Running);
        dev.play(5);
        assert_eq!(dev.state, DeviceState::Xrun);
        assert_eq!(dev.writei(&[0; 2]), Err(DeviceError::Xrun));

        dev.prepare().unwrap();
        assert_eq!(dev.state(), DeviceState::Prepared);
        assert_eq!(dev.writei(&[0; 2]).unwrap(), 1);
    }

    #[test]
    fn test_mapped_claim_is_contiguous() {
        let mut dev = NullDevice::open(&request(4, 8));
        let area = dev.mmap_begin(6).unwrap();
        assert_eq!(area, MmapArea { offset: 0, frames: 6 });
        dev.mmap_region(&area).fill(7);
        assert_eq!(dev.mmap_commit(area).unwrap(), 6);

        // mapped 方式不会自动启动
        assert_eq!(dev.state(), DeviceState::Prepared);
        dev.start().unwrap();
        dev.last_tick = Some(Instant::now() + Duration::from_secs(3600));
        dev.play(6);

        // 写位置在 6，只能认领到末尾的 2 帧
        let area = dev.mmap_begin(6).unwrap();
        assert_eq!(area, MmapArea { offset: 6, frames: 2 });
    }

    #[test]
    fn test_delay_tracks_queue() {
        let mut dev = NullDevice::open(&request(4, 8));
        dev.writei(&[0; 10]).unwrap();
        dev.last_tick = Some(Instant::now() + Duration::from_secs(3600));
        assert_eq!(dev.delay().unwrap(), 5);
        dev.play(2);
        assert_eq!(dev.delay().unwrap(), 3);
    }

    #[test]
    fn test_drain_and_close() {
        let mut dev = NullDevice::open(&request(4, 8));
        dev.writei(&[0; 8]).unwrap();
        dev.drain().unwrap();
        assert_eq!(dev.frames_played(), 4);
        assert_eq!(dev.state(), DeviceState::Setup);
        dev.close().unwrap();
        assert!(dev.prepare().is_err());
    }
}
