//! 音频格式与解码后的 PCM 缓冲区
//!
//! 内部表示：16-bit 有符号整数，按声道交织（LRLRLR...）
//! 一帧 = 每个声道各一个样本

use thiserror::Error;

/// 每样本位深（固定 16-bit，不做格式协商）
pub const BITS_PER_SAMPLE: u16 = 16;

/// 缓冲区构造错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("channel count must be positive")]
    NoChannels,
    #[error("sample rate must be positive")]
    ZeroRate,
    #[error("{samples} samples is not a whole number of {nchannel}-channel frames")]
    PartialFrame { samples: usize, nchannel: u16 },
}

/// 流格式（声道数 + 采样率）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamFormat {
    pub nchannel: u16,
    pub rate: u32,
}

impl StreamFormat {
    pub fn new(nchannel: u16, rate: u32) -> Self {
        Self { nchannel, rate }
    }

    /// 每帧的样本数（= 声道数）
    #[inline]
    pub fn samples_per_frame(&self) -> usize {
        self.nchannel as usize
    }

    /// 每帧的字节数
    #[inline]
    pub fn bytes_per_frame(&self) -> usize {
        (BITS_PER_SAMPLE as usize / 8) * self.nchannel as usize
    }

    /// 帧数换算为秒
    #[inline]
    pub fn frames_to_secs(&self, frames: u64) -> f64 {
        frames as f64 / self.rate as f64
    }
}

/// 完整解码的交织 PCM 数据
///
/// 构造后不可变，播放期间由会话持有，
/// AudioSink 和 SpectrumAnalyzer 只通过只读切片访问
#[derive(Clone, Debug)]
pub struct SampleBuffer {
    samples: Vec<i16>,
    format: StreamFormat,
}

impl SampleBuffer {
    /// 创建缓冲区
    ///
    /// 样本数必须是声道数的整数倍
    pub fn new(samples: Vec<i16>, nchannel: u16, rate: u32) -> Result<Self, BufferError> {
        if nchannel == 0 {
            return Err(BufferError::NoChannels);
        }
        if rate == 0 {
            return Err(BufferError::ZeroRate);
        }
        if samples.len() % nchannel as usize != 0 {
            return Err(BufferError::PartialFrame {
                samples: samples.len(),
                nchannel,
            });
        }

        Ok(Self {
            samples,
            format: StreamFormat::new(nchannel, rate),
        })
    }

    #[inline]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    #[inline]
    pub fn format(&self) -> StreamFormat {
        self.format
    }

    #[inline]
    pub fn nchannel(&self) -> u16 {
        self.format.nchannel
    }

    #[inline]
    pub fn rate(&self) -> u32 {
        self.format.rate
    }

    /// 总帧数
    #[inline]
    pub fn total_frames(&self) -> usize {
        self.samples.len() / self.format.samples_per_frame()
    }

    /// 总时长（秒）
    pub fn duration_secs(&self) -> f64 {
        self.format.frames_to_secs(self.total_frames() as u64)
    }

    /// 从 `start` 帧开始、最多 `frames` 帧的交织样本切片
    ///
    /// 超出末尾的部分被截断
    pub fn frames(&self, start: usize, frames: usize) -> &[i16] {
        let total = self.total_frames();
        let start = start.min(total);
        let end = start.saturating_add(frames).min(total);
        let spf = self.format.samples_per_frame();
        &self.samples[start * spf..end * spf]
    }
}
