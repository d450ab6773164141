//! 音频文件解码器
//!
//! 使用 symphonia 库把整个文件解码为交织 i16 PCM
//! 支持：FLAC, WAV, AIFF, MP3
//!
//! 播放开始前一次性解码完成，播放期间不再访问文件

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer as DecodedSamples;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

use crate::audio::{BufferError, SampleBuffer};

/// 解码错误
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to open file: {0}")]
    FileOpen(#[from] std::io::Error),
    #[error("unsupported audio format")]
    UnsupportedFormat,
    #[error("no audio track found")]
    NoAudioTrack,
    #[error("failed to create decoder: {0}")]
    DecoderCreation(String),
    #[error("decode failed: {0}")]
    DecodeFailed(String),
    /// 解码中途声道数变化
    #[error("channel count changed from {expected} to {found} mid-stream")]
    ChannelChange { expected: u16, found: u16 },
    #[error("invalid decoded data: {0}")]
    Buffer(#[from] BufferError),
}

/// 音频文件信息
#[derive(Debug, Clone)]
pub struct AudioInfo {
    pub sample_rate: u32,
    pub channels: u16,
    /// 位深度（原始格式）
    pub bit_depth: Option<u32>,
    /// 总帧数（如果容器提供）
    pub total_frames: Option<u64>,
    pub duration_secs: Option<f64>,
    /// 格式名称
    pub format: String,
    /// 编解码器名称
    pub codec: String,
}

/// 音频文件解码器
pub struct AudioDecoder {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    info: AudioInfo,
}

impl AudioDecoder {
    /// 打开音频文件
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DecodeError> {
        let path = path.as_ref();

        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        // 提示文件扩展名
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|_| DecodeError::UnsupportedFormat)?;

        let reader = probed.format;
        let format_name = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|s| s.to_uppercase())
            .unwrap_or_else(|| "Unknown".to_string());

        // 第一个音频轨道
        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioTrack)?;

        let track_id = track.id;
        let codec_params = &track.codec_params;

        let sample_rate = codec_params.sample_rate.ok_or(DecodeError::NoAudioTrack)?;
        let channels = codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(2);
        let total_frames = codec_params.n_frames;
        let codec_name = symphonia::default::get_codecs()
            .get_codec(codec_params.codec)
            .map(|c| c.short_name.to_string())
            .unwrap_or_else(|| "Unknown".to_string());

        let info = AudioInfo {
            sample_rate,
            channels,
            bit_depth: codec_params.bits_per_sample,
            total_frames,
            duration_secs: total_frames.map(|f| f as f64 / sample_rate as f64),
            format: format_name,
            codec: codec_name,
        };

        let decoder = symphonia::default::get_codecs()
            .make(codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::DecoderCreation(e.to_string()))?;

        log::info!(
            "Opened {}: {} / {}, {} Hz, {} ch, {:?} bit, {:.2} s",
            path.display(),
            info.format,
            info.codec,
            info.sample_rate,
            info.channels,
            info.bit_depth,
            info.duration_secs.unwrap_or(0.0)
        );

        Ok(Self {
            reader,
            decoder,
            track_id,
            info,
        })
    }

    /// 获取音频信息
    pub fn info(&self) -> &AudioInfo {
        &self.info
    }

    /// 解码剩余全部数据
    pub fn decode_all(mut self) -> Result<SampleBuffer, DecodeError> {
        let capacity = self
            .info
            .total_frames
            .map_or(0, |f| f as usize * self.info.channels as usize);
        let mut samples: Vec<i16> = Vec::with_capacity(capacity);
        let mut scratch: Option<DecodedSamples<i16>> = None;
        let mut skipped = 0usize;

        loop {
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(DecodeError::DecodeFailed(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    // 跳过损坏的帧
                    log::debug!("Skipping corrupt packet: {}", e);
                    skipped += 1;
                    continue;
                }
                Err(e) => return Err(DecodeError::DecodeFailed(e.to_string())),
            };

            let spec = *decoded.spec();
            let found = spec.channels.count() as u16;
            if found != self.info.channels {
                return Err(DecodeError::ChannelChange {
                    expected: self.info.channels,
                    found,
                });
            }

            let frames = decoded.capacity();
            let buf = scratch.get_or_insert_with(|| DecodedSamples::new(frames as u64, spec));
            if buf.capacity() < frames * found as usize {
                *buf = DecodedSamples::new(frames as u64, spec);
            }
            buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buf.samples());
        }

        if skipped > 0 {
            log::warn!("Skipped {} corrupt packets", skipped);
        }

        let buffer = SampleBuffer::new(samples, self.info.channels, self.info.sample_rate)?;
        log::info!(
            "Decoded {} frames ({:.2} s)",
            buffer.total_frames(),
            buffer.duration_secs()
        );
        Ok(buffer)
    }
}
