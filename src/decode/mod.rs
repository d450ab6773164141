//! 音频解码模块

mod decoder;

use std::path::Path;

pub use decoder::{AudioDecoder, AudioInfo, DecodeError};

use crate::audio::SampleBuffer;

/// 打开并完整解码音频文件
pub fn load<P: AsRef<Path>>(path: P) -> Result<SampleBuffer, DecodeError> {
    AudioDecoder::open(path)?.decode_all()
}
