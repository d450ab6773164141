//! 音频输出模块
//!
//! 包含：
//! - Format: 流格式和解码后的 PCM 缓冲区
//! - Device: PCM 设备抽象（Push / Mapped 两种访问方式）
//! - Sink: 非阻塞喂数据、underrun 恢复、播放位置
//! - Null: 时钟驱动的模拟设备
//! - ALSA: libasound 后端（Linux，运行时加载）
//! - Stats: 输出统计

#[cfg(target_os = "linux")]
pub mod alsa;
pub mod device;
pub mod format;
pub mod null;
pub mod ring_buffer;
pub mod sink;
pub mod stats;

pub use device::{AccessStyle, DeviceError, DeviceState, DeviceStyle, HwParams};
pub use format::{BufferError, SampleBuffer, StreamFormat};
pub use null::NullDevice;
pub use sink::{AudioSink, SinkConfig, SinkError, SinkState};
pub use stats::{SinkStats, StatsReport};
