//! TUI 状态
//!
//! 频谱在这里折叠成屏幕宽度的频带，并做峰值衰减：
//! 没有新频谱的帧（窗口越过缓冲区末尾）显示上一帧逐渐回落

use crate::engine::FrameInfo;
use crate::spectrum::{Spectrum, FFT_BUCKETS};

/// 每帧峰值衰减系数
pub const PEAK_DECAY: f32 = 0.85;

/// 按频带折叠后的幅度（每声道一组）
#[derive(Debug, Default)]
pub struct SpectrumBars {
    channels: Vec<Vec<f32>>,
}

impl SpectrumBars {
    pub fn new() -> Self {
        Self::default()
    }

    /// 用新频谱更新；`None` 时只做衰减
    pub fn update(&mut self, spectrum: Option<&Spectrum>, nbands: usize) {
        let nbands = nbands.clamp(1, FFT_BUCKETS);

        let Some(spectrum) = spectrum else {
            for bands in &mut self.channels {
                bands.iter_mut().for_each(|v| *v *= PEAK_DECAY);
            }
            return;
        };

        if self.channels.len() != spectrum.nchannel() {
            self.channels = vec![Vec::new(); spectrum.nchannel()];
        }

        for (bands, magnitudes) in self.channels.iter_mut().zip(spectrum.channels()) {
            if bands.len() != nbands {
                *bands = vec![0.0; nbands];
            }
            for (b, value) in bands.iter_mut().enumerate() {
                let start = b * magnitudes.len() / nbands;
                let end = ((b + 1) * magnitudes.len() / nbands).max(start + 1);
                let peak = magnitudes[start..end].iter().copied().fold(0.0f32, f32::max);
                *value = peak.max(*value * PEAK_DECAY);
            }
        }
    }

    pub fn nchannel(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        self.channels.get(index).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// TUI 应用状态
pub struct App {
    /// 曲目名
    pub title: String,
    /// 设备描述
    pub device: String,
    pub bars: SpectrumBars,
    /// 最近一帧的信息
    pub frame: Option<FrameInfo>,
    /// 是否应该退出
    pub should_quit: bool,
}

impl App {
    pub fn new(title: String, device: String) -> Self {
        Self {
            title,
            device,
            bars: SpectrumBars::new(),
            frame: None,
            should_quit: false,
        }
    }

    pub fn update(&mut self, frame: &FrameInfo, spectrum: Option<&Spectrum>, nbands: usize) {
        self.frame = Some(*frame);
        self.bars.update(spectrum, nbands);
    }
}

/// 秒数格式化为 mm:ss.ss
pub fn format_time(secs: f64) -> String {
    let mins = (secs / 60.0) as u32;
    format!("{:02}:{:05.2}", mins, secs % 60.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleBuffer;
    use crate::spectrum::{SpectrumAnalyzer, FFT_SIZE};
    use approx::assert_abs_diff_eq;

    fn dc_spectrum(level: i16) -> (SpectrumAnalyzer, SampleBuffer) {
        let buffer = SampleBuffer::new(vec![level; FFT_SIZE * 2], 2, 48000).unwrap();
        (SpectrumAnalyzer::new(2), buffer)
    }

    #[test]
    fn test_fold_takes_band_max() {
        let (mut analyzer, buffer) = dc_spectrum(8000);
        let spectrum = analyzer.analyze(&buffer, 0).unwrap();
        let dc = spectrum.channel(0).unwrap()[0];

        let mut bars = SpectrumBars::new();
        bars.update(Some(spectrum), 10);
        assert_eq!(bars.nchannel(), 2);
        assert_eq!(bars.channel(0).len(), 10);
        // 直流落在第一个频带
        assert_abs_diff_eq!(bars.channel(0)[0], dc);
        assert!(bars.channel(1)[1..].iter().all(|&v| v < 1e-4));
    }

    #[test]
    fn test_missing_spectrum_decays() {
        let (mut analyzer, buffer) = dc_spectrum(8000);
        let mut bars = SpectrumBars::new();
        bars.update(analyzer.analyze(&buffer, 0), 4);
        let before = bars.channel(0)[0];

        bars.update(None, 4);
        assert_abs_diff_eq!(bars.channel(0)[0], before * PEAK_DECAY);
    }

    #[test]
    fn test_peak_falls_gradually() {
        let mut bars = SpectrumBars::new();
        let (mut analyzer, loud) = dc_spectrum(16000);
        bars.update(analyzer.analyze(&loud, 0), 4);
        let peak = bars.channel(0)[0];

        let (mut analyzer, quiet) = dc_spectrum(0);
        bars.update(analyzer.analyze(&quiet, 0), 4);
        assert_abs_diff_eq!(bars.channel(0)[0], peak * PEAK_DECAY);
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0.0), "00:00.00");
        assert_eq!(format_time(75.5), "01:15.50");
    }
}
