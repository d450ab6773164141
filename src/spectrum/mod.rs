//! 频谱提取
//!
//! 在播放位置处为每个声道截取 W 帧，做前向 FFT（rustfft），
//! 输出 W/2 + 1 个频点的幅度。
//!
//! 幅度归一化：`|X[k]| * 2 / W / NORMALIZATION_DIVISOR`，
//! 直流和 Nyquist 频点再减半。满幅正弦约对应 1.4。

use std::sync::Arc;

use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

use crate::audio::SampleBuffer;

/// 窗口长度的对数
pub const FFT_LOG_SIZE: u32 = 10;

/// 窗口长度（帧）
pub const FFT_SIZE: usize = 1 << FFT_LOG_SIZE;

/// 每声道输出的频点数
pub const FFT_BUCKETS: usize = FFT_SIZE / 2 + 1;

/// 幅度归一化除数（0.7 * 2^15）
pub const NORMALIZATION_DIVISOR: f32 = 0.7 * 32768.0;

/// 一帧的频谱结果
#[derive(Debug, Clone)]
pub struct Spectrum {
    channels: Vec<Vec<f32>>,
    position: u64,
}

impl Spectrum {
    fn new(nchannel: usize) -> Self {
        Self {
            channels: vec![vec![0.0; FFT_BUCKETS]; nchannel],
            position: 0,
        }
    }

    pub fn nchannel(&self) -> usize {
        self.channels.len()
    }

    /// 某个声道的 FFT_BUCKETS 个幅度
    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    pub fn channels(&self) -> impl Iterator<Item = &[f32]> {
        self.channels.iter().map(Vec::as_slice)
    }

    /// 窗口起始帧
    pub fn position(&self) -> u64 {
        self.position
    }

    /// 频点中心频率（Hz）
    pub fn bucket_frequency(bucket: usize, rate: u32) -> f32 {
        bucket as f32 * rate as f32 / FFT_SIZE as f32
    }
}

/// 频谱分析器
///
/// 复数缓冲区和输出在每帧之间复用，分析过程不分配内存
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    /// 变换输入输出（原地）
    data: Vec<Complex32>,
    /// rustfft 内部工作区
    scratch: Vec<Complex32>,
    spectrum: Spectrum,
}

impl SpectrumAnalyzer {
    pub fn new(nchannel: u16) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);
        let scratch = vec![Complex32::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        Self {
            fft,
            data: vec![Complex32::new(0.0, 0.0); FFT_SIZE],
            scratch,
            spectrum: Spectrum::new(nchannel as usize),
        }
    }

    /// 计算 `position` 处的频谱
    ///
    /// 剩余帧数不足一个窗口时返回 `None`
    pub fn analyze(&mut self, buffer: &SampleBuffer, position: u64) -> Option<&Spectrum> {
        let total = buffer.total_frames() as u64;
        if position.saturating_add(FFT_SIZE as u64) > total {
            return None;
        }

        let nchannel = buffer.format().samples_per_frame();
        if self.spectrum.nchannel() != nchannel {
            self.spectrum = Spectrum::new(nchannel);
        }

        let window = buffer.frames(position as usize, FFT_SIZE);
        let scale = 2.0 / FFT_SIZE as f32 / NORMALIZATION_DIVISOR;

        for (ch, magnitudes) in self.spectrum.channels.iter_mut().enumerate() {
            for (slot, frame) in self.data.iter_mut().zip(window.chunks_exact(nchannel)) {
                *slot = Complex32::new(frame[ch] as f32, 0.0);
            }
            self.fft.process_with_scratch(&mut self.data, &mut self.scratch);

            for (m, x) in magnitudes.iter_mut().zip(&self.data) {
                *m = x.norm() * scale;
            }
            magnitudes[0] *= 0.5;
            magnitudes[FFT_SIZE / 2] *= 0.5;
        }

        self.spectrum.position = position;
        Some(&self.spectrum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sine(frames: usize, nchannel: u16, rate: u32, freq: f32, amplitude: f32) -> SampleBuffer {
        let mut samples = Vec::with_capacity(frames * nchannel as usize);
        for i in 0..frames {
            let t = i as f32 / rate as f32;
            let s = (amplitude * (2.0 * std::f32::consts::PI * freq * t).sin()).round() as i16;
            // 只有第一个声道有信号
            samples.push(s);
            samples.extend(std::iter::repeat(0).take(nchannel as usize - 1));
        }
        SampleBuffer::new(samples, nchannel, rate).unwrap()
    }

    fn argmax(values: &[f32]) -> usize {
        values
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap()
    }

    #[test]
    fn test_stereo_scenario() {
        // 2 声道 48 kHz，96000 个样本 = 48000 帧
        let buffer = SampleBuffer::new(vec![0; 96000], 2, 48000).unwrap();
        let mut analyzer = SpectrumAnalyzer::new(2);

        let spectrum = analyzer.analyze(&buffer, 0).unwrap();
        assert_eq!(spectrum.nchannel(), 2);
        assert!(spectrum.channels().all(|c| c.len() == 513));

        assert!(analyzer.analyze(&buffer, 95800).is_none());
    }

    #[test]
    fn test_window_boundary() {
        let buffer = SampleBuffer::new(vec![0; 3000], 1, 44100).unwrap();
        let mut analyzer = SpectrumAnalyzer::new(1);
        let last = (3000 - FFT_SIZE) as u64;

        assert!(analyzer.analyze(&buffer, last).is_some());
        assert!(analyzer.analyze(&buffer, last + 1).is_none());
        assert!(analyzer.analyze(&buffer, u64::MAX).is_none());
    }

    #[test]
    fn test_sine_peaks_at_expected_bucket() {
        // 3000 Hz @ 48 kHz → 3000 * 1024 / 48000 = 64
        let buffer = sine(4096, 2, 48000, 3000.0, 16384.0);
        let mut analyzer = SpectrumAnalyzer::new(2);
        let spectrum = analyzer.analyze(&buffer, 100).unwrap();

        let left = spectrum.channel(0).unwrap();
        assert_eq!(argmax(left), 64);
        assert_abs_diff_eq!(left[64], 16384.0 / NORMALIZATION_DIVISOR, epsilon = 1e-2);
        assert_abs_diff_eq!(Spectrum::bucket_frequency(64, 48000), 3000.0);

        // 右声道静音
        let right = spectrum.channel(1).unwrap();
        assert!(right.iter().all(|&m| m == 0.0));
        assert_eq!(spectrum.position(), 100);
    }

    #[test]
    fn test_dc_bucket_is_halved() {
        let c = 1000i16;
        let buffer = SampleBuffer::new(vec![c; FFT_SIZE], 1, 48000).unwrap();
        let mut analyzer = SpectrumAnalyzer::new(1);
        let spectrum = analyzer.analyze(&buffer, 0).unwrap();
        let mags = spectrum.channel(0).unwrap();

        // 通用公式给出 2c / DIV，直流减半后为 c / DIV
        assert_abs_diff_eq!(mags[0], c as f32 / NORMALIZATION_DIVISOR, epsilon = 1e-4);
        assert!(mags[1..].iter().all(|&m| m < 1e-4));
    }

    #[test]
    fn test_nyquist_bucket_is_halved() {
        // +c, -c 交替：能量全部落在 W/2
        let c = 1000i16;
        let samples: Vec<i16> = (0..FFT_SIZE).map(|i| if i % 2 == 0 { c } else { -c }).collect();
        let buffer = SampleBuffer::new(samples, 1, 48000).unwrap();
        let mut analyzer = SpectrumAnalyzer::new(1);
        let mags = analyzer.analyze(&buffer, 0).unwrap().channel(0).unwrap();

        assert_abs_diff_eq!(mags[FFT_SIZE / 2], c as f32 / NORMALIZATION_DIVISOR, epsilon = 1e-4);
        assert!(mags[..FFT_SIZE / 2].iter().all(|&m| m < 1e-4));
    }

    /// 直接按定义计算的 DFT 幅度，同样的归一化
    fn naive_magnitudes(samples: &[i16]) -> Vec<f32> {
        let n = samples.len();
        (0..=n / 2)
            .map(|k| {
                let (re, im) = samples.iter().enumerate().fold((0.0f64, 0.0f64), |acc, (t, &x)| {
                    let angle = -2.0 * std::f64::consts::PI * ((k * t) % n) as f64 / n as f64;
                    (acc.0 + x as f64 * angle.cos(), acc.1 + x as f64 * angle.sin())
                });
                let mut m = (re.hypot(im) * 2.0 / n as f64 / NORMALIZATION_DIVISOR as f64) as f32;
                if k == 0 || k == n / 2 {
                    m *= 0.5;
                }
                m
            })
            .collect()
    }

    #[test]
    fn test_matches_naive_dft() {
        let samples: Vec<i16> = (0..FFT_SIZE)
            .map(|i| {
                let x = i as f32;
                ((x * 0.37).sin() * 9000.0 + (x * 1.9).cos() * 3000.0 + 500.0) as i16
            })
            .collect();
        let expected = naive_magnitudes(&samples);

        let buffer = SampleBuffer::new(samples, 1, 48000).unwrap();
        let mut analyzer = SpectrumAnalyzer::new(1);
        let mags = analyzer.analyze(&buffer, 0).unwrap().channel(0).unwrap();

        assert_eq!(mags.len(), expected.len());
        for (got, want) in mags.iter().zip(&expected) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_channel_count_follows_buffer() {
        let mut analyzer = SpectrumAnalyzer::new(2);
        let mono = SampleBuffer::new(vec![0; FFT_SIZE], 1, 48000).unwrap();
        assert_eq!(analyzer.analyze(&mono, 0).unwrap().nchannel(), 1);
    }
}
