//! 单行状态输出（`--no-tui`）

use std::io::{self, Stdout, Write};

use super::model::format_time;
use crate::engine::{FrameInfo, Renderer};
use crate::spectrum::Spectrum;

/// 用 `\r` 覆盖同一行的状态渲染器
pub struct StatusRenderer<W: Write = Stdout> {
    out: W,
    /// 最近一次有频谱时的主频（Hz）
    dominant_hz: Option<f32>,
}

impl StatusRenderer<Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> StatusRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            dominant_hz: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// 第一个声道中幅度最大的非直流频点
fn dominant_frequency(spectrum: &Spectrum, rate: u32) -> Option<f32> {
    let magnitudes = spectrum.channel(0)?;
    magnitudes
        .iter()
        .enumerate()
        .skip(1)
        .max_by(|a, b| a.1.total_cmp(b.1))
        .filter(|(_, m)| **m > 0.0)
        .map(|(k, _)| Spectrum::bucket_frequency(k, rate))
}

impl<W: Write> Renderer for StatusRenderer<W> {
    fn render(&mut self, frame: &FrameInfo, spectrum: Option<&Spectrum>) -> io::Result<()> {
        if let Some(spectrum) = spectrum {
            self.dominant_hz = dominant_frequency(spectrum, frame.rate);
        }
        let peak = self
            .dominant_hz
            .map_or_else(|| "-".to_string(), |hz| format!("{:.0} Hz", hz));

        write!(
            self.out,
            "\r  {} / {}  |  Peak: {:>8}  |  Underruns: {}  ",
            format_time(frame.position_secs()),
            format_time(frame.duration_secs()),
            peak,
            frame.underruns
        )?;
        self.out.flush()
    }
}
