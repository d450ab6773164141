//! 输出统计
//!
//! 在每次 feed 中收集，会话结束时生成报告。
//! 只由驱动线程访问，不需要原子操作。

/// Sink 统计收集器
#[derive(Debug, Default, Clone)]
pub struct SinkStats {
    feed_calls: u64,
    transfers: u64,
    frames_submitted: u64,
    // 设备接受的帧数少于提供的帧数
    partial_transfers: u64,
    would_block: u64,
    underruns: u64,
    recoveries: u64,
    // 硬件延迟（帧），只在支持延迟查询时有意义
    min_delay: Option<usize>,
    max_delay: usize,
}

impl SinkStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_feed(&mut self) {
        self.feed_calls += 1;
    }

    /// 记录一次传输（offered = 提供的帧数，accepted = 设备接受的帧数）
    #[inline]
    pub fn record_transfer(&mut self, offered: usize, accepted: usize) {
        self.transfers += 1;
        self.frames_submitted += accepted as u64;
        if accepted < offered {
            self.partial_transfers += 1;
        }
    }

    #[inline]
    pub fn record_would_block(&mut self) {
        self.would_block += 1;
    }

    #[inline]
    pub fn record_underrun(&mut self) {
        self.underruns += 1;
    }

    #[inline]
    pub fn record_recovery(&mut self) {
        self.recoveries += 1;
    }

    #[inline]
    pub fn record_delay(&mut self, frames: usize) {
        self.min_delay = Some(self.min_delay.map_or(frames, |d| d.min(frames)));
        self.max_delay = self.max_delay.max(frames);
    }

    #[inline]
    pub fn underrun_count(&self) -> u64 {
        self.underruns
    }

    #[inline]
    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    #[inline]
    pub fn feed_calls(&self) -> u64 {
        self.feed_calls
    }

    /// 生成报告
    pub fn report(&self, period_frames: usize, rate: u32) -> StatsReport {
        StatsReport {
            feed_calls: self.feed_calls,
            transfers: self.transfers,
            frames_submitted: self.frames_submitted,
            partial_transfers: self.partial_transfers,
            would_block: self.would_block,
            underruns: self.underruns,
            recoveries: self.recoveries,
            delay: self.min_delay.map(|min| (min, self.max_delay)),
            period_frames,
            rate,
        }
    }
}

/// 统计报告
#[derive(Debug, Clone)]
pub struct StatsReport {
    pub feed_calls: u64,
    pub transfers: u64,
    pub frames_submitted: u64,
    pub partial_transfers: u64,
    pub would_block: u64,
    pub underruns: u64,
    pub recoveries: u64,
    /// (min, max) 硬件延迟帧数
    pub delay: Option<(usize, usize)>,
    pub period_frames: usize,
    pub rate: u32,
}

impl StatsReport {
    fn frames_to_ms(&self, frames: usize) -> f64 {
        if self.rate == 0 {
            return 0.0;
        }
        frames as f64 * 1000.0 / self.rate as f64
    }
}

impl std::fmt::Display for StatsReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Playback Statistics")?;
        writeln!(f, "===================")?;
        writeln!(f, "Feed calls: {}", self.feed_calls)?;
        writeln!(
            f,
            "Transfers: {} ({} partial, {} would-block)",
            self.transfers, self.partial_transfers, self.would_block
        )?;
        writeln!(
            f,
            "Frames submitted: {} ({:.2} s)",
            self.frames_submitted,
            if self.rate > 0 {
                self.frames_submitted as f64 / self.rate as f64
            } else {
                0.0
            }
        )?;
        writeln!(
            f,
            "Period: {} frames ({:.2} ms @ {} Hz)",
            self.period_frames,
            self.frames_to_ms(self.period_frames),
            self.rate
        )?;
        match self.delay {
            Some((min, max)) => writeln!(
                f,
                "Device delay: {:.2} - {:.2} ms",
                self.frames_to_ms(min),
                self.frames_to_ms(max)
            )?,
            None => writeln!(f, "Device delay: not reported")?,
        }
        writeln!(f)?;
        writeln!(f, "Underruns: {} (recovered: {})", self.underruns, self.recoveries)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_transfers_counted() {
        let mut stats = SinkStats::new();
        stats.record_transfer(1024, 1024);
        stats.record_transfer(1024, 300);
        stats.record_would_block();

        let report = stats.report(1024, 48000);
        assert_eq!(report.transfers, 2);
        assert_eq!(report.partial_transfers, 1);
        assert_eq!(report.frames_submitted, 1324);
        assert_eq!(report.would_block, 1);
    }

    #[test]
    fn test_delay_range() {
        let mut stats = SinkStats::new();
        assert!(stats.report(512, 48000).delay.is_none());

        stats.record_delay(900);
        stats.record_delay(300);
        stats.record_delay(600);
        assert_eq!(stats.report(512, 48000).delay, Some((300, 900)));
    }

    #[test]
    fn test_report_display() {
        let mut stats = SinkStats::new();
        stats.record_underrun();
        stats.record_recovery();
        let text = stats.report(1024, 48000).to_string();
        assert!(text.contains("Underruns: 1 (recovered: 1)"));
        assert!(text.contains("21.33 ms"));
    }
}
