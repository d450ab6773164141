//! 模拟设备的硬件环形缓冲区
//!
//! 设计目标：
//! - 零分配：所有内存在初始化时预分配
//! - 以帧为单位：容量是 2 的幂帧，位置用 wrapping 计数 + mask 取模
//! - 支持两种写入方式：直接写入，以及 mmap 风格的 claim / commit
//!
//! claim 只返回从写位置到缓冲区末尾的连续部分，
//! 因此在环绕处会少于请求的帧数

/// 帧环形缓冲区
pub struct FrameRing {
    buffer: Box<[i16]>,
    channels: usize,
    capacity: usize,
    mask: usize,
    // 帧位置，wrapping 计数
    write_pos: usize,
    read_pos: usize,
}

impl FrameRing {
    /// 创建指定容量（帧）的环形缓冲区
    ///
    /// capacity 必须是 2 的幂
    pub fn new(capacity: usize, channels: usize) -> Self {
        assert!(capacity.is_power_of_two(), "capacity must be power of two");
        assert!(channels > 0, "channels must be positive");

        Self {
            buffer: vec![0i16; capacity * channels].into_boxed_slice(),
            channels,
            capacity,
            mask: capacity - 1,
            write_pos: 0,
            read_pos: 0,
        }
    }

    /// 创建指定最小容量的环形缓冲区（自动向上取整到 2 的幂）
    pub fn with_min_capacity(min_capacity: usize, channels: usize) -> Self {
        Self::new(min_capacity.max(1).next_power_of_two(), channels)
    }

    /// 写入交织样本，返回实际写入的帧数
    pub fn write(&mut self, data: &[i16]) -> usize {
        let frames = (data.len() / self.channels).min(self.free_space());
        let mut done = 0;
        while done < frames {
            let (offset, n) = self.claim(frames - done);
            let start = offset * self.channels;
            let len = n * self.channels;
            self.buffer[start..start + len]
                .copy_from_slice(&data[done * self.channels..done * self.channels + len]);
            self.commit(n);
            done += n;
        }
        done
    }

    /// 认领最多 `frames` 帧的连续可写区域
    ///
    /// 返回 (帧偏移, 实际帧数)
    pub fn claim(&self, frames: usize) -> (usize, usize) {
        let offset = self.write_pos & self.mask;
        let contiguous = self.capacity - offset;
        (offset, frames.min(self.free_space()).min(contiguous))
    }

    /// 已认领区域的样本内存
    pub fn region_mut(&mut self, offset: usize, frames: usize) -> &mut [i16] {
        let start = offset * self.channels;
        &mut self.buffer[start..start + frames * self.channels]
    }

    /// 提交已写入的帧，返回实际提交数
    pub fn commit(&mut self, frames: usize) -> usize {
        let frames = frames.min(self.free_space());
        self.write_pos = self.write_pos.wrapping_add(frames);
        frames
    }

    /// 消费（播放）最多 `frames` 帧，返回实际消费数
    pub fn consume(&mut self, frames: usize) -> usize {
        let n = frames.min(self.available());
        self.read_pos = self.read_pos.wrapping_add(n);
        n
    }

    /// 当前可读帧数
    #[inline]
    pub fn available(&self) -> usize {
        let used = self.write_pos.wrapping_sub(self.read_pos);
        debug_assert!(used <= self.capacity, "ring invariant violated: used > capacity");
        used
    }

    /// 当前可写帧数
    #[inline]
    pub fn free_space(&self) -> usize {
        self.capacity - self.available()
    }

    /// 容量（帧）
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 清空缓冲区
    pub fn clear(&mut self) {
        self.read_pos = self.write_pos;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_basic() {
        let mut ring = FrameRing::new(4, 2);
        assert_eq!(ring.write(&[1, 2, 3, 4]), 2);
        assert_eq!(ring.available(), 2);
        assert_eq!(ring.free_space(), 2);
    }

    #[test]
    fn test_ring_full() {
        let mut ring = FrameRing::new(4, 1);
        assert_eq!(ring.write(&[1, 2, 3, 4]), 4);
        assert_eq!(ring.free_space(), 0);

        // 再写应该返回 0
        assert_eq!(ring.write(&[5, 6]), 0);
    }

    #[test]
    fn test_claim_stops_at_wrap() {
        let mut ring = FrameRing::new(8, 1);
        assert_eq!(ring.write(&[0; 6]), 6);
        assert_eq!(ring.consume(4), 4);

        // 写位置在 6，只剩 2 帧连续空间，虽然总空闲是 6
        let (offset, frames) = ring.claim(5);
        assert_eq!((offset, frames), (6, 2));

        ring.region_mut(offset, frames).copy_from_slice(&[7, 8]);
        assert_eq!(ring.commit(frames), 2);

        // 环绕后从 0 开始
        assert_eq!(ring.claim(5), (0, 4));
    }

    #[test]
    fn test_write_wraps() {
        let mut ring = FrameRing::new(4, 1);
        assert_eq!(ring.write(&[1, 2, 3]), 3);
        assert_eq!(ring.consume(2), 2);
        // 跨越末尾写入
        assert_eq!(ring.write(&[4, 5, 6]), 3);
        assert_eq!(ring.available(), 4);
        assert_eq!(&ring.buffer[..], &[5, 6, 3, 4]);
    }

    #[test]
    fn test_with_min_capacity() {
        let ring = FrameRing::with_min_capacity(1000, 2);
        assert_eq!(ring.capacity(), 1024);
    }
}
