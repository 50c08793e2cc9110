use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// 媒体时间源 - 为节奏控制提供微秒级参考时间
pub trait MediaTimeProvider: Send + Sync {
    /// 当前媒体时间（微秒），时间源不可用时返回 None
    fn media_time_us(&self) -> Option<i64>;
}

/// 播放时钟 - 以墙上时间为基准，支持暂停与重新定基
#[derive(Clone)]
pub struct PlaybackClock {
    inner: Arc<Mutex<ClockInner>>,
}

struct ClockInner {
    base_us: i64,               // 基准媒体时间（微秒）
    base_instant: Instant,      // 基准时刻
    paused: bool,
    paused_at_us: i64,          // 暂停时的位置
}

impl ClockInner {
    fn now_us(&self) -> i64 {
        if self.paused {
            self.paused_at_us
        } else {
            self.base_us + self.base_instant.elapsed().as_micros() as i64
        }
    }
}

impl PlaybackClock {
    /// 创建暂停中的时钟（位置 0）
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                base_us: 0,
                base_instant: Instant::now(),
                paused: true,
                paused_at_us: 0,
            })),
        }
    }

    /// 创建从此刻开始走时的时钟
    pub fn started() -> Self {
        let clock = Self::new();
        clock.play();
        clock
    }

    /// 获取当前播放时间（微秒）
    pub fn now_us(&self) -> i64 {
        self.inner.lock().now_us()
    }

    /// 获取当前播放时间（毫秒）
    pub fn now_ms(&self) -> i64 {
        self.now_us() / 1000
    }

    /// 设置播放位置（微秒）
    pub fn set_time(&self, time_us: i64) {
        let mut inner = self.inner.lock();
        inner.base_us = time_us;
        inner.base_instant = Instant::now();
        inner.paused_at_us = time_us;
    }

    /// 以此刻为零点重新定基
    pub fn rebase(&self) {
        self.set_time(0);
    }

    /// 开始走时
    pub fn play(&self) {
        let mut inner = self.inner.lock();
        if inner.paused {
            inner.base_us = inner.paused_at_us;
            inner.base_instant = Instant::now();
            inner.paused = false;
        }
    }

    /// 暂停走时
    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        if !inner.paused {
            inner.paused_at_us = inner.now_us();
            inner.paused = true;
        }
    }

    /// 是否暂停
    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaTimeProvider for PlaybackClock {
    fn media_time_us(&self) -> Option<i64> {
        Some(self.now_us())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_new_clock_is_paused_at_zero() {
        let clock = PlaybackClock::new();
        thread::sleep(Duration::from_millis(5));
        assert!(clock.is_paused());
        assert_eq!(clock.now_us(), 0);
    }

    #[test]
    fn test_pause_freezes_time() {
        let clock = PlaybackClock::started();
        thread::sleep(Duration::from_millis(10));
        clock.pause();
        let frozen = clock.now_us();
        assert!(frozen >= 10_000);
        thread::sleep(Duration::from_millis(10));
        assert_eq!(clock.now_us(), frozen);

        clock.play();
        thread::sleep(Duration::from_millis(5));
        assert!(clock.now_us() >= frozen + 5_000);
    }

    #[test]
    fn test_rebase_restarts_from_zero() {
        let clock = PlaybackClock::started();
        thread::sleep(Duration::from_millis(20));
        clock.rebase();
        assert!(clock.now_us() < 20_000);
        assert_eq!(clock.media_time_us().map(|t| t >= 0), Some(true));
    }
}
