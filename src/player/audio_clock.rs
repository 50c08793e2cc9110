use crate::core::{MediaTimeProvider, Result};
use crate::player::audio_sink::{AudioSink, FramePosition};
use log::{info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

/// 时钟读数来源：播放位置句柄 + 采样率
#[derive(Clone)]
struct ClockSource {
    position: FramePosition,
    sample_rate: u32,
}

/// 音频时钟 - 由音频输出实际播放的帧数推算微秒时间
///
/// 持有音频输出的唯一槽位：音频播放线程通过它写入 PCM，
/// 其他线程只读取播放位置。读数与拆除都不等待写入锁。
/// 输出被拆除后时钟不可用。
#[derive(Clone, Default)]
pub struct AudioClock {
    sink: Arc<Mutex<Option<Box<dyn AudioSink>>>>,
    source: Arc<Mutex<Option<ClockSource>>>,
    teardown_pending: Arc<AtomicBool>,
    last_us: Arc<AtomicI64>,
}

fn stop_sink(mut sink: Box<dyn AudioSink>) {
    if let Err(e) = sink.stop() {
        warn!("⚠️ 停止音频输出失败: {}", e);
    }
    info!("🔇 音频输出已停止并拆除");
}

impl AudioClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// 挂接音频输出（替换已有输出时先停止旧输出）
    pub fn attach(&self, sink: Box<dyn AudioSink>) {
        let source = ClockSource {
            position: sink.position(),
            sample_rate: sink.sample_rate(),
        };
        let previous = self.sink.lock().replace(sink);
        *self.source.lock() = Some(source);
        self.teardown_pending.store(false, Ordering::SeqCst);
        self.last_us.store(0, Ordering::SeqCst);
        if let Some(mut old) = previous {
            warn!("⚠️ 音频时钟替换了仍在使用的音频输出");
            if let Err(e) = old.stop() {
                warn!("⚠️ 停止旧音频输出失败: {}", e);
            }
        }
    }

    /// 取下音频输出（会等待进行中的写入结束）
    pub fn detach(&self) -> Option<Box<dyn AudioSink>> {
        self.source.lock().take();
        self.sink.lock().take()
    }

    pub fn is_attached(&self) -> bool {
        self.source.lock().is_some()
    }

    /// 停止并拆除音频输出，返回本次调用是否使时钟失效
    ///
    /// 不等待写入锁：输出正在写入时，停止由写入方在写入结束后完成。
    /// 输出无论由谁停止都恰好停止一次。
    pub fn teardown(&self) -> bool {
        let detached = self.source.lock().take().is_some();
        self.teardown_pending.store(true, Ordering::SeqCst);
        match self.sink.try_lock() {
            Some(mut guard) => {
                if let Some(sink) = guard.take() {
                    stop_sink(sink);
                }
            }
            None => info!("音频输出正在写入，拆除延后到写入结束"),
        }
        detached
    }

    /// 对已挂接的输出执行操作；未挂接或已请求拆除时返回 Ok(None)
    pub fn with_sink<R>(&self, f: impl FnOnce(&mut dyn AudioSink) -> Result<R>) -> Result<Option<R>> {
        let mut guard = self.sink.lock();
        if self.teardown_pending.load(Ordering::SeqCst) {
            if let Some(sink) = guard.take() {
                stop_sink(sink);
            }
            return Ok(None);
        }
        let result = match guard.as_mut() {
            Some(sink) => f(sink.as_mut()).map(Some),
            None => return Ok(None),
        };
        // 写入期间被请求拆除
        if self.teardown_pending.load(Ordering::SeqCst) {
            if let Some(sink) = guard.take() {
                stop_sink(sink);
            }
        }
        result
    }

    /// 当前音频时间（微秒）：已播放帧数 × 1_000_000 / 采样率
    ///
    /// 输出未挂接或已拆除时返回 None。结果单调不减。
    pub fn current_time_us(&self) -> Option<i64> {
        let source = self.source.lock().clone()?;
        if source.sample_rate == 0 {
            return None;
        }
        let frames = source.position.get();
        let us = (frames as u128 * 1_000_000 / source.sample_rate as u128) as i64;
        let previous = self.last_us.fetch_max(us, Ordering::SeqCst);
        Some(previous.max(us))
    }
}

impl MediaTimeProvider for AudioClock {
    fn media_time_us(&self) -> Option<i64> {
        self.current_time_us()
    }
}
