use crate::core::{PlayerError, Result};
use log::debug;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 已播放帧数计数器，可在不访问音频输出本身的情况下跨线程读取
#[derive(Debug, Clone, Default)]
pub struct FramePosition {
    frames: Arc<AtomicU64>,
}

impl FramePosition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    pub fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::AcqRel);
    }
}

/// 音频输出能力接口
///
/// 写入 16 位交错 PCM；`playback_frame_position` 是设备实际已播放的帧数。
pub trait AudioSink: Send {
    /// 写入 PCM 字节，返回接受的字节数
    ///
    /// 不得阻塞等待设备消费：缓冲已满时返回 `Ok(0)` 或部分长度，由调用方稍后重试。
    fn write(&mut self, pcm: &[u8]) -> Result<usize>;

    fn play(&mut self) -> Result<()>;

    fn pause(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    /// 播放位置句柄（与输出共享同一计数器）
    fn position(&self) -> FramePosition;

    /// 已播放的帧数
    fn playback_frame_position(&self) -> u64 {
        self.position().get()
    }

    fn sample_rate(&self) -> u32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SinkState {
    Stopped,
    Playing,
    Paused,
}

/// 内存音频输出 - 捕获写入的 PCM，写入即视为播放完成
///
/// 用于无头运行与测试。
pub struct MemoryAudioSink {
    sample_rate: u32,
    channels: u16,
    state: SinkState,
    frames_played: FramePosition,
    captured: Arc<Mutex<Vec<u8>>>,
}

impl MemoryAudioSink {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
            state: SinkState::Stopped,
            frames_played: FramePosition::new(),
            captured: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// 捕获缓冲区的共享句柄
    pub fn captured(&self) -> Arc<Mutex<Vec<u8>>> {
        self.captured.clone()
    }

    fn bytes_per_frame(&self) -> usize {
        self.channels as usize * 2
    }
}

impl AudioSink for MemoryAudioSink {
    fn write(&mut self, pcm: &[u8]) -> Result<usize> {
        if self.state == SinkState::Stopped {
            return Err(PlayerError::AudioError("音频输出未启动".to_string()));
        }
        self.captured.lock().extend_from_slice(pcm);
        if self.state == SinkState::Playing {
            self.frames_played.advance((pcm.len() / self.bytes_per_frame()) as u64);
        }
        Ok(pcm.len())
    }

    fn play(&mut self) -> Result<()> {
        self.state = SinkState::Playing;
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        if self.state == SinkState::Playing {
            self.state = SinkState::Paused;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        debug!("内存音频输出停止（共播放 {} 帧）", self.frames_played.get());
        self.state = SinkState::Stopped;
        Ok(())
    }

    fn position(&self) -> FramePosition {
        self.frames_played.clone()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_counts_frames_while_playing() {
        let mut sink = MemoryAudioSink::new(44100, 2);
        assert!(sink.write(&[0; 8]).is_err());
        sink.play().unwrap();
        sink.write(&[0; 400]).unwrap();
        assert_eq!(sink.playback_frame_position(), 100);
        sink.pause().unwrap();
        sink.write(&[0; 400]).unwrap();
        assert_eq!(sink.playback_frame_position(), 100);
        assert_eq!(sink.captured().lock().len(), 800);
    }

    #[test]
    fn test_position_handle_tracks_writes() {
        let mut sink = MemoryAudioSink::new(8000, 1);
        let position = sink.position();
        sink.play().unwrap();
        sink.write(&[0; 20]).unwrap();
        assert_eq!(position.get(), 10);
        assert_eq!(sink.playback_frame_position(), 10);
    }
}
