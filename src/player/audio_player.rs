use crate::core::{MediaKind, PlaybackConfig, PlaybackState, PlayerError, Result, Track, UnitInfo};
use crate::player::audio_clock::AudioClock;
use crate::player::audio_sink::AudioSink;
use crate::player::codec::{prepare_decoder, DecoderProvider};
use crate::player::container::ContainerReader;
use crate::player::pump::{DecodePump, OutputStage, PumpExit};
use crate::player::task::{PlaybackEvent, PlaybackTask, TaskControl};
use crate::player::track_selector::open_track;
use crossbeam_channel::Sender;
use log::{debug, info, warn};
use std::thread;
use std::time::Duration;

/// 音频输出缓冲已满时的重试间隔（等待在时钟锁之外进行）
const WRITE_RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// 音频输出阶段 - 把解码出的 PCM 写入音频输出，单元不渲染
struct AudioRenderer {
    clock: AudioClock,
}

impl OutputStage for AudioRenderer {
    fn wants_payload(&self) -> bool {
        true
    }

    fn before_release(&mut self, unit: &UnitInfo, payload: &[u8]) -> Result<bool> {
        let mut offset = 0;
        while offset < payload.len() {
            match self.clock.with_sink(|sink| sink.write(&payload[offset..]))? {
                None => {
                    debug!("音频输出已拆除，丢弃 {} 字节 (pts={}us)", payload.len() - offset, unit.pts_us);
                    break;
                }
                Some(0) => thread::sleep(WRITE_RETRY_INTERVAL),
                Some(written) => offset += written,
            }
        }
        Ok(false)
    }

    fn on_pause(&mut self) {
        if let Err(e) = self.clock.with_sink(|sink| sink.pause()) {
            warn!("⚠️ 暂停音频输出失败: {}", e);
        }
    }

    fn on_resume(&mut self) {
        if let Err(e) = self.clock.with_sink(|sink| sink.play()) {
            warn!("⚠️ 恢复音频输出失败: {}", e);
        }
    }

    fn on_exit(&mut self, exit: PumpExit) {
        // 正常结束时保留输出，让已缓冲的音频播完
        if exit != PumpExit::Completed {
            self.clock.teardown();
        }
    }
}

/// 音频播放器 - 建立音频轨道，在独立线程中解码并写入音频输出
pub struct AudioPlayer {
    track: Track,
    config: PlaybackConfig,
    clock: AudioClock,
    control: TaskControl,
    pending: Option<(Box<dyn ContainerReader>, Box<dyn AudioSink>)>,
    events: Option<Sender<PlaybackEvent>>,
    task: Option<PlaybackTask>,
}

impl AudioPlayer {
    /// 选择音频轨道；没有音频轨道时返回建立错误
    pub fn open(mut reader: Box<dyn ContainerReader>, sink: Box<dyn AudioSink>, config: PlaybackConfig) -> Result<Self> {
        config.validate()?;
        let track = open_track(reader.as_mut(), MediaKind::Audio)?;
        info!(
            "AudioPlayer: {} 声道, {} Hz ({})",
            track.format.channel_count.unwrap_or(0),
            track.format.sample_rate.unwrap_or(0),
            track.format.mime
        );
        Ok(Self {
            track,
            config,
            clock: AudioClock::new(),
            control: TaskControl::new(),
            pending: Some((reader, sink)),
            events: None,
            task: None,
        })
    }

    /// 设置终止通知通道
    pub fn set_events(&mut self, events: Sender<PlaybackEvent>) {
        self.events = Some(events);
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    /// 音频时钟（可作为视频节奏的参考）
    pub fn clock(&self) -> AudioClock {
        self.clock.clone()
    }

    /// 当前音频时间（微秒）
    pub fn audio_time_us(&self) -> Option<i64> {
        self.clock.current_time_us()
    }

    /// 创建解码器、启动音频输出并开始解码线程
    pub fn start(&mut self, decoders: &dyn DecoderProvider) -> Result<()> {
        if self.pending.is_none() {
            return Err(PlayerError::Other("音频播放器已启动".to_string()));
        }
        let mut decoder = prepare_decoder(decoders, &self.track.format, None)?;
        let (mut reader, mut sink) = match self.pending.take() {
            Some(pending) => pending,
            None => return Err(PlayerError::Other("音频播放器已启动".to_string())),
        };
        if let Err(e) = sink.play() {
            decoder.release();
            reader.release();
            return Err(e);
        }
        self.clock.attach(sink);

        let pump = DecodePump::new(self.track.clone(), decoder, reader, &self.config);
        let stage = Box::new(AudioRenderer {
            clock: self.clock.clone(),
        });
        let mut task = PlaybackTask::new(pump, stage, self.control.clone(), self.events.clone());
        task.start()?;
        self.task = Some(task);
        Ok(())
    }

    /// 请求停止：立即停止并拆除音频输出（任意线程可调用，幂等）
    pub fn request_stop(&self) {
        if self.control.request_stop() {
            info!("⏹ 音频播放请求停止");
        }
        self.clock.teardown();
    }

    pub fn pause(&self) -> bool {
        self.control.pause()
    }

    pub fn resume(&self) -> bool {
        self.control.resume()
    }

    pub fn state(&self) -> PlaybackState {
        self.control.state()
    }

    pub fn is_stopped(&self) -> bool {
        self.control.is_stopped()
    }

    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        self.control.wait_stopped(timeout)
    }

    pub fn join(&mut self) {
        if let Some(task) = self.task.as_mut() {
            task.join();
        }
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        self.request_stop();
        self.join();
        // 从未启动：读取器仍归播放器所有
        if let Some((mut reader, _sink)) = self.pending.take() {
            reader.release();
        }
    }
}
