use crate::core::{MediaKind, PlaybackConfig, PlaybackState, PlayerError, RenderTarget, Result, SyncSource, Track, VideoInfo};
use crate::player::audio_clock::AudioClock;
use crate::player::codec::{prepare_decoder, DecoderProvider};
use crate::player::container::ContainerReader;
use crate::player::pacing::{FrameCallback, PacingController};
use crate::player::pump::DecodePump;
use crate::player::task::{PlaybackEvent, PlaybackTask, TaskControl};
use crate::player::track_selector::open_track;
use crossbeam_channel::Sender;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

/// 视频播放器 - 解码视频轨道并按时间戳节奏释放到渲染目标
pub struct VideoPlayer {
    track: Track,
    info: VideoInfo,
    config: PlaybackConfig,
    control: TaskControl,
    reader: Option<Box<dyn ContainerReader>>,
    render_target: Option<RenderTarget>,
    callback: Option<Box<dyn FrameCallback>>,
    audio_clock: Option<AudioClock>,
    events: Option<Sender<PlaybackEvent>>,
    task: Option<PlaybackTask>,
}

impl VideoPlayer {
    /// 选择视频轨道并读取尺寸；没有视频轨道时返回建立错误
    pub fn open(mut reader: Box<dyn ContainerReader>, config: PlaybackConfig) -> Result<Self> {
        config.validate()?;
        let track = open_track(reader.as_mut(), MediaKind::Video)?;
        let nominal_fps = match track.format.frame_rate {
            Some(fps) if fps > 0 => fps,
            _ => config.fallback_frame_rate,
        };
        let info = VideoInfo {
            width: track.format.width.unwrap_or(0),
            height: track.format.height.unwrap_or(0),
            nominal_fps,
        };
        info!("VideoPlayer: width :{}, height :{}, fps :{}", info.width, info.height, info.nominal_fps);
        Ok(Self {
            track,
            info,
            config,
            control: TaskControl::new(),
            reader: Some(reader),
            render_target: None,
            callback: None,
            audio_clock: None,
            events: None,
            task: None,
        })
    }

    pub fn set_render_target(&mut self, target: RenderTarget) {
        self.render_target = Some(target);
    }

    pub fn set_frame_callback(&mut self, callback: Box<dyn FrameCallback>) {
        self.callback = Some(callback);
    }

    /// 音频时钟；仅在 `sync_source = audio_clock` 时用作节奏参考
    pub fn set_audio_clock(&mut self, clock: AudioClock) {
        self.audio_clock = Some(clock);
    }

    pub fn set_events(&mut self, events: Sender<PlaybackEvent>) {
        self.events = Some(events);
    }

    /// 设置循环模式（启动前有效）
    pub fn set_loop(&mut self, loop_mode: bool) {
        self.config.loop_playback = loop_mode;
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    pub fn info(&self) -> VideoInfo {
        self.info
    }

    pub fn width(&self) -> u32 {
        self.info.width
    }

    pub fn height(&self) -> u32 {
        self.info.height
    }

    /// 创建并配置解码器，启动解码线程
    pub fn start(&mut self, decoders: &dyn DecoderProvider) -> Result<()> {
        if self.reader.is_none() {
            return Err(PlayerError::Other("视频播放器已启动".to_string()));
        }
        let decoder = prepare_decoder(decoders, &self.track.format, self.render_target.as_ref())?;
        let reader = match self.reader.take() {
            Some(reader) => reader,
            None => return Err(PlayerError::Other("视频播放器已启动".to_string())),
        };

        let mut pacing = PacingController::new(self.info.nominal_fps).with_rebase_on_loop(self.config.rebase_on_loop);
        if let Some(callback) = self.callback.take() {
            pacing = pacing.with_callback(callback);
        }
        if self.config.sync_source == SyncSource::AudioClock {
            match &self.audio_clock {
                Some(clock) => pacing = pacing.with_audio_reference(Arc::new(clock.clone())),
                None => warn!("⚠️ 配置了音频时钟同步但未提供音频时钟，使用墙上时钟"),
            }
        }

        let mut pump = DecodePump::new(self.track.clone(), decoder, reader, &self.config);
        pump.set_loop(self.config.loop_playback);
        let mut task = PlaybackTask::new(pump, Box::new(pacing), self.control.clone(), self.events.clone());
        task.start()?;
        self.task = Some(task);
        Ok(())
    }

    /// 请求停止（任意线程可调用，幂等）
    pub fn request_stop(&self) {
        if self.control.request_stop() {
            info!("⏹ 视频播放请求停止");
        }
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

impl Drop for VideoPlayer {
    fn drop(&mut self) {
        self.request_stop();
        self.join();
        // 从未启动：读取器仍归播放器所有
        if let Some(mut reader) = self.reader.take() {
            reader.release();
        }
    }
}
