use crate::core::{MediaTimeProvider, PlaybackClock, Result, UnitInfo};
use crate::player::pump::OutputStage;
use log::{debug, info, warn};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// 帧渲染通知（在解码线程上同步调用）
pub trait FrameCallback: Send {
    /// 单元释放前，携带显示时间戳（微秒）
    fn pre_render(&mut self, pts_us: i64);

    /// 单元释放后
    fn post_render(&mut self);

    /// 循环播放回到开头
    fn loop_reset(&mut self);
}

/// 计算释放前需要等待的时长
///
/// `elapsed_us` 是自起点以来的参考时间。已经落后时返回 None：
/// 不丢帧，立即释放（迟到渲染）。
pub fn frame_delay(pts_us: i64, elapsed_us: i64) -> Option<Duration> {
    let delay_us = pts_us - elapsed_us;
    if delay_us > 0 {
        Some(Duration::from_micros(delay_us as u64))
    } else {
        None
    }
}

/// 最近一次观察到的音频时间及其首次出现的时刻
#[derive(Debug, Clone, Copy)]
struct AudioAnchor {
    us: i64,
    seen_at: Instant,
}

/// 节奏控制器（仅视频）- 让单元的释放时间跟随显示时间戳
///
/// 以音频时钟为参考时，参考时间是相对本轮循环起点的音频时间；
/// 音频时间停止前进（音频已播完或输出缓冲中）期间按墙上时间外推。
pub struct PacingController {
    wall: PlaybackClock,
    audio: Option<Arc<dyn MediaTimeProvider>>,
    // 本轮循环起点处的音频时间
    audio_base_us: i64,
    audio_anchor: Option<AudioAnchor>,
    callback: Option<Box<dyn FrameCallback>>,
    rebase_on_loop: bool,
    nominal_fps: u32,
    late_frames: u64,
    audio_unavailable_logged: bool,
}

impl PacingController {
    pub fn new(nominal_fps: u32) -> Self {
        Self {
            wall: PlaybackClock::new(),
            audio: None,
            audio_base_us: 0,
            audio_anchor: None,
            callback: None,
            rebase_on_loop: true,
            nominal_fps,
            late_frames: 0,
            audio_unavailable_logged: false,
        }
    }

    pub fn with_callback(mut self, callback: Box<dyn FrameCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    /// 以音频时钟作为参考；不可用时回退到墙上时钟
    pub fn with_audio_reference(mut self, audio: Arc<dyn MediaTimeProvider>) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn with_rebase_on_loop(mut self, rebase: bool) -> Self {
        self.rebase_on_loop = rebase;
        self
    }

    pub fn nominal_fps(&self) -> u32 {
        self.nominal_fps
    }

    pub fn late_frames(&self) -> u64 {
        self.late_frames
    }

    /// 当前参考时间（微秒）
    fn reference_us(&mut self) -> i64 {
        if let Some(audio) = &self.audio {
            match audio.media_time_us() {
                Some(us) => {
                    let anchor = match self.audio_anchor {
                        Some(anchor) if anchor.us == us => anchor,
                        _ => {
                            let anchor = AudioAnchor {
                                us,
                                seen_at: Instant::now(),
                            };
                            self.audio_anchor = Some(anchor);
                            anchor
                        }
                    };
                    let stalled_us = anchor.seen_at.elapsed().as_micros() as i64;
                    return us - self.audio_base_us + stalled_us;
                }
                None if !self.audio_unavailable_logged => {
                    warn!("⚠️ 音频时钟不可用，视频节奏回退到墙上时钟");
                    self.audio_unavailable_logged = true;
                }
                None => {}
            }
        }
        self.wall.now_us()
    }
}

impl OutputStage for PacingController {
    fn on_start(&mut self) {
        self.wall.rebase();
        self.wall.play();
        info!("🎬 视频节奏控制启动（名义帧率 {} fps）", self.nominal_fps);
    }

    fn before_release(&mut self, unit: &UnitInfo, _payload: &[u8]) -> Result<bool> {
        if unit.size == 0 {
            return Ok(false);
        }
        let elapsed_us = self.reference_us();
        match frame_delay(unit.pts_us, elapsed_us) {
            Some(delay) => thread::sleep(delay),
            None => {
                self.late_frames += 1;
                debug!("视频帧迟到 {}us (pts={}us)", elapsed_us - unit.pts_us, unit.pts_us);
            }
        }
        if let Some(callback) = self.callback.as_mut() {
            callback.pre_render(unit.pts_us);
        }
        Ok(true)
    }

    fn after_release(&mut self, _unit: &UnitInfo, rendered: bool) {
        if rendered {
            if let Some(callback) = self.callback.as_mut() {
                callback.post_render();
            }
        }
    }

    fn on_loop_reset(&mut self) {
        if self.rebase_on_loop {
            self.wall.rebase();
            if let Some(us) = self.audio.as_ref().and_then(|audio| audio.media_time_us()) {
                self.audio_base_us = us;
                self.audio_anchor = Some(AudioAnchor {
                    us,
                    seen_at: Instant::now(),
                });
                debug!("循环起点对齐音频时间 {}us", us);
            }
        }
        if let Some(callback) = self.callback.as_mut() {
            callback.loop_reset();
        }
    }

    fn on_pause(&mut self) {
        self.wall.pause();
    }

    fn on_resume(&mut self) {
        self.wall.play();
        // 暂停期间不外推
        self.audio_anchor = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BufferFlags;
    use parking_lot::Mutex;

    struct Timeline {
        start: Instant,
        renders: Arc<Mutex<Vec<(i64, Duration)>>>,
    }

    impl FrameCallback for Timeline {
        fn pre_render(&mut self, pts_us: i64) {
            self.renders.lock().push((pts_us, self.start.elapsed()));
        }

        fn post_render(&mut self) {}

        fn loop_reset(&mut self) {}
    }

    fn unit(pts_us: i64, size: usize) -> UnitInfo {
        UnitInfo {
            index: 0,
            size,
            pts_us,
            flags: BufferFlags::NONE,
        }
    }

    #[test]
    fn test_frame_delay() {
        assert_eq!(frame_delay(40_000, 10_000), Some(Duration::from_millis(30)));
        assert_eq!(frame_delay(40_000, 40_000), None);
        assert_eq!(frame_delay(40_000, 90_000), None);
    }

    #[test]
    fn test_frames_are_never_released_early() {
        let renders = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();
        let mut pacing = PacingController::new(30).with_callback(Box::new(Timeline {
            start,
            renders: renders.clone(),
        }));
        pacing.on_start();
        for pts_us in [0, 15_000, 30_000, 45_000] {
            assert!(pacing.before_release(&unit(pts_us, 8), &[]).unwrap());
        }
        for (pts_us, at) in renders.lock().iter() {
            assert!(*at >= Duration::from_micros(*pts_us as u64), "pts {} released at {:?}", pts_us, at);
        }
    }

    #[test]
    fn test_late_frames_render_immediately() {
        let mut pacing = PacingController::new(30);
        pacing.on_start();
        thread::sleep(Duration::from_millis(30));
        let begin = Instant::now();
        assert!(pacing.before_release(&unit(1_000, 8), &[]).unwrap());
        assert!(begin.elapsed() < Duration::from_millis(20));
        assert_eq!(pacing.late_frames(), 1);
    }

    #[test]
    fn test_empty_units_are_not_rendered() {
        let mut pacing = PacingController::new(30);
        pacing.on_start();
        assert!(!pacing.before_release(&unit(0, 0), &[]).unwrap());
    }

    struct FixedTime(Option<i64>);

    impl MediaTimeProvider for FixedTime {
        fn media_time_us(&self) -> Option<i64> {
            self.0
        }
    }

    #[test]
    fn test_audio_reference_and_fallback() {
        let mut pacing = PacingController::new(30).with_audio_reference(Arc::new(FixedTime(Some(5_000_000))));
        pacing.on_start();
        // 音频时钟已到 5 秒，1 秒处的帧是迟到帧
        pacing.before_release(&unit(1_000_000, 8), &[]).unwrap();
        assert_eq!(pacing.late_frames(), 1);

        let mut fallback = PacingController::new(30).with_audio_reference(Arc::new(FixedTime(None)));
        fallback.on_start();
        let begin = Instant::now();
        fallback.before_release(&unit(20_000, 8), &[]).unwrap();
        assert!(begin.elapsed() >= Duration::from_millis(15));
        assert_eq!(fallback.late_frames(), 0);
    }

    #[test]
    fn test_loop_reset_rebases_audio_reference() {
        let mut pacing = PacingController::new(50).with_audio_reference(Arc::new(FixedTime(Some(5_000_000))));
        pacing.on_start();
        pacing.before_release(&unit(80_000, 8), &[]).unwrap();
        assert_eq!(pacing.late_frames(), 1);

        // 新一轮从音频当前时间重新计时，首帧不再迟到
        pacing.on_loop_reset();
        let begin = Instant::now();
        pacing.before_release(&unit(20_000, 8), &[]).unwrap();
        assert!(begin.elapsed() >= Duration::from_millis(15));
        assert!(begin.elapsed() < Duration::from_millis(200));
        assert_eq!(pacing.late_frames(), 1);
    }

    #[test]
    fn test_stalled_audio_reference_advances_with_wall_time() {
        let mut pacing = PacingController::new(50).with_audio_reference(Arc::new(FixedTime(Some(0))));
        pacing.on_start();
        let begin = Instant::now();
        for pts_us in [0, 30_000, 60_000, 90_000] {
            pacing.before_release(&unit(pts_us, 8), &[]).unwrap();
        }
        // 音频停在 0：按墙上时间推进，而不是每帧都从 0 等满 pts
        assert!(begin.elapsed() >= Duration::from_millis(80));
        assert!(begin.elapsed() < Duration::from_millis(150));
    }
}
