use crate::core::{
    BufferFlags, OutputStatus, PlaybackConfig, PlaybackState, PlayerError, Result, SeekMode, Track, TrackFormat, UnitInfo,
};
use crate::player::codec::Decoder;
use crate::player::container::ContainerReader;
use crate::player::task::TaskControl;
use log::{debug, error, info, warn};
use std::process;
use std::thread;
use std::time::Duration;

fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}

/// 解码输出的消费阶段
///
/// 所有回调都在解码线程上同步执行；单元的释放由解码泵负责，
/// 阶段只决定是否渲染，因此每个单元恰好释放一次。
pub trait OutputStage: Send {
    /// 是否需要读取输出数据（音频 PCM）
    fn wants_payload(&self) -> bool {
        false
    }

    /// 解码循环第一次迭代之前调用
    fn on_start(&mut self) {}

    /// 释放前调用，返回是否渲染该单元
    fn before_release(&mut self, unit: &UnitInfo, payload: &[u8]) -> Result<bool>;

    /// 释放后调用
    fn after_release(&mut self, _unit: &UnitInfo, _rendered: bool) {}

    fn on_format_changed(&mut self, _format: Option<&TrackFormat>) {}

    /// 循环播放回到开头
    fn on_loop_reset(&mut self) {}

    fn on_pause(&mut self) {}

    fn on_resume(&mut self) {}

    /// 解码循环退出，轨道资源已释放
    fn on_exit(&mut self, _exit: PumpExit) {}
}

/// 解码循环退出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// 输出端收到流结束
    Completed,
    /// 收到停止请求
    Stopped,
    /// 致命错误
    Failed,
}

/// 解码统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub samples_fed: u64,
    pub units_drained: u64,
    pub units_rendered: u64,
    pub loops: u32,
}

/// 解码循环结束报告（失败时同样携带截至失败的统计）
#[derive(Debug)]
pub struct PumpReport {
    pub exit: PumpExit,
    pub stats: PumpStats,
    pub input_done: bool,
    pub output_done: bool,
    /// 致命错误，仅在 `exit == PumpExit::Failed` 时存在
    pub error: Option<PlayerError>,
}

/// 轨道资源 - 解码器与容器读取器的作用域守卫
///
/// 无论解码循环从哪个分支退出，drop 时都恰好停止并释放一次。
struct TrackResources {
    decoder: Box<dyn Decoder>,
    reader: Box<dyn ContainerReader>,
    label: String,
}

impl Drop for TrackResources {
    fn drop(&mut self) {
        if let Err(e) = self.decoder.stop() {
            warn!("{} ⚠️ [{}] 停止解码器失败: {}", log_ctx(), self.label, e);
        }
        self.decoder.release();
        self.reader.release();
        info!("{} 🧹 [{}] 解码器与容器读取器已释放", log_ctx(), self.label);
    }
}

/// 解码泵 - 单轨道的 提取 → 解码 → 输出 循环
pub struct DecodePump {
    track: Track,
    resources: TrackResources,
    loop_mode: bool,
    timeout: Duration,
    pause_poll: Duration,
    input_done: bool,
    output_done: bool,
    last_fed_pts: Option<i64>,
    stats: PumpStats,
}

impl DecodePump {
    /// 创建解码泵；解码器必须已配置并启动，读取器必须已选中该轨道
    pub fn new(
        track: Track,
        decoder: Box<dyn Decoder>,
        reader: Box<dyn ContainerReader>,
        config: &PlaybackConfig,
    ) -> Self {
        let label = format!("{}#{} {}", track.kind, track.index, decoder.name());
        Self {
            track,
            resources: TrackResources { decoder, reader, label },
            loop_mode: false,
            timeout: config.dequeue_timeout(),
            pause_poll: config.pause_poll_interval(),
            input_done: false,
            output_done: false,
            last_fed_pts: None,
            stats: PumpStats::default(),
        }
    }

    pub fn set_loop(&mut self, loop_mode: bool) {
        self.loop_mode = loop_mode;
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    pub fn input_done(&self) -> bool {
        self.input_done
    }

    pub fn output_done(&self) -> bool {
        self.output_done
    }

    /// 最近一次送入解码器的样本时间戳
    pub fn last_fed_pts(&self) -> Option<i64> {
        self.last_fed_pts
    }

    pub fn stats(&self) -> PumpStats {
        self.stats
    }

    /// 送入一个输入单元（槽位不可用时留到下一轮）
    pub fn feed_input(&mut self) -> Result<()> {
        let TrackResources { decoder, reader, label } = &mut self.resources;

        let slot = match decoder.dequeue_input_slot(self.timeout)? {
            Some(slot) => slot,
            None => {
                debug!("[{}] 输入槽位暂不可用", label);
                return Ok(());
            }
        };

        let buffer = decoder.input_buffer(slot)?;
        match reader.read_sample_data(buffer)? {
            None => {
                decoder.queue_input(slot, 0, 0, BufferFlags::END_OF_STREAM)?;
                self.input_done = true;
                info!("{} 📄 [{}] 输入结束（已送入流结束标记）", log_ctx(), label);
            }
            Some(size) => {
                if reader.sample_track_index() != Some(self.track.index) {
                    warn!(
                        "⚠️ [{}] 样本轨道不匹配: {:?} != {}",
                        label,
                        reader.sample_track_index(),
                        self.track.index
                    );
                }
                let pts_us = reader.sample_time_us().unwrap_or(0);
                if let Some(last) = self.last_fed_pts {
                    if pts_us < last {
                        warn!("⚠️ [{}] 样本时间戳回退: {}us < {}us", label, pts_us, last);
                    }
                }
                let flags = reader.sample_flags();
                decoder.queue_input(slot, size, pts_us, flags)?;
                self.stats.samples_fed += 1;
                self.last_fed_pts = Some(pts_us);
                reader.advance();

                if flags.is_end_of_stream() {
                    self.input_done = true;
                    info!("{} 📄 [{}] 输入结束（最后样本 {}us）", log_ctx(), label, pts_us);
                }
            }
        }
        Ok(())
    }

    /// 取出一个输出单元并交给输出阶段
    pub fn drain_output(&mut self, stage: &mut dyn OutputStage) -> Result<()> {
        let TrackResources { decoder, reader, label } = &mut self.resources;

        let unit = match decoder.dequeue_output(self.timeout)? {
            OutputStatus::TryAgainLater => {
                debug!("[{}] 暂无解码输出", label);
                return Ok(());
            }
            OutputStatus::BuffersChanged => {
                debug!("[{}] 输出缓冲区已变化", label);
                return Ok(());
            }
            OutputStatus::FormatChanged(format) => {
                info!("[{}] 解码输出格式变化: {:?}", label, format);
                stage.on_format_changed(format.as_ref());
                return Ok(());
            }
            OutputStatus::Ready(unit) => unit,
        };

        let info = unit.info();
        self.stats.units_drained += 1;
        debug!(
            "[{}] 解码输出 #{} (size={}, pts={}us)",
            label, info.index, info.size, info.pts_us
        );

        let mut do_loop = false;
        if info.is_end_of_stream() {
            info!("{} 🏁 [{}] 输出流结束", log_ctx(), label);
            if self.loop_mode {
                do_loop = true;
            } else {
                self.output_done = true;
            }
        }

        let render = {
            let payload: &[u8] = if stage.wants_payload() && info.size > 0 {
                decoder.output_buffer(&unit)?
            } else {
                &[]
            };
            stage.before_release(&info, payload)?
        };
        decoder.release_output(unit, render)?;
        if render {
            self.stats.units_rendered += 1;
        }
        stage.after_release(&info, render);

        if do_loop {
            info!("{} 🔁 [{}] 到达结尾，循环播放", log_ctx(), label);
            reader.seek_to(0, SeekMode::ClosestSync)?;
            self.input_done = false;
            self.last_fed_pts = None;
            decoder.flush()?;
            self.stats.loops += 1;
            stage.on_loop_reset();
        }
        Ok(())
    }

    /// 运行解码循环直到流结束、停止请求或致命错误
    ///
    /// 停止请求在每轮迭代开始时检查，不会排空剩余输出。
    /// 轨道资源在任何退出路径上都于 `on_exit` 之前释放。
    pub fn run(mut self, control: &TaskControl, stage: &mut dyn OutputStage) -> PumpReport {
        info!("{} 🎬 [{}] 解码循环启动: {}", log_ctx(), self.resources.label, self.resources.reader.description());
        stage.on_start();

        let (exit, error) = match self.run_loop(control, stage) {
            Ok(exit) => (exit, None),
            Err(e) => {
                error!("{} ❌ [{}] 解码失败: {}", log_ctx(), self.resources.label, e);
                (PumpExit::Failed, Some(e))
            }
        };

        let DecodePump {
            resources,
            stats,
            input_done,
            output_done,
            ..
        } = self;
        drop(resources);
        stage.on_exit(exit);

        info!(
            "{} 🛑 解码循环退出: {:?}（送入 {} 个样本，输出 {} 个单元，渲染 {} 个，循环 {} 次）",
            log_ctx(),
            exit,
            stats.samples_fed,
            stats.units_drained,
            stats.units_rendered,
            stats.loops
        );
        PumpReport {
            exit,
            stats,
            input_done,
            output_done,
            error,
        }
    }

    fn run_loop(&mut self, control: &TaskControl, stage: &mut dyn OutputStage) -> Result<PumpExit> {
        let mut paused = false;
        while !self.output_done {
            match control.state() {
                PlaybackState::StopRequested | PlaybackState::Stopped => {
                    info!("{} ⏹ [{}] 收到停止请求", log_ctx(), self.resources.label);
                    return Ok(PumpExit::Stopped);
                }
                PlaybackState::Paused => {
                    if !paused {
                        info!("{} ⏸ [{}] 暂停", log_ctx(), self.resources.label);
                        stage.on_pause();
                        paused = true;
                    }
                    thread::sleep(self.pause_poll);
                    continue;
                }
                PlaybackState::Idle | PlaybackState::Running => {
                    if paused {
                        info!("{} ▶ [{}] 恢复", log_ctx(), self.resources.label);
                        stage.on_resume();
                        paused = false;
                    }
                }
            }

            if !self.input_done {
                self.feed_input()?;
            }
            if !self.output_done {
                self.drain_output(stage)?;
            }
        }
        Ok(PumpExit::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CodedSample, MediaKind};
    use crate::player::memory::{MemoryContainer, PassthroughDecoder, ResourceProbe};
    use crate::player::track_selector::open_track;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl OutputStage for Recorder {
        fn before_release(&mut self, unit: &UnitInfo, _payload: &[u8]) -> Result<bool> {
            self.events.push(format!("unit:{}", unit.pts_us));
            Ok(unit.size > 0)
        }

        fn on_loop_reset(&mut self) {
            self.events.push("loop".to_string());
        }

        fn on_exit(&mut self, exit: PumpExit) {
            self.events.push(format!("exit:{:?}", exit));
        }
    }

    fn pump(samples: usize, decoder_probe: &ResourceProbe, reader_probe: &ResourceProbe) -> DecodePump {
        pump_with(samples, reader_probe, |_| PassthroughDecoder::with_options(4, 1, decoder_probe.clone()))
    }

    fn pump_with(
        samples: usize,
        reader_probe: &ResourceProbe,
        decoder: impl FnOnce(&TrackFormat) -> PassthroughDecoder,
    ) -> DecodePump {
        let samples: Vec<CodedSample> = (0..samples as i64)
            .map(|i| CodedSample::new(vec![i as u8; 16], i * 1_000))
            .collect();
        let mut reader = MemoryContainer::builder()
            .track(TrackFormat::video("video/raw", 4, 4, Some(30)), samples)
            .probe(reader_probe.clone())
            .build();
        let track = open_track(&mut reader, MediaKind::Video).unwrap();
        let mut decoder = decoder(&track.format);
        decoder.configure(&track.format, None).unwrap();
        decoder.start().unwrap();
        DecodePump::new(track, Box::new(decoder), Box::new(reader), &PlaybackConfig::default())
    }

    #[test]
    fn test_run_to_completion_releases_once() {
        let (dp, rp) = (ResourceProbe::new(), ResourceProbe::new());
        let control = TaskControl::new();
        control.start();
        let mut stage = Recorder::default();
        let report = pump(5, &dp, &rp).run(&control, &mut stage);

        assert_eq!(report.exit, PumpExit::Completed);
        assert!(report.input_done && report.output_done);
        assert_eq!(report.stats.samples_fed, 5);
        assert_eq!(report.stats.units_rendered, 5);
        assert_eq!(dp.release_count(), 1);
        assert_eq!(rp.release_count(), 1);
        assert_eq!(stage.events.last().map(String::as_str), Some("exit:Completed"));
    }

    #[test]
    fn test_failure_reports_error_and_stats() {
        let (dp, rp) = (ResourceProbe::new(), ResourceProbe::new());
        let control = TaskControl::new();
        control.start();
        let mut stage = Recorder::default();
        let report = pump_with(8, &rp, |_| PassthroughDecoder::with_options(4, 1, dp.clone()).fail_after(3, -1000))
            .run(&control, &mut stage);

        assert_eq!(report.exit, PumpExit::Failed);
        assert!(matches!(report.error, Some(PlayerError::DecoderStatus(-1000))));
        assert_eq!(report.stats.units_drained, 3);
        assert_eq!(report.stats.units_rendered, 3);
        assert!(report.stats.samples_fed >= 4);
        assert!(!report.output_done);
        assert_eq!(dp.release_count(), 1);
        assert_eq!(rp.release_count(), 1);
        assert_eq!(stage.events.last().map(String::as_str), Some("exit:Failed"));
    }

    #[test]
    fn test_stop_before_first_iteration_still_releases() {
        let (dp, rp) = (ResourceProbe::new(), ResourceProbe::new());
        let control = TaskControl::new();
        control.start();
        control.request_stop();
        let mut stage = Recorder::default();
        let report = pump(5, &dp, &rp).run(&control, &mut stage);

        assert_eq!(report.exit, PumpExit::Stopped);
        assert_eq!(report.stats.samples_fed, 0);
        assert_eq!(dp.release_count(), 1);
        assert_eq!(rp.release_count(), 1);
    }

    #[test]
    fn test_loop_rewinds_input_and_notifies() {
        let (dp, rp) = (ResourceProbe::new(), ResourceProbe::new());
        let mut pump = pump(3, &dp, &rp);
        pump.set_loop(true);
        let mut stage = Recorder::default();

        let mut guard = 0;
        while !stage.events.iter().any(|e| e == "loop") {
            if !pump.input_done() {
                pump.feed_input().unwrap();
            }
            pump.drain_output(&mut stage).unwrap();
            guard += 1;
            assert!(guard < 100, "loop reset never fired");
        }
        assert!(!pump.input_done());
        assert!(!pump.output_done());
        assert_eq!(pump.last_fed_pts(), None);

        pump.feed_input().unwrap();
        assert_eq!(pump.last_fed_pts(), Some(0));
        assert_eq!(pump.stats().loops, 1);
    }
}
