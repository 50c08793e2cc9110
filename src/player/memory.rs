// 内存后端：内存容器 + 透传解码器
// 用于原始（未压缩）基本流、无头运行与测试

use crate::core::{
    BufferFlags, CodedSample, InputSlot, OutputStatus, OutputUnit, PlayerError, RenderTarget, Result, SeekMode,
    TrackFormat,
};
use crate::player::codec::Decoder;
use crate::player::container::ContainerReader;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// 资源释放计数（跨线程观察 release 调用次数）
#[derive(Debug, Clone, Default)]
pub struct ResourceProbe {
    released: Arc<AtomicUsize>,
}

impl ResourceProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn release_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    fn mark_released(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct MemoryTrack {
    format: TrackFormat,
    samples: Vec<CodedSample>,
}

/// 内存容器构建器
#[derive(Default)]
pub struct MemoryContainerBuilder {
    tracks: Vec<MemoryTrack>,
    probe: Option<ResourceProbe>,
    name: Option<String>,
}

impl MemoryContainerBuilder {
    pub fn track(mut self, format: TrackFormat, samples: Vec<CodedSample>) -> Self {
        self.tracks.push(MemoryTrack { format, samples });
        self
    }

    pub fn probe(mut self, probe: ResourceProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn build(self) -> MemoryContainer {
        let count = self.tracks.len();
        MemoryContainer {
            tracks: Arc::new(self.tracks),
            selected: vec![false; count],
            cursors: vec![0; count],
            probe: self.probe.unwrap_or_default(),
            name: self.name.unwrap_or_else(|| "memory".to_string()),
            released: false,
        }
    }
}

/// 内存容器 - 样本数据在克隆间共享，读取位置各自独立
#[derive(Debug)]
pub struct MemoryContainer {
    tracks: Arc<Vec<MemoryTrack>>,
    selected: Vec<bool>,
    cursors: Vec<usize>,
    probe: ResourceProbe,
    name: String,
    released: bool,
}

impl MemoryContainer {
    pub fn builder() -> MemoryContainerBuilder {
        MemoryContainerBuilder::default()
    }

    /// 新的读取实例（共享数据，独立游标与释放计数）
    pub fn reader(&self, probe: ResourceProbe) -> MemoryContainer {
        MemoryContainer {
            tracks: self.tracks.clone(),
            selected: vec![false; self.tracks.len()],
            cursors: vec![0; self.tracks.len()],
            probe,
            name: self.name.clone(),
            released: false,
        }
    }

    /// 当前样本：所有已选轨道中时间戳最小的一个
    fn current(&self) -> Option<(usize, &CodedSample)> {
        self.tracks
            .iter()
            .enumerate()
            .filter(|(index, _)| self.selected[*index])
            .filter_map(|(index, track)| track.samples.get(self.cursors[index]).map(|s| (index, s)))
            .min_by_key(|(_, sample)| sample.pts_us)
    }

    fn sync_points(samples: &[CodedSample]) -> Vec<usize> {
        let keys: Vec<usize> = samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.flags.contains(BufferFlags::KEY_FRAME))
            .map(|(i, _)| i)
            .collect();
        // 未标注关键帧时每个样本都可作为同步点
        if keys.is_empty() {
            (0..samples.len()).collect()
        } else {
            keys
        }
    }

    fn seek_cursor(samples: &[CodedSample], time_us: i64, mode: SeekMode) -> usize {
        let points = Self::sync_points(samples);
        let previous = points.iter().rev().find(|&&i| samples[i].pts_us <= time_us).copied();
        let next = points.iter().find(|&&i| samples[i].pts_us >= time_us).copied();
        let chosen = match mode {
            SeekMode::PreviousSync => previous.or(next),
            SeekMode::NextSync => next.or(previous),
            SeekMode::ClosestSync => match (previous, next) {
                (Some(p), Some(n)) => {
                    if time_us - samples[p].pts_us <= samples[n].pts_us - time_us {
                        Some(p)
                    } else {
                        Some(n)
                    }
                }
                (p, n) => p.or(n),
            },
        };
        chosen.unwrap_or(samples.len())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.released {
            return Err(PlayerError::SourceUnreadable(format!("{} 已释放", self.name)));
        }
        Ok(())
    }
}

impl ContainerReader for MemoryContainer {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, index: usize) -> Result<TrackFormat> {
        self.tracks
            .get(index)
            .map(|t| t.format.clone())
            .ok_or_else(|| PlayerError::Other(format!("轨道索引越界: {}", index)))
    }

    fn select_track(&mut self, index: usize) -> Result<()> {
        self.ensure_open()?;
        match self.selected.get_mut(index) {
            Some(selected) => {
                *selected = true;
                Ok(())
            }
            None => Err(PlayerError::Other(format!("轨道索引越界: {}", index))),
        }
    }

    fn read_sample_data(&mut self, buf: &mut Vec<u8>) -> Result<Option<usize>> {
        self.ensure_open()?;
        buf.clear();
        match self.current() {
            Some((_, sample)) => {
                buf.extend_from_slice(&sample.data);
                Ok(Some(sample.data.len()))
            }
            None => Ok(None),
        }
    }

    fn sample_time_us(&self) -> Option<i64> {
        self.current().map(|(_, s)| s.pts_us)
    }

    fn sample_track_index(&self) -> Option<usize> {
        self.current().map(|(index, _)| index)
    }

    fn sample_flags(&self) -> BufferFlags {
        self.current().map(|(_, s)| s.flags).unwrap_or_default()
    }

    fn advance(&mut self) -> bool {
        if let Some((index, _)) = self.current() {
            self.cursors[index] += 1;
        }
        self.current().is_some()
    }

    fn seek_to(&mut self, time_us: i64, mode: SeekMode) -> Result<()> {
        self.ensure_open()?;
        for (index, track) in self.tracks.iter().enumerate() {
            if self.selected[index] {
                self.cursors[index] = Self::seek_cursor(&track.samples, time_us, mode);
            }
        }
        debug!("{} seek_to {}us ({:?})", self.name, time_us, mode);
        Ok(())
    }

    fn release(&mut self) {
        if self.released {
            warn!("⚠️ {} 重复释放", self.name);
            return;
        }
        self.released = true;
        self.probe.mark_released();
    }

    fn description(&self) -> String {
        format!("MemoryContainer({}, {} tracks)", self.name, self.tracks.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodecState {
    Uninitialized,
    Configured,
    Started,
    Stopped,
    Released,
}

#[derive(Debug)]
struct PendingUnit {
    data: Vec<u8>,
    pts_us: i64,
    flags: BufferFlags,
}

/// 透传解码器 - 原始 PCM / 原始视频的恒等"解码"
///
/// 行为与异步缓冲队列解码器一致：固定数量的输入槽位，
/// `latency` 个单元的流水线深度，输出单元必须被恰好释放一次。
/// 没有可用槽位或输出时，出队调用最多等待 `timeout`。
pub struct PassthroughDecoder {
    state: CodecState,
    input_slots: Vec<Vec<u8>>,
    free_inputs: VecDeque<usize>,
    dequeued_inputs: Vec<bool>,
    decoded: VecDeque<PendingUnit>,
    outputs: Vec<Option<Vec<u8>>>,
    latency: usize,
    eos_queued: bool,
    format_announced: bool,
    units_released: usize,
    units_rendered: usize,
    units_emitted: usize,
    // 输出若干单元后返回的原始错误状态码
    fail_after: Option<(usize, i32)>,
    probe: ResourceProbe,
}

impl PassthroughDecoder {
    pub const SUPPORTED_MIMES: [&'static str; 2] = ["audio/raw", "video/raw"];

    pub fn new() -> Self {
        Self::with_options(4, 1, ResourceProbe::default())
    }

    pub fn with_options(input_slots: usize, latency: usize, probe: ResourceProbe) -> Self {
        let slots = input_slots.max(1);
        Self {
            state: CodecState::Uninitialized,
            input_slots: vec![Vec::new(); slots],
            free_inputs: (0..slots).collect(),
            dequeued_inputs: vec![false; slots],
            decoded: VecDeque::new(),
            outputs: Vec::new(),
            latency,
            eos_queued: false,
            format_announced: false,
            units_released: 0,
            units_rendered: 0,
            units_emitted: 0,
            fail_after: None,
            probe,
        }
    }

    /// 故障注入：输出 `units` 个单元后，下一次取输出返回原始状态码 `raw_status`
    ///
    /// `raw_status` 应为非信息类的负数状态码，取输出时映射为 `PlayerError::DecoderStatus`。
    pub fn fail_after(mut self, units: usize, raw_status: i32) -> Self {
        self.fail_after = Some((units, raw_status));
        self
    }

    /// 创建匹配格式的透传解码器（不支持的格式返回错误）
    pub fn for_format(format: &TrackFormat, probe: ResourceProbe) -> Result<Box<dyn Decoder>> {
        if !Self::SUPPORTED_MIMES.contains(&format.mime.as_str()) {
            return Err(PlayerError::DecodeError(format!("透传解码器不支持格式: {}", format.mime)));
        }
        Ok(Box::new(Self::with_options(4, 1, probe)))
    }

    /// 尚未释放的输出单元数量
    pub fn outstanding_outputs(&self) -> usize {
        self.outputs.iter().filter(|o| o.is_some()).count()
    }

    pub fn units_released(&self) -> usize {
        self.units_released
    }

    pub fn units_rendered(&self) -> usize {
        self.units_rendered
    }

    fn ensure_started(&self) -> Result<()> {
        if self.state != CodecState::Started {
            return Err(PlayerError::DecodeError(format!("解码器状态错误: {:?}", self.state)));
        }
        Ok(())
    }

    fn allocate_output(&mut self, data: Vec<u8>) -> usize {
        match self.outputs.iter().position(|o| o.is_none()) {
            Some(index) => {
                self.outputs[index] = Some(data);
                index
            }
            None => {
                self.outputs.push(Some(data));
                self.outputs.len() - 1
            }
        }
    }
}

impl Default for PassthroughDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PassthroughDecoder {
    fn configure(&mut self, format: &TrackFormat, _target: Option<&RenderTarget>) -> Result<()> {
        if self.state != CodecState::Uninitialized {
            return Err(PlayerError::DecodeError("解码器已配置".to_string()));
        }
        debug!("透传解码器配置: {}", format.mime);
        self.state = CodecState::Configured;
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.state != CodecState::Configured {
            return Err(PlayerError::DecodeError(format!("无法启动，当前状态: {:?}", self.state)));
        }
        self.state = CodecState::Started;
        Ok(())
    }

    fn dequeue_input_slot(&mut self, timeout: Duration) -> Result<Option<InputSlot>> {
        self.ensure_started()?;
        // 槽位只会在本线程内归还，等待期间不会出现新的空闲槽位
        let free = if self.eos_queued { None } else { self.free_inputs.pop_front() };
        match free {
            Some(index) => {
                self.dequeued_inputs[index] = true;
                Ok(Some(InputSlot(index)))
            }
            None => {
                thread::sleep(timeout);
                Ok(None)
            }
        }
    }

    fn input_buffer(&mut self, slot: InputSlot) -> Result<&mut Vec<u8>> {
        if !self.dequeued_inputs.get(slot.0).copied().unwrap_or(false) {
            return Err(PlayerError::DecodeError(format!("输入槽位未出队: {}", slot.0)));
        }
        Ok(&mut self.input_slots[slot.0])
    }

    fn queue_input(&mut self, slot: InputSlot, size: usize, pts_us: i64, flags: BufferFlags) -> Result<()> {
        self.ensure_started()?;
        if !self.dequeued_inputs.get(slot.0).copied().unwrap_or(false) {
            return Err(PlayerError::DecodeError(format!("输入槽位未出队: {}", slot.0)));
        }
        let buffer = &mut self.input_slots[slot.0];
        let data: Vec<u8> = buffer.drain(..size.min(buffer.len())).collect();
        buffer.clear();
        self.dequeued_inputs[slot.0] = false;
        self.free_inputs.push_back(slot.0);

        if flags.is_end_of_stream() {
            self.eos_queued = true;
        }
        // 零长度的流结束标记只携带标志，附着到最后一个待输出单元或单独输出
        if data.is_empty() && flags.is_end_of_stream() {
            match self.decoded.back_mut() {
                Some(last) => last.flags.insert(BufferFlags::END_OF_STREAM),
                None => self.decoded.push_back(PendingUnit {
                    data,
                    pts_us,
                    flags,
                }),
            }
            return Ok(());
        }
        self.decoded.push_back(PendingUnit { data, pts_us, flags });
        Ok(())
    }

    fn dequeue_output(&mut self, timeout: Duration) -> Result<OutputStatus> {
        self.ensure_started()?;
        if !self.format_announced && !self.decoded.is_empty() {
            self.format_announced = true;
            return Ok(OutputStatus::FormatChanged(None));
        }
        let ready = self.decoded.len() > self.latency || self.eos_queued;
        if !ready || self.decoded.is_empty() {
            thread::sleep(timeout);
            return Ok(OutputStatus::TryAgainLater);
        }
        if let Some((units, raw_status)) = self.fail_after {
            if self.units_emitted >= units {
                warn!("透传解码器注入故障: 状态码 {}", raw_status);
                return OutputStatus::from_raw(raw_status, 0, 0, BufferFlags::NONE);
            }
        }
        match self.decoded.pop_front() {
            Some(pending) => {
                self.units_emitted += 1;
                let size = pending.data.len();
                let index = self.allocate_output(pending.data);
                Ok(OutputStatus::Ready(OutputUnit::new(index, size, pending.pts_us, pending.flags)))
            }
            None => Ok(OutputStatus::TryAgainLater),
        }
    }

    fn output_buffer(&self, unit: &OutputUnit) -> Result<&[u8]> {
        self.outputs
            .get(unit.index())
            .and_then(|o| o.as_deref())
            .ok_or_else(|| PlayerError::DecodeError(format!("输出单元 {} 已释放", unit.index())))
    }

    fn release_output(&mut self, unit: OutputUnit, render: bool) -> Result<()> {
        match self.outputs.get_mut(unit.index()).and_then(|o| o.take()) {
            Some(_) => {
                self.units_released += 1;
                if render {
                    self.units_rendered += 1;
                }
                Ok(())
            }
            None => Err(PlayerError::DecodeError(format!("输出单元 {} 重复释放", unit.index()))),
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_started()?;
        self.decoded.clear();
        self.outputs.iter_mut().for_each(|o| *o = None);
        self.free_inputs = (0..self.input_slots.len()).collect();
        self.dequeued_inputs.iter_mut().for_each(|d| *d = false);
        self.input_slots.iter_mut().for_each(|b| b.clear());
        self.eos_queued = false;
        debug!("透传解码器已 flush");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        match self.state {
            CodecState::Started | CodecState::Configured => {
                self.state = CodecState::Stopped;
                Ok(())
            }
            state => Err(PlayerError::DecodeError(format!("无法停止，当前状态: {:?}", state))),
        }
    }

    fn release(&mut self) {
        if self.state == CodecState::Released {
            warn!("⚠️ 透传解码器重复释放");
            return;
        }
        info!(
            "透传解码器释放（已释放 {} 个输出单元，渲染 {} 个）",
            self.units_released, self.units_rendered
        );
        self.state = CodecState::Released;
        self.decoded.clear();
        self.outputs.clear();
        self.probe.mark_released();
    }

    fn name(&self) -> String {
        "passthrough".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started_decoder() -> PassthroughDecoder {
        let mut decoder = PassthroughDecoder::with_options(2, 0, ResourceProbe::new());
        decoder.configure(&TrackFormat::audio("audio/raw", 2, 44100), None).unwrap();
        decoder.start().unwrap();
        decoder
    }

    fn queue(decoder: &mut PassthroughDecoder, data: &[u8], pts_us: i64, flags: BufferFlags) {
        let slot = decoder.dequeue_input_slot(Duration::ZERO).unwrap().unwrap();
        decoder.input_buffer(slot).unwrap().extend_from_slice(data);
        decoder.queue_input(slot, data.len(), pts_us, flags).unwrap();
    }

    fn next_unit(decoder: &mut PassthroughDecoder) -> OutputUnit {
        loop {
            match decoder.dequeue_output(Duration::ZERO).unwrap() {
                OutputStatus::Ready(unit) => return unit,
                OutputStatus::FormatChanged(_) | OutputStatus::BuffersChanged => continue,
                OutputStatus::TryAgainLater => panic!("no output ready"),
            }
        }
    }

    #[test]
    fn test_double_release_is_rejected() {
        let mut decoder = started_decoder();
        queue(&mut decoder, &[1, 2, 3], 0, BufferFlags::NONE);
        let unit = next_unit(&mut decoder);
        let forged = OutputUnit::new(unit.index(), unit.size(), unit.pts_us(), unit.flags());
        decoder.release_output(unit, false).unwrap();
        assert!(decoder.release_output(forged, false).is_err());
        assert_eq!(decoder.units_released(), 1);
        assert_eq!(decoder.outstanding_outputs(), 0);
    }

    #[test]
    fn test_input_slots_are_bounded() {
        let mut decoder = started_decoder();
        let a = decoder.dequeue_input_slot(Duration::ZERO).unwrap();
        let b = decoder.dequeue_input_slot(Duration::ZERO).unwrap();
        assert!(a.is_some() && b.is_some());
        assert_eq!(decoder.dequeue_input_slot(Duration::ZERO).unwrap(), None);
    }

    #[test]
    fn test_empty_eos_marker_attaches_to_last_unit() {
        let mut decoder = started_decoder();
        queue(&mut decoder, &[9; 4], 1_000, BufferFlags::NONE);
        queue(&mut decoder, &[], 0, BufferFlags::END_OF_STREAM);
        let unit = next_unit(&mut decoder);
        assert_eq!(unit.size(), 4);
        assert!(unit.flags().is_end_of_stream());
        assert_eq!(decoder.output_buffer(&unit).unwrap(), &[9; 4]);
        decoder.release_output(unit, false).unwrap();
    }

    #[test]
    fn test_flush_discards_in_flight_units() {
        let mut decoder = started_decoder();
        queue(&mut decoder, &[1], 0, BufferFlags::NONE);
        queue(&mut decoder, &[2], 1_000, BufferFlags::END_OF_STREAM);
        decoder.flush().unwrap();
        assert_eq!(decoder.dequeue_output(Duration::ZERO).unwrap(), OutputStatus::TryAgainLater);
        assert!(decoder.dequeue_input_slot(Duration::ZERO).unwrap().is_some());
    }

    #[test]
    fn test_dequeue_waits_for_timeout_when_nothing_is_ready() {
        let mut decoder = started_decoder();
        let timeout = Duration::from_millis(30);

        let begin = std::time::Instant::now();
        assert_eq!(decoder.dequeue_output(timeout).unwrap(), OutputStatus::TryAgainLater);
        assert!(begin.elapsed() >= timeout);

        decoder.dequeue_input_slot(Duration::ZERO).unwrap();
        decoder.dequeue_input_slot(Duration::ZERO).unwrap();
        let begin = std::time::Instant::now();
        assert_eq!(decoder.dequeue_input_slot(timeout).unwrap(), None);
        assert!(begin.elapsed() >= timeout);
    }

    #[test]
    fn test_injected_failure_after_units() {
        let mut decoder = PassthroughDecoder::with_options(4, 0, ResourceProbe::new()).fail_after(1, -1000);
        decoder.configure(&TrackFormat::audio("audio/raw", 1, 8000), None).unwrap();
        decoder.start().unwrap();
        queue(&mut decoder, &[1, 1], 0, BufferFlags::NONE);
        queue(&mut decoder, &[2, 2], 1_000, BufferFlags::NONE);

        let unit = next_unit(&mut decoder);
        decoder.release_output(unit, false).unwrap();
        assert!(matches!(
            decoder.dequeue_output(Duration::ZERO),
            Err(PlayerError::DecoderStatus(-1000))
        ));
    }

    #[test]
    fn test_memory_container_seek_rewinds_to_sync_point() {
        let mut samples: Vec<CodedSample> = (0..6).map(|i| CodedSample::new(vec![i as u8], i * 10_000)).collect();
        samples[0].flags = BufferFlags::KEY_FRAME;
        samples[3].flags = BufferFlags::KEY_FRAME;
        let mut reader = MemoryContainer::builder()
            .track(TrackFormat::video("video/raw", 4, 4, None), samples)
            .build();
        reader.select_track(0).unwrap();
        while reader.advance() {}
        assert_eq!(reader.sample_time_us(), None);

        reader.seek_to(45_000, SeekMode::PreviousSync).unwrap();
        assert_eq!(reader.sample_time_us(), Some(30_000));
        reader.seek_to(0, SeekMode::ClosestSync).unwrap();
        assert_eq!(reader.sample_time_us(), Some(0));
    }

    #[test]
    fn test_released_container_is_unreadable() {
        let probe = ResourceProbe::new();
        let mut reader = MemoryContainer::builder()
            .track(TrackFormat::audio("audio/raw", 1, 8000), vec![CodedSample::new(vec![0], 0)])
            .probe(probe.clone())
            .build();
        reader.release();
        reader.release();
        assert_eq!(probe.release_count(), 1);
        assert!(matches!(
            reader.read_sample_data(&mut Vec::new()),
            Err(PlayerError::SourceUnreadable(_))
        ));
    }
}
