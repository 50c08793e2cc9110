use crate::core::{BufferFlags, PlayerError, Result, SeekMode, TrackFormat};
use crate::player::container::ContainerReader;
use crate::player::decoder::FfmpegDecoderProvider;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, media};
use log::{debug, info, warn};

/// FFmpeg 解封装器 - 按轨道选择读取压缩样本
///
/// 每个播放器各自打开一个实例，读取位置互不影响。
pub struct FfmpegDemuxer {
    input: Option<format::context::Input>,
    source_path: String,
    selected: Vec<usize>,
    current: Option<ffmpeg::Packet>,
}

// Input / Packet 持有裸指针；每个实例只在其所属的解码线程中使用
unsafe impl Send for FfmpegDemuxer {}

impl FfmpegDemuxer {
    /// 打开媒体文件
    pub fn open(path: &str) -> Result<Self> {
        info!("正在打开文件: {}", path);
        let input = format::input(&path)
            .map_err(|e| PlayerError::SourceUnreadable(format!("无法打开文件 {}: {}", path, e)))?;
        debug!("轨道数: {}", input.streams().count());
        Ok(Self {
            input: Some(input),
            source_path: path.to_string(),
            selected: Vec::new(),
            current: None,
        })
    }

    /// 为本文件的所有轨道建立解码器工厂
    pub fn decoder_provider(&self) -> Result<FfmpegDecoderProvider> {
        let input = self.input()?;
        let mut provider = FfmpegDecoderProvider::default();
        for index in 0..input.streams().count() {
            let format = self.track_format(index)?;
            if let Some(stream) = input.stream(index) {
                provider.register(format.mime, stream.parameters());
            }
        }
        Ok(provider)
    }

    fn input(&self) -> Result<&format::context::Input> {
        self.input
            .as_ref()
            .ok_or_else(|| PlayerError::SourceUnreadable(format!("{} 已释放", self.source_path)))
    }

    fn time_base_us(&self, stream_index: usize) -> f64 {
        self.input
            .as_ref()
            .and_then(|input| input.stream(stream_index))
            .map(|stream| {
                let tb = stream.time_base();
                if tb.denominator() == 0 {
                    0.0
                } else {
                    tb.numerator() as f64 * 1_000_000.0 / tb.denominator() as f64
                }
            })
            .unwrap_or(0.0)
    }

    /// 读取下一个属于已选轨道的包；文件末尾返回 Ok(false)
    fn fill(&mut self) -> Result<bool> {
        self.current = None;
        let input = match self.input.as_mut() {
            Some(input) => input,
            None => return Err(PlayerError::SourceUnreadable(format!("{} 已释放", self.source_path))),
        };
        loop {
            let mut packet = ffmpeg::Packet::empty();
            match packet.read(input) {
                Ok(()) => {
                    if self.selected.contains(&packet.stream()) {
                        self.current = Some(packet);
                        return Ok(true);
                    }
                }
                Err(ffmpeg::Error::Eof) => return Ok(false),
                Err(e) => return Err(PlayerError::SourceUnreadable(format!("读取数据包失败: {}", e))),
            }
        }
    }
}

impl ContainerReader for FfmpegDemuxer {
    fn track_count(&self) -> usize {
        self.input.as_ref().map(|input| input.streams().count()).unwrap_or(0)
    }

    fn track_format(&self, index: usize) -> Result<TrackFormat> {
        let stream = self
            .input()?
            .stream(index)
            .ok_or_else(|| PlayerError::Other(format!("轨道索引越界: {}", index)))?;
        let parameters = stream.parameters();
        let codec_name = parameters.id().name().to_string();

        match parameters.medium() {
            media::Type::Video => {
                let decoder = codec::context::Context::from_parameters(parameters)?.decoder().video()?;
                let fps = stream.avg_frame_rate();
                let frame_rate = if fps.denominator() > 0 && fps.numerator() > 0 {
                    Some((fps.numerator() as f64 / fps.denominator() as f64).round() as u32)
                } else {
                    None
                };
                Ok(TrackFormat::video(
                    format!("video/{}", codec_name),
                    decoder.width(),
                    decoder.height(),
                    frame_rate,
                ))
            }
            media::Type::Audio => {
                let decoder = codec::context::Context::from_parameters(parameters)?.decoder().audio()?;
                Ok(TrackFormat::audio(
                    format!("audio/{}", codec_name),
                    decoder.channels(),
                    decoder.rate(),
                ))
            }
            other => Ok(TrackFormat {
                mime: format!("{:?}/{}", other, codec_name).to_lowercase(),
                ..TrackFormat::default()
            }),
        }
    }

    fn select_track(&mut self, index: usize) -> Result<()> {
        if index >= self.track_count() {
            return Err(PlayerError::Other(format!("轨道索引越界: {}", index)));
        }
        if !self.selected.contains(&index) {
            self.selected.push(index);
        }
        if self.current.is_none() {
            self.fill()?;
        }
        Ok(())
    }

    fn read_sample_data(&mut self, buf: &mut Vec<u8>) -> Result<Option<usize>> {
        self.input()?;
        buf.clear();
        match &self.current {
            Some(packet) => {
                if let Some(data) = packet.data() {
                    buf.extend_from_slice(data);
                }
                Ok(Some(buf.len()))
            }
            None => Ok(None),
        }
    }

    fn sample_time_us(&self) -> Option<i64> {
        let packet = self.current.as_ref()?;
        let pts = packet.pts().or(packet.dts())?;
        Some((pts as f64 * self.time_base_us(packet.stream())) as i64)
    }

    fn sample_track_index(&self) -> Option<usize> {
        self.current.as_ref().map(|packet| packet.stream())
    }

    fn sample_flags(&self) -> BufferFlags {
        match &self.current {
            Some(packet) if packet.is_key() => BufferFlags::KEY_FRAME,
            _ => BufferFlags::NONE,
        }
    }

    fn advance(&mut self) -> bool {
        match self.fill() {
            Ok(more) => more,
            Err(e) => {
                warn!("⚠️ {}，按流结束处理", e);
                false
            }
        }
    }

    fn seek_to(&mut self, time_us: i64, mode: SeekMode) -> Result<()> {
        let input = match self.input.as_mut() {
            Some(input) => input,
            None => return Err(PlayerError::SourceUnreadable(format!("{} 已释放", self.source_path))),
        };
        // 未指定流索引时时间戳单位为 AV_TIME_BASE（微秒）
        match mode {
            SeekMode::PreviousSync => input.seek(time_us, ..time_us + 1)?,
            SeekMode::NextSync => input.seek(time_us, time_us..)?,
            SeekMode::ClosestSync => input.seek(time_us, ..)?,
        }
        debug!("Seek 到 {}us ({:?})", time_us, mode);
        self.fill()?;
        Ok(())
    }

    fn release(&mut self) {
        self.current = None;
        if self.input.take().is_some() {
            debug!("已关闭 {}", self.source_path);
        }
    }

    fn description(&self) -> String {
        format!("FFmpeg Demuxer: {}", self.source_path)
    }
}
