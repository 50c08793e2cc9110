use crate::core::{
    BufferFlags, InputSlot, MediaKind, OutputStatus, OutputUnit, PixelFormat, PlayerError, RenderTarget, Result,
    TrackFormat, VideoFrame,
};
use crate::player::codec::{Decoder, DecoderProvider};
use crossbeam_channel::Sender;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, software, util};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::time::Duration;

/// 按 MIME 保存各轨道的编解码参数
#[derive(Default)]
pub struct FfmpegDecoderProvider {
    streams: Vec<(String, codec::Parameters)>,
}

impl FfmpegDecoderProvider {
    /// 同一 MIME 只保留第一个（与轨道选择的首个匹配一致）
    pub fn register(&mut self, mime: String, parameters: codec::Parameters) {
        if !self.streams.iter().any(|(known, _)| *known == mime) {
            self.streams.push((mime, parameters));
        }
    }
}

impl DecoderProvider for FfmpegDecoderProvider {
    fn create_decoder(&self, format: &TrackFormat) -> Result<Box<dyn Decoder>> {
        let parameters = self
            .streams
            .iter()
            .find(|(mime, _)| *mime == format.mime)
            .map(|(_, parameters)| parameters.clone())
            .ok_or_else(|| PlayerError::DecodeError(format!("没有 {} 的解码参数", format.mime)))?;
        Ok(Box::new(FfmpegDecoder::new(parameters)))
    }
}

/// 软件解码上下文
enum Inner {
    Video {
        decoder: codec::decoder::Video,
        scaler: Option<software::scaling::Context>,
    },
    Audio {
        decoder: codec::decoder::Audio,
        resampler: Option<software::resampling::Context>,
    },
}

/// 已解码但尚未释放的输出
struct Decoded {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

/// FFmpeg 软件解码器
///
/// 单输入槽位；包时间戳以微秒送入，解码帧的时间戳原样带出。
/// 视频输出转换为 RGBA，渲染时发送到 `Sender<VideoFrame>` 渲染目标；
/// 音频输出转换为交错 16 位 PCM。
pub struct FfmpegDecoder {
    parameters: Option<codec::Parameters>,
    format: TrackFormat,
    inner: Option<Inner>,
    target: Option<Sender<VideoFrame>>,
    input: Vec<u8>,
    input_busy: bool,
    pending: Option<ffmpeg::Packet>,
    eof_pending: bool,
    eof_sent: bool,
    eos_emitted: bool,
    format_reported: bool,
    last_pts_us: i64,
    ready: VecDeque<OutputUnit>,
    outputs: Vec<Option<Decoded>>,
    started: bool,
}

// 解码上下文与 SwsContext 不是 Send，但每个解码器实例只在其解码线程中使用
unsafe impl Send for FfmpegDecoder {}

impl FfmpegDecoder {
    pub fn new(parameters: codec::Parameters) -> Self {
        Self {
            parameters: Some(parameters),
            format: TrackFormat::default(),
            inner: None,
            target: None,
            input: Vec::new(),
            input_busy: false,
            pending: None,
            eof_pending: false,
            eof_sent: false,
            eos_emitted: false,
            format_reported: false,
            last_pts_us: 0,
            ready: VecDeque::new(),
            outputs: Vec::new(),
            started: false,
        }
    }

    fn inner_mut(&mut self) -> Result<&mut Inner> {
        self.inner
            .as_mut()
            .ok_or_else(|| PlayerError::DecodeError("解码器未配置".to_string()))
    }

    fn send(&mut self, packet: &ffmpeg::Packet) -> std::result::Result<(), ffmpeg::Error> {
        match self.inner_mut() {
            Ok(Inner::Video { decoder, .. }) => decoder.send_packet(packet),
            Ok(Inner::Audio { decoder, .. }) => decoder.send_packet(packet),
            Err(_) => Err(ffmpeg::Error::InvalidData),
        }
    }

    fn send_eof(&mut self) -> std::result::Result<(), ffmpeg::Error> {
        match self.inner_mut() {
            Ok(Inner::Video { decoder, .. }) => decoder.send_eof(),
            Ok(Inner::Audio { decoder, .. }) => decoder.send_eof(),
            Err(_) => Err(ffmpeg::Error::InvalidData),
        }
    }

    /// 重新提交之前被拒绝（EAGAIN）的包和 EOF
    fn resend_pending(&mut self) -> Result<()> {
        if let Some(packet) = self.pending.take() {
            match self.send(&packet) {
                Ok(()) => {}
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                    self.pending = Some(packet);
                    return Ok(());
                }
                Err(e) => warn!("解码错误（已跳过）: {}", e),
            }
        }
        if self.eof_pending && self.pending.is_none() {
            match self.send_eof() {
                Ok(()) | Err(ffmpeg::Error::Eof) => {
                    self.eof_pending = false;
                    self.eof_sent = true;
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn store(&mut self, decoded: Decoded) -> usize {
        match self.outputs.iter().position(|slot| slot.is_none()) {
            Some(index) => {
                self.outputs[index] = Some(decoded);
                index
            }
            None => {
                self.outputs.push(Some(decoded));
                self.outputs.len() - 1
            }
        }
    }

    /// 取出一帧并转换；没有可用帧时返回 Err(EAGAIN / Eof)
    fn receive(&mut self) -> std::result::Result<(Decoded, i64), ffmpeg::Error> {
        let (target_rate, target_channels) = (
            self.format.sample_rate.unwrap_or(0),
            self.format.channel_count.unwrap_or(0),
        );
        match self.inner.as_mut() {
            Some(Inner::Video { decoder, scaler }) => {
                let mut frame = util::frame::Video::empty();
                decoder.receive_frame(&mut frame)?;
                let pts_us = frame.timestamp().unwrap_or(0);
                Ok((convert_video(&frame, scaler)?, pts_us))
            }
            Some(Inner::Audio { decoder, resampler }) => {
                let mut frame = util::frame::Audio::empty();
                decoder.receive_frame(&mut frame)?;
                let pts_us = frame.timestamp().unwrap_or(0);
                Ok((convert_audio(&frame, resampler, target_rate, target_channels)?, pts_us))
            }
            None => Err(ffmpeg::Error::InvalidData),
        }
    }
}

/// 转换为紧密排列的 RGBA
fn convert_video(
    frame: &util::frame::Video,
    scaler: &mut Option<software::scaling::Context>,
) -> std::result::Result<Decoded, ffmpeg::Error> {
    let width = frame.width();
    let height = frame.height();

    if scaler.is_none() {
        *scaler = Some(software::scaling::Context::get(
            frame.format(),
            width,
            height,
            util::format::Pixel::RGBA,
            width,
            height,
            software::scaling::Flags::BILINEAR,
        )?);
    }
    let mut rgba_frame = util::frame::Video::empty();
    if let Some(scaler) = scaler.as_mut() {
        scaler.run(frame, &mut rgba_frame)?;
    }

    let row_size = width as usize * 4;
    let mut data = vec![0u8; row_size * height as usize];
    let stride = rgba_frame.stride(0);
    let frame_data = rgba_frame.data(0);
    for y in 0..height as usize {
        let src_offset = y * stride;
        let dst_offset = y * row_size;
        data[dst_offset..dst_offset + row_size].copy_from_slice(&frame_data[src_offset..src_offset + row_size]);
    }
    Ok(Decoded { data, width, height })
}

/// 转换为交错 16 位 PCM（轨道声明的采样率与声道数）
fn convert_audio(
    frame: &util::frame::Audio,
    resampler: &mut Option<software::resampling::Context>,
    target_rate: u32,
    target_channels: u16,
) -> std::result::Result<Decoded, ffmpeg::Error> {
    if resampler.is_none() {
        let source_layout = if frame.channel_layout().is_empty() {
            util::channel_layout::ChannelLayout::default(frame.channels() as i32)
        } else {
            frame.channel_layout()
        };
        debug!(
            "🔧 初始化音频重采样器: {}Hz/{}ch → {}Hz/{}ch",
            frame.rate(),
            frame.channels(),
            target_rate,
            target_channels
        );
        *resampler = Some(software::resampling::Context::get(
            frame.format(),
            source_layout,
            frame.rate(),
            util::format::Sample::I16(util::format::sample::Type::Packed),
            util::channel_layout::ChannelLayout::default(target_channels as i32),
            target_rate,
        )?);
    }
    let mut resampled = util::frame::Audio::empty();
    if let Some(resampler) = resampler.as_mut() {
        resampler.run(frame, &mut resampled)?;
    }
    let size = resampled.samples() * target_channels as usize * 2;
    let plane = resampled.data(0);
    let data = plane[..size.min(plane.len())].to_vec();
    Ok(Decoded {
        data,
        width: 0,
        height: 0,
    })
}

impl Decoder for FfmpegDecoder {
    fn configure(&mut self, format: &TrackFormat, target: Option<&RenderTarget>) -> Result<()> {
        let parameters = self
            .parameters
            .take()
            .ok_or_else(|| PlayerError::DecodeError("解码器已配置".to_string()))?;
        let context = codec::context::Context::from_parameters(parameters)?;
        let inner = match format.kind() {
            Some(MediaKind::Video) => Inner::Video {
                decoder: context.decoder().video()?,
                scaler: None,
            },
            Some(MediaKind::Audio) => Inner::Audio {
                decoder: context.decoder().audio()?,
                resampler: None,
            },
            None => return Err(PlayerError::DecodeError(format!("不支持的格式: {}", format.mime))),
        };
        self.inner = Some(inner);
        self.format = format.clone();
        self.target = target.and_then(|t| t.downcast_ref::<Sender<VideoFrame>>()).cloned();
        if format.kind() == Some(MediaKind::Video) && self.target.is_none() {
            warn!("⚠️ 视频解码器没有可识别的渲染目标，帧将被丢弃");
        }
        info!("FFmpeg 解码器已配置: {}", format.mime);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.inner.is_none() {
            return Err(PlayerError::DecodeError("解码器未配置".to_string()));
        }
        self.started = true;
        Ok(())
    }

    fn dequeue_input_slot(&mut self, timeout: Duration) -> Result<Option<InputSlot>> {
        // 流结束后直到 flush 都不会再有空闲槽位
        if self.eof_pending || self.eof_sent {
            std::thread::sleep(timeout);
            return Ok(None);
        }
        // 解码是同步的：待发送的包只会在下一次取输出时送出，等待没有意义
        if !self.started || self.input_busy || self.pending.is_some() {
            return Ok(None);
        }
        self.input_busy = true;
        Ok(Some(InputSlot(0)))
    }

    fn input_buffer(&mut self, slot: InputSlot) -> Result<&mut Vec<u8>> {
        if slot.0 != 0 || !self.input_busy {
            return Err(PlayerError::DecodeError(format!("无效的输入槽位: {}", slot.0)));
        }
        Ok(&mut self.input)
    }

    fn queue_input(&mut self, slot: InputSlot, size: usize, pts_us: i64, flags: BufferFlags) -> Result<()> {
        if slot.0 != 0 || !self.input_busy {
            return Err(PlayerError::DecodeError(format!("无效的输入槽位: {}", slot.0)));
        }
        self.input_busy = false;
        if size > self.input.len() {
            return Err(PlayerError::DecodeError(format!("输入大小越界: {} > {}", size, self.input.len())));
        }
        if size > 0 {
            let mut packet = ffmpeg::Packet::copy(&self.input[..size]);
            packet.set_pts(Some(pts_us));
            packet.set_dts(None);
            if flags.contains(BufferFlags::KEY_FRAME) {
                packet.set_flags(codec::packet::Flags::KEY);
            }
            self.pending = Some(packet);
        }
        if flags.is_end_of_stream() {
            self.eof_pending = true;
        }
        self.resend_pending()
    }

    fn dequeue_output(&mut self, timeout: Duration) -> Result<OutputStatus> {
        if let Some(unit) = self.ready.pop_front() {
            return Ok(OutputStatus::Ready(unit));
        }
        self.resend_pending()?;
        match self.receive() {
            Ok((decoded, pts_us)) => {
                self.last_pts_us = pts_us;
                let (width, height, size) = (decoded.width, decoded.height, decoded.data.len());
                let index = self.store(decoded);
                let unit = OutputUnit::new(index, size, pts_us, BufferFlags::NONE);
                if !self.format_reported {
                    self.format_reported = true;
                    self.ready.push_back(unit);
                    let mut format = self.format.clone();
                    if format.kind() == Some(MediaKind::Video) {
                        format.width = Some(width);
                        format.height = Some(height);
                    }
                    return Ok(OutputStatus::FormatChanged(Some(format)));
                }
                Ok(OutputStatus::Ready(unit))
            }
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(OutputStatus::TryAgainLater),
            Err(ffmpeg::Error::Eof) => {
                if self.eos_emitted {
                    std::thread::sleep(timeout);
                    return Ok(OutputStatus::TryAgainLater);
                }
                self.eos_emitted = true;
                let index = self.store(Decoded {
                    data: Vec::new(),
                    width: 0,
                    height: 0,
                });
                Ok(OutputStatus::Ready(OutputUnit::new(
                    index,
                    0,
                    self.last_pts_us,
                    BufferFlags::END_OF_STREAM,
                )))
            }
            Err(e) => Err(PlayerError::DecodeError(format!("{}: {}", self.format.mime, e))),
        }
    }

    fn output_buffer(&self, unit: &OutputUnit) -> Result<&[u8]> {
        self.outputs
            .get(unit.index())
            .and_then(|slot| slot.as_ref())
            .map(|decoded| decoded.data.as_slice())
            .ok_or_else(|| PlayerError::DecodeError(format!("无效的输出单元: {}", unit.index())))
    }

    fn release_output(&mut self, unit: OutputUnit, render: bool) -> Result<()> {
        let decoded = self
            .outputs
            .get_mut(unit.index())
            .and_then(|slot| slot.take())
            .ok_or_else(|| PlayerError::DecodeError(format!("无效的输出单元: {}", unit.index())))?;
        if render && decoded.width > 0 {
            if let Some(target) = &self.target {
                let frame = VideoFrame {
                    pts_us: unit.pts_us(),
                    width: decoded.width,
                    height: decoded.height,
                    format: PixelFormat::RGBA,
                    data: decoded.data,
                };
                if target.send(frame).is_err() {
                    debug!("渲染目标已关闭，丢弃帧 pts={}us", unit.pts_us());
                }
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        match self.inner_mut()? {
            Inner::Video { decoder, .. } => decoder.flush(),
            Inner::Audio { decoder, .. } => decoder.flush(),
        }
        self.input_busy = false;
        self.pending = None;
        self.eof_pending = false;
        self.eof_sent = false;
        self.eos_emitted = false;
        self.ready.clear();
        self.outputs.clear();
        debug!("FFmpeg 解码器已清空: {}", self.format.mime);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.started = false;
        Ok(())
    }

    fn release(&mut self) {
        self.started = false;
        self.inner = None;
        self.parameters = None;
        self.outputs.clear();
        self.ready.clear();
        self.pending = None;
    }

    fn name(&self) -> String {
        format!("ffmpeg ({})", self.format.mime)
    }
}
