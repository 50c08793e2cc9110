use crate::core::{BufferFlags, InputSlot, OutputStatus, OutputUnit, RenderTarget, Result, TrackFormat};
use log::debug;
use std::time::Duration;

/// 解码器能力接口（硬件或软件实现）
///
/// 输入端：出队空闲槽位 → 写入压缩数据 → 入队。
/// 输出端：有界等待出队输出单元 → 按值释放（渲染或丢弃）。
pub trait Decoder: Send {
    /// 配置解码器；视频解码器可以携带渲染目标
    fn configure(&mut self, format: &TrackFormat, target: Option<&RenderTarget>) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    /// 在 `timeout` 内等待空闲输入槽位，超时返回 None
    fn dequeue_input_slot(&mut self, timeout: Duration) -> Result<Option<InputSlot>>;

    /// 获取输入槽位的缓冲区
    fn input_buffer(&mut self, slot: InputSlot) -> Result<&mut Vec<u8>>;

    /// 提交输入槽位中的 `size` 字节
    fn queue_input(&mut self, slot: InputSlot, size: usize, pts_us: i64, flags: BufferFlags) -> Result<()>;

    /// 在 `timeout` 内等待输出
    ///
    /// 无法识别的负状态必须以 `PlayerError::DecoderStatus` 返回。
    fn dequeue_output(&mut self, timeout: Duration) -> Result<OutputStatus>;

    /// 读取输出单元的数据（音频 PCM 等）
    fn output_buffer(&self, unit: &OutputUnit) -> Result<&[u8]>;

    /// 释放输出单元；`render` 为 true 时送往渲染目标
    fn release_output(&mut self, unit: OutputUnit, render: bool) -> Result<()>;

    /// 清空内部状态，丢弃所有在途缓冲区
    fn flush(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    fn release(&mut self);

    fn name(&self) -> String;
}

/// 创建、配置并启动解码器；配置或启动失败时释放已创建的解码器
pub fn prepare_decoder(
    decoders: &dyn DecoderProvider,
    format: &TrackFormat,
    target: Option<&RenderTarget>,
) -> Result<Box<dyn Decoder>> {
    let mut decoder = decoders.create_decoder(format)?;
    let started = decoder.configure(format, target).and_then(|_| decoder.start());
    match started {
        Ok(()) => {
            debug!("解码器已启动: {} ({})", decoder.name(), format.mime);
            Ok(decoder)
        }
        Err(e) => {
            decoder.release();
            Err(e)
        }
    }
}

/// 按轨道格式创建解码器
pub trait DecoderProvider {
    fn create_decoder(&self, format: &TrackFormat) -> Result<Box<dyn Decoder>>;
}

impl<F> DecoderProvider for F
where
    F: Fn(&TrackFormat) -> Result<Box<dyn Decoder>>,
{
    fn create_decoder(&self, format: &TrackFormat) -> Result<Box<dyn Decoder>> {
        self(format)
    }
}
