use crate::core::{PlayerError, Result};
use crate::player::audio_sink::{AudioSink, FramePosition};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
use crossbeam::queue::SegQueue;
use log::{debug, info, warn};
use std::sync::Arc;

/// 缓冲上限（秒）：缓冲满时 write 只接受放得下的部分，由调用方稍后重试
const MAX_BUFFERED_SECONDS: f64 = 0.5;

/// 音频输出 - 使用 cpal 播放 16 位 PCM
pub struct CpalAudioSink {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
    buffer: Arc<SegQueue<f32>>,
    // 设备回调实际消费的帧数（不含欠载时填充的静音）
    position: FramePosition,
}

// cpal::Stream 本身不是 Send，但它只在拥有该输出的音频播放线程中创建和使用
unsafe impl Send for CpalAudioSink {}

impl CpalAudioSink {
    /// 创建音频输出（设备必须支持请求的采样率与声道数）
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self> {
        info!("初始化音频输出: {} Hz, {} 声道", sample_rate, channels);

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::AudioError("无法找到音频输出设备".to_string()))?;

        debug!("使用音频设备: {}", device.name().unwrap_or_default());

        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let supported_configs = device
            .supported_output_configs()
            .map_err(|e| PlayerError::AudioError(format!("无法获取支持的音频配置: {}", e)))?;

        let mut is_supported = false;
        for supported_config in supported_configs {
            if Self::is_config_compatible(&config, &supported_config) {
                is_supported = true;
                break;
            }
        }
        // 音频时钟按轨道采样率换算，不能静默改用其他采样率
        if !is_supported {
            return Err(PlayerError::AudioError(format!(
                "音频设备不支持 {} Hz, {} 声道配置",
                sample_rate, channels
            )));
        }

        Ok(Self {
            device,
            config,
            stream: None,
            buffer: Arc::new(SegQueue::new()),
            position: FramePosition::new(),
        })
    }

    /// 检查配置是否兼容
    fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
        let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
            && config.sample_rate.0 <= supported.max_sample_rate().0;

        let channels_match = config.channels == supported.channels();

        rate_in_range && channels_match
    }

    fn build_stream(&self) -> Result<Stream> {
        let buffer = self.buffer.clone();
        let position = self.position.clone();
        let channels = self.config.channels.max(1) as u64;
        // 回调之间不足一帧的采样
        let mut residual = 0u64;

        self.device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut consumed = 0u64;
                    for sample in data.iter_mut() {
                        if let Some(value) = buffer.pop() {
                            *sample = value;
                            consumed += 1;
                        } else {
                            *sample = 0.0;
                        }
                    }
                    residual += consumed;
                    position.advance(residual / channels);
                    residual %= channels;
                },
                move |err| {
                    log::error!("音频流错误: {}", err);
                },
                None,
            )
            .map_err(|e| PlayerError::AudioError(format!("创建音频流失败: {}", e)))
    }

    fn max_buffered_samples(&self) -> usize {
        (self.config.sample_rate.0 as f64 * self.config.channels as f64 * MAX_BUFFERED_SECONDS) as usize
    }
}

impl AudioSink for CpalAudioSink {
    fn write(&mut self, pcm: &[u8]) -> Result<usize> {
        if self.stream.is_none() {
            return Err(PlayerError::AudioError("音频输出未启动".to_string()));
        }
        // 背压：只接受缓冲剩余空间内的整帧，缓冲满时返回 0
        let bytes_per_frame = self.config.channels.max(1) as usize * 2;
        if pcm.len() < bytes_per_frame {
            // 不足一帧的尾部无法播放，直接丢弃
            debug!("丢弃不足一帧的 PCM 尾部: {} 字节", pcm.len());
            return Ok(pcm.len());
        }
        let free_samples = self.max_buffered_samples().saturating_sub(self.buffer.len());
        let free_bytes = free_samples * 2 / bytes_per_frame * bytes_per_frame;
        let accepted = (pcm.len() / bytes_per_frame * bytes_per_frame).min(free_bytes);
        for chunk in pcm[..accepted].chunks_exact(2) {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            self.buffer.push(sample as f32 / 32768.0);
        }
        Ok(accepted)
    }

    fn play(&mut self) -> Result<()> {
        if self.stream.is_none() {
            self.stream = Some(self.build_stream()?);
        }
        if let Some(stream) = &self.stream {
            stream
                .play()
                .map_err(|e| PlayerError::AudioError(format!("启动音频流失败: {}", e)))?;
        }
        info!("音频输出已启动");
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        if let Some(stream) = &self.stream {
            stream
                .pause()
                .map_err(|e| PlayerError::AudioError(format!("暂停音频流失败: {}", e)))?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            while self.buffer.pop().is_some() {}
            info!("音频输出已停止");
        }
        Ok(())
    }

    fn position(&self) -> FramePosition {
        self.position.clone()
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }
}

impl Drop for CpalAudioSink {
    fn drop(&mut self) {
        if self.stream.is_some() {
            warn!("⚠ 音频输出被 drop 时仍在运行，正在停止");
            let _ = self.stop();
        }
    }
}
