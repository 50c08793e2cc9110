use crate::core::types::MediaKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("无法读取媒体源: {0}")]
    SourceUnreadable(String),

    #[error("无法找到{0}轨道")]
    NoTrackFound(MediaKind),

    #[error("解码错误: {0}")]
    DecodeError(String),

    #[error("解码器返回未知状态: {0}")]
    DecoderStatus(i32),

    #[error("音频输出错误: {0}")]
    AudioError(String),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("JSON 错误: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("其他错误: {0}")]
    Other(String),

    #[error("Anyhow 错误: {0}")]
    AnyhowError(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PlayerError>;
