//! 音视频解码播放引擎
//!
//! 每个轨道一个解码线程：从容器读取压缩样本送入解码器，
//! 排空解码输出；视频按显示时间戳控制释放节奏，音频写入音频输出。

pub mod core;
pub mod player;

pub use crate::core::{PlaybackConfig, PlayerError, Result};
pub use crate::player::{AudioPlayer, VideoPlayer};
