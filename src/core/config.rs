use crate::core::{PlayerError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 视频节奏控制的参考时间源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncSource {
    /// 墙上时钟（默认）
    WallClock,
    /// 音频时钟，不可用时回退到墙上时钟
    AudioClock,
}

/// 播放配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// 循环播放（仅视频轨道）
    pub loop_playback: bool,
    /// 每次输入/输出出队的等待上限（微秒），也是停止请求的响应时延上限
    pub dequeue_timeout_us: u64,
    /// 容器未声明帧率时使用的名义帧率
    pub fallback_frame_rate: u32,
    /// 视频节奏参考时间源
    pub sync_source: SyncSource,
    /// 循环回到开头时重新定基节奏时钟
    pub rebase_on_loop: bool,
    /// 暂停期间的空闲轮询间隔（毫秒）
    pub pause_poll_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            loop_playback: false,
            dequeue_timeout_us: 10_000,
            fallback_frame_rate: 30,
            sync_source: SyncSource::WallClock,
            rebase_on_loop: true,
            pause_poll_ms: 10,
        }
    }
}

impl PlaybackConfig {
    /// 从 JSON 字符串解析（缺省字段使用默认值）
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PlaybackConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// 从 JSON 文件加载
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dequeue_timeout_us == 0 {
            return Err(PlayerError::ConfigError(
                "dequeue_timeout_us 必须大于 0，否则解码循环会空转".to_string(),
            ));
        }
        if self.fallback_frame_rate == 0 {
            return Err(PlayerError::ConfigError("fallback_frame_rate 必须大于 0".to_string()));
        }
        Ok(())
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_micros(self.dequeue_timeout_us)
    }

    pub fn pause_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms.max(1))
    }
}
