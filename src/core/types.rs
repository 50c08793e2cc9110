use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// 轨道媒体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// MIME 前缀（"audio/" / "video/"）
    pub fn mime_prefix(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio/",
            MediaKind::Video => "video/",
        }
    }

    /// 判断 MIME 类型是否属于该媒体类型
    pub fn matches(&self, mime: &str) -> bool {
        mime.starts_with(self.mime_prefix())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 轨道格式（来自容器元数据，选定后不可变）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackFormat {
    pub mime: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<u32>,
    pub channel_count: Option<u16>,
    pub sample_rate: Option<u32>,
}

impl TrackFormat {
    /// 视频轨道格式
    pub fn video(mime: impl Into<String>, width: u32, height: u32, frame_rate: Option<u32>) -> Self {
        Self {
            mime: mime.into(),
            width: Some(width),
            height: Some(height),
            frame_rate,
            channel_count: None,
            sample_rate: None,
        }
    }

    /// 音频轨道格式
    pub fn audio(mime: impl Into<String>, channel_count: u16, sample_rate: u32) -> Self {
        Self {
            mime: mime.into(),
            width: None,
            height: None,
            frame_rate: None,
            channel_count: Some(channel_count),
            sample_rate: Some(sample_rate),
        }
    }

    /// 根据 MIME 推断媒体类型
    pub fn kind(&self) -> Option<MediaKind> {
        [MediaKind::Audio, MediaKind::Video]
            .into_iter()
            .find(|kind| kind.matches(&self.mime))
    }
}

/// 已选定的轨道
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub index: usize,
    pub kind: MediaKind,
    pub format: TrackFormat,
}

/// 容器定位模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// 目标时间之前最近的关键帧
    PreviousSync,
    /// 目标时间之后最近的关键帧
    NextSync,
    /// 距离目标时间最近的关键帧
    ClosestSync,
}

/// 缓冲区标志位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const NONE: BufferFlags = BufferFlags(0);
    pub const KEY_FRAME: BufferFlags = BufferFlags(1);
    pub const CODEC_CONFIG: BufferFlags = BufferFlags(2);
    pub const END_OF_STREAM: BufferFlags = BufferFlags(4);

    pub fn from_bits(bits: u32) -> Self {
        BufferFlags(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: BufferFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: BufferFlags) {
        self.0 |= other.0;
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.contains(Self::END_OF_STREAM)
    }

    pub fn is_codec_config(&self) -> bool {
        self.contains(Self::CODEC_CONFIG)
    }
}

impl std::ops::BitOr for BufferFlags {
    type Output = BufferFlags;

    fn bitor(self, rhs: BufferFlags) -> BufferFlags {
        BufferFlags(self.0 | rhs.0)
    }
}

/// 压缩样本（容器读出，解码器输入端恰好消费一次）
#[derive(Debug, Clone, PartialEq)]
pub struct CodedSample {
    pub data: Vec<u8>,
    pub pts_us: i64,
    pub flags: BufferFlags,
}

impl CodedSample {
    pub fn new(data: Vec<u8>, pts_us: i64) -> Self {
        Self {
            data,
            pts_us,
            flags: BufferFlags::NONE,
        }
    }

    /// 标记为流结束（携带数据的最后一个样本）
    pub fn end_of_stream(mut self) -> Self {
        self.flags.insert(BufferFlags::END_OF_STREAM);
        self
    }
}

/// 解码器输入槽位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputSlot(pub usize);

/// 输出单元的描述信息（可复制，仅用于查询）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitInfo {
    pub index: usize,
    pub size: usize,
    pub pts_us: i64,
    pub flags: BufferFlags,
}

impl UnitInfo {
    pub fn is_end_of_stream(&self) -> bool {
        self.flags.is_end_of_stream()
    }
}

/// 解码输出单元
///
/// 不实现 Clone/Copy：`Decoder::release_output` 按值消费该句柄，
/// 因此同一单元不可能被释放两次，释放后也无法再被查询。
#[derive(Debug, PartialEq, Eq)]
pub struct OutputUnit {
    info: UnitInfo,
}

impl OutputUnit {
    pub fn new(index: usize, size: usize, pts_us: i64, flags: BufferFlags) -> Self {
        Self {
            info: UnitInfo {
                index,
                size,
                pts_us,
                flags,
            },
        }
    }

    pub fn info(&self) -> UnitInfo {
        self.info
    }

    pub fn index(&self) -> usize {
        self.info.index
    }

    pub fn size(&self) -> usize {
        self.info.size
    }

    pub fn pts_us(&self) -> i64 {
        self.info.pts_us
    }

    pub fn flags(&self) -> BufferFlags {
        self.info.flags
    }
}

/// 输出端出队结果
#[derive(Debug, PartialEq)]
pub enum OutputStatus {
    /// 暂无输出，稍后重试
    TryAgainLater,
    /// 输出缓冲区集合变化（仅提示）
    BuffersChanged,
    /// 输出格式变化（仅提示）
    FormatChanged(Option<TrackFormat>),
    /// 有可用输出单元
    Ready(OutputUnit),
}

impl OutputStatus {
    pub const INFO_TRY_AGAIN_LATER: i32 = -1;
    pub const INFO_OUTPUT_FORMAT_CHANGED: i32 = -2;
    pub const INFO_OUTPUT_BUFFERS_CHANGED: i32 = -3;

    /// 将平台原生状态码映射为出队结果
    ///
    /// 非负值为缓冲区索引；无法识别的负值是致命解码错误。
    pub fn from_raw(code: i32, size: usize, pts_us: i64, flags: BufferFlags) -> crate::core::Result<Self> {
        match code {
            Self::INFO_TRY_AGAIN_LATER => Ok(OutputStatus::TryAgainLater),
            Self::INFO_OUTPUT_FORMAT_CHANGED => Ok(OutputStatus::FormatChanged(None)),
            Self::INFO_OUTPUT_BUFFERS_CHANGED => Ok(OutputStatus::BuffersChanged),
            code if code < 0 => Err(crate::core::PlayerError::DecoderStatus(code)),
            index => Ok(OutputStatus::Ready(OutputUnit::new(index as usize, size, pts_us, flags))),
        }
    }
}

/// 渲染目标 - 对核心不透明，仅传递给解码器配置
#[derive(Clone)]
pub struct RenderTarget {
    inner: Arc<dyn Any + Send + Sync>,
}

impl RenderTarget {
    pub fn new<T: Any + Send + Sync>(target: T) -> Self {
        Self {
            inner: Arc::new(target),
        }
    }

    /// 由具体解码器后端取回自己认识的目标类型
    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl fmt::Debug for RenderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RenderTarget(..)")
    }
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    RGBA,
    YUV420P,
}

/// 视频帧数据（软件后端渲染到目标时使用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoFrame {
    pub pts_us: i64,        // 显示时间戳（微秒）
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,      // CPU 内存数据
}

/// 单轨播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    Running,
    Paused,
    StopRequested,
    Stopped,
}

impl PlaybackState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            PlaybackState::Idle => 0,
            PlaybackState::Running => 1,
            PlaybackState::Paused => 2,
            PlaybackState::StopRequested => 3,
            PlaybackState::Stopped => 4,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => PlaybackState::Idle,
            1 => PlaybackState::Running,
            2 => PlaybackState::Paused,
            3 => PlaybackState::StopRequested,
            _ => PlaybackState::Stopped,
        }
    }
}

/// 视频轨道信息（建立播放时读取）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    /// 名义帧率（仅作提示，节奏控制以时间戳为准）
    pub nominal_fps: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_kind_matches_mime_prefix() {
        assert!(MediaKind::Video.matches("video/avc"));
        assert!(!MediaKind::Video.matches("audio/mp4a-latm"));
        assert_eq!(TrackFormat::audio("audio/raw", 2, 44100).kind(), Some(MediaKind::Audio));
        assert_eq!(TrackFormat::video("text/vtt", 0, 0, None).kind(), None);
    }

    #[test]
    fn test_from_raw_status_codes() {
        assert_eq!(
            OutputStatus::from_raw(-1, 0, 0, BufferFlags::NONE).unwrap(),
            OutputStatus::TryAgainLater
        );
        assert_eq!(
            OutputStatus::from_raw(-3, 0, 0, BufferFlags::NONE).unwrap(),
            OutputStatus::BuffersChanged
        );
        match OutputStatus::from_raw(3, 128, 40_000, BufferFlags::END_OF_STREAM).unwrap() {
            OutputStatus::Ready(unit) => {
                assert_eq!(unit.index(), 3);
                assert_eq!(unit.size(), 128);
                assert!(unit.flags().is_end_of_stream());
            }
            other => panic!("unexpected status {:?}", other),
        }
        assert!(OutputStatus::from_raw(-10000, 0, 0, BufferFlags::NONE).is_err());
    }

    #[test]
    fn test_buffer_flags() {
        let flags = BufferFlags::KEY_FRAME | BufferFlags::END_OF_STREAM;
        assert!(flags.is_end_of_stream());
        assert!(!flags.is_codec_config());
        assert_eq!(BufferFlags::from_bits(flags.bits()), flags);
    }

    #[test]
    fn test_playback_state_round_trips_through_u8() {
        for state in [
            PlaybackState::Idle,
            PlaybackState::Running,
            PlaybackState::Paused,
            PlaybackState::StopRequested,
            PlaybackState::Stopped,
        ] {
            assert_eq!(PlaybackState::from_u8(state.as_u8()), state);
        }
    }
}
