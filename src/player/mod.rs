// 播放器核心模块

pub mod container;
pub mod track_selector;
pub mod codec;
pub mod memory;
pub mod audio_sink;
pub mod audio_clock;
pub mod pump;
pub mod task;
pub mod pacing;
pub mod audio_player;
pub mod video_player;

#[cfg(feature = "ffmpeg")]
pub mod demuxer;
#[cfg(feature = "ffmpeg")]
pub mod decoder;
#[cfg(feature = "audio")]
pub mod audio_output;

pub use container::ContainerReader;
pub use track_selector::{open_track, select_track};
pub use codec::{prepare_decoder, Decoder, DecoderProvider};
pub use memory::{MemoryContainer, MemoryContainerBuilder, PassthroughDecoder, ResourceProbe};
pub use audio_sink::{AudioSink, FramePosition, MemoryAudioSink};
pub use audio_clock::AudioClock;
pub use pump::{DecodePump, OutputStage, PumpExit, PumpReport, PumpStats};
pub use task::{PlaybackEvent, PlaybackTask, TaskControl, TaskOutcome};
pub use pacing::{frame_delay, FrameCallback, PacingController};
pub use audio_player::AudioPlayer;
pub use video_player::VideoPlayer;

#[cfg(feature = "ffmpeg")]
pub use demuxer::FfmpegDemuxer;
#[cfg(feature = "ffmpeg")]
pub use decoder::{FfmpegDecoder, FfmpegDecoderProvider};
#[cfg(feature = "audio")]
pub use audio_output::CpalAudioSink;
