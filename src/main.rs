use anyhow::{Context, Result};
use avpace::core::{MediaKind, PlaybackConfig, RenderTarget, VideoFrame};
use avpace::player::{
    select_track, AudioPlayer, ContainerReader, CpalAudioSink, FfmpegDemuxer, PlaybackEvent, TaskOutcome, VideoPlayer,
};
use log::{info, warn};
use std::thread;

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let mut args = std::env::args().skip(1);
    let path = args.next().context("用法: avpace <媒体文件> [配置.json]")?;
    let config = match args.next() {
        Some(config_path) => PlaybackConfig::from_json_file(&config_path)?,
        None => PlaybackConfig::default(),
    };
    info!("🎬 avpace 启动: {} ({:?})", path, config);

    // 初始化 FFmpeg
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("FFmpeg 初始化失败: {}", e))?;

    let (events_tx, events_rx) = crossbeam_channel::unbounded::<PlaybackEvent>();
    let mut running = 0;

    // 音频：按轨道格式打开音频设备；没有音频轨道时只播放视频
    let audio_demuxer = FfmpegDemuxer::open(&path)?;
    let mut audio = match select_track(&audio_demuxer, MediaKind::Audio) {
        Some(index) => {
            let format = audio_demuxer.track_format(index)?;
            let sink = CpalAudioSink::new(format.sample_rate.unwrap_or(44_100), format.channel_count.unwrap_or(2))?;
            let decoders = audio_demuxer.decoder_provider()?;
            let mut player = AudioPlayer::open(Box::new(audio_demuxer), Box::new(sink), config.clone())?;
            player.set_events(events_tx.clone());
            player.start(&decoders)?;
            running += 1;
            Some(player)
        }
        None => {
            warn!("⚠️ 没有音频轨道，仅播放视频");
            None
        }
    };

    // 视频：帧发送到渲染通道，由消费线程接收
    let video_demuxer = FfmpegDemuxer::open(&path)?;
    let decoders = video_demuxer.decoder_provider()?;
    let mut video = VideoPlayer::open(Box::new(video_demuxer), config)?;
    let (frame_tx, frame_rx) = crossbeam_channel::bounded::<VideoFrame>(4);
    video.set_render_target(RenderTarget::new(frame_tx));
    video.set_events(events_tx);
    if let Some(audio) = &audio {
        video.set_audio_clock(audio.clock());
    }
    video.start(&decoders)?;
    running += 1;

    let consumer = thread::Builder::new()
        .name("FrameConsumer".to_string())
        .spawn(move || {
            let mut frames = 0u64;
            for frame in frame_rx.iter() {
                frames += 1;
                if frames % 30 == 1 {
                    info!("🖼 帧 #{} pts={}ms {}x{}", frames, frame.pts_us / 1000, frame.width, frame.height);
                }
            }
            frames
        })?;

    while running > 0 {
        let event = events_rx.recv()?;
        match &event.outcome {
            TaskOutcome::Failed(reason) => warn!("❌ {} 播放失败: {}", event.kind, reason),
            outcome => info!("✅ {} 播放结束: {:?} ({:?})", event.kind, outcome, event.stats),
        }
        running -= 1;
    }

    video.join();
    drop(video);
    if let Some(audio) = audio.as_mut() {
        audio.join();
    }
    let frames = consumer.join().map_err(|_| anyhow::anyhow!("帧消费线程异常退出"))?;
    info!("共渲染 {} 帧", frames);
    Ok(())
}
