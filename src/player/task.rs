use crate::core::{MediaKind, PlaybackState, PlayerError, Result};
use crate::player::pump::{DecodePump, OutputStage, PumpExit, PumpStats};
use crossbeam_channel::Sender;
use log::{error, info, warn};
use parking_lot::{Condvar, Mutex};
use std::process;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}

/// 单轨播放控制 - 显式状态机，可从任意线程操作
///
/// Idle → Running → (Paused ⇄ Running) → StopRequested → Stopped
#[derive(Clone)]
pub struct TaskControl {
    inner: Arc<ControlInner>,
}

struct ControlInner {
    state: AtomicU8,
    stopped: Mutex<bool>,
    stopped_cond: Condvar,
}

impl TaskControl {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ControlInner {
                state: AtomicU8::new(PlaybackState::Idle.as_u8()),
                stopped: Mutex::new(false),
                stopped_cond: Condvar::new(),
            }),
        }
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    fn transition(&self, from: &[PlaybackState], to: PlaybackState) -> bool {
        let mut current = self.inner.state.load(Ordering::SeqCst);
        loop {
            if !from.contains(&PlaybackState::from_u8(current)) {
                return false;
            }
            match self
                .inner
                .state
                .compare_exchange(current, to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Idle → Running
    pub fn start(&self) -> bool {
        self.transition(&[PlaybackState::Idle], PlaybackState::Running)
    }

    /// Running → Paused
    pub fn pause(&self) -> bool {
        self.transition(&[PlaybackState::Running], PlaybackState::Paused)
    }

    /// Paused → Running
    pub fn resume(&self) -> bool {
        self.transition(&[PlaybackState::Paused], PlaybackState::Running)
    }

    /// 请求停止（幂等）；仅在首次生效时返回 true
    pub fn request_stop(&self) -> bool {
        self.transition(
            &[PlaybackState::Idle, PlaybackState::Running, PlaybackState::Paused],
            PlaybackState::StopRequested,
        )
    }

    pub fn is_stop_requested(&self) -> bool {
        matches!(self.state(), PlaybackState::StopRequested | PlaybackState::Stopped)
    }

    /// 标记为已停止并唤醒所有等待者
    pub(crate) fn mark_stopped(&self) {
        self.inner.state.store(PlaybackState::Stopped.as_u8(), Ordering::SeqCst);
        let mut stopped = self.inner.stopped.lock();
        *stopped = true;
        self.inner.stopped_cond.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.stopped.lock()
    }

    /// 阻塞等待停止，超时返回 false
    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stopped = self.inner.stopped.lock();
        while !*stopped {
            if self.inner.stopped_cond.wait_until(&mut stopped, deadline).timed_out() {
                return *stopped;
            }
        }
        true
    }
}

impl Default for TaskControl {
    fn default() -> Self {
        Self::new()
    }
}

/// 任务终止结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Stopped,
    Failed(String),
}

/// 终止通知（发送给任务所有者）
#[derive(Debug, Clone)]
pub struct PlaybackEvent {
    pub kind: MediaKind,
    pub outcome: TaskOutcome,
    pub stats: PumpStats,
}

/// 播放任务 - 每个轨道一个独立线程运行解码泵
pub struct PlaybackTask {
    kind: MediaKind,
    control: TaskControl,
    job: Option<(DecodePump, Box<dyn OutputStage>)>,
    events: Option<Sender<PlaybackEvent>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl PlaybackTask {
    pub fn new(
        pump: DecodePump,
        stage: Box<dyn OutputStage>,
        control: TaskControl,
        events: Option<Sender<PlaybackEvent>>,
    ) -> Self {
        Self {
            kind: pump.track().kind,
            control,
            job: Some((pump, stage)),
            events,
            thread_handle: None,
        }
    }

    pub fn control(&self) -> &TaskControl {
        &self.control
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// 启动解码线程
    ///
    /// 启动前已请求停止时不会创建线程，直接释放资源并发出 Stopped 通知。
    pub fn start(&mut self) -> Result<()> {
        let (pump, mut stage) = self
            .job
            .take()
            .ok_or_else(|| PlayerError::Other(format!("{} 播放任务已启动", self.kind)))?;
        let control = self.control.clone();
        let events = self.events.clone();
        let kind = self.kind;

        if !control.start() {
            warn!("{} ⚠ {} 任务启动前已请求停止", log_ctx(), kind);
            drop(pump);
            stage.on_exit(PumpExit::Stopped);
            Self::finish(kind, &control, events.as_ref(), TaskOutcome::Stopped, PumpStats::default());
            return Ok(());
        }

        let name = match kind {
            MediaKind::Video => "VideoPlayer",
            MediaKind::Audio => "AudioPlayer",
        };
        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            let report = pump.run(&control, stage.as_mut());
            let outcome = match (report.exit, report.error) {
                (PumpExit::Completed, _) => TaskOutcome::Completed,
                (PumpExit::Stopped, _) => TaskOutcome::Stopped,
                (PumpExit::Failed, Some(e)) => TaskOutcome::Failed(e.to_string()),
                (PumpExit::Failed, None) => TaskOutcome::Failed("未知错误".to_string()),
            };
            Self::finish(kind, &control, events.as_ref(), outcome, report.stats);
        })?;

        info!("{} ▶ {} 播放线程已启动", log_ctx(), kind);
        self.thread_handle = Some(handle);
        Ok(())
    }

    fn finish(
        kind: MediaKind,
        control: &TaskControl,
        events: Option<&Sender<PlaybackEvent>>,
        outcome: TaskOutcome,
        stats: PumpStats,
    ) {
        control.mark_stopped();
        info!("{} 🛑 {} 播放结束: {:?}", log_ctx(), kind, outcome);
        if let Some(tx) = events {
            if tx.send(PlaybackEvent { kind, outcome, stats }).is_err() {
                warn!("{} ⚠ {} 终止通知无人接收", log_ctx(), kind);
            }
        }
    }

    /// 请求停止（任意线程可调用，幂等）
    pub fn request_stop(&self) {
        if self.control.request_stop() {
            info!("{} ⏹ {} 请求停止", log_ctx(), self.kind);
        }
    }

    pub fn pause(&self) -> bool {
        self.control.pause()
    }

    pub fn resume(&self) -> bool {
        self.control.resume()
    }

    pub fn state(&self) -> PlaybackState {
        self.control.state()
    }

    pub fn is_stopped(&self) -> bool {
        self.control.is_stopped()
    }

    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        self.control.wait_stopped(timeout)
    }

    /// 等待解码线程结束
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!("{} ❌ {} 播放线程 panic", log_ctx(), self.kind);
            }
        }
    }
}

impl Drop for PlaybackTask {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            warn!("{} ⚠ {} 播放任务被 drop，正在停止线程", log_ctx(), self.kind);
            self.control.request_stop();
            self.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let control = TaskControl::new();
        assert_eq!(control.state(), PlaybackState::Idle);
        assert!(!control.pause());
        assert!(control.start());
        assert!(!control.start());
        assert!(control.pause());
        assert_eq!(control.state(), PlaybackState::Paused);
        assert!(control.resume());
        assert!(control.request_stop());
        assert!(!control.request_stop());
        assert_eq!(control.state(), PlaybackState::StopRequested);
        assert!(!control.resume());
        assert!(!control.is_stopped());
        control.mark_stopped();
        assert_eq!(control.state(), PlaybackState::Stopped);
        assert!(control.wait_stopped(Duration::from_millis(1)));
    }

    #[test]
    fn test_wait_stopped_wakes_waiter() {
        let control = TaskControl::new();
        let remote = control.clone();
        let waiter = thread::spawn(move || remote.wait_stopped(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        control.mark_stopped();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_wait_stopped_times_out() {
        let control = TaskControl::new();
        assert!(!control.wait_stopped(Duration::from_millis(15)));
    }
}
