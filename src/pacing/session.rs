//! A pacing engine running on its own thread against the real clock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{Action, EngineState, PacedWord, PacingEngine, PacingMode, PacingStats, Tick};
use crate::error::Result;
use crate::progress::{ProgressReason, ProgressTracker, ProgressUpdate};

/// Receives progress updates from the session thread.
pub type ProgressSink = Box<dyn FnMut(ProgressUpdate) + Send>;

/// What a session reports to its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacerEvent {
    Word(PacedWord),
    Finished(PacingStats),
    Cancelled(PacingStats),
}

#[derive(Debug, Clone, Copy)]
enum Command {
    Pause,
    Resume,
    Seek(usize),
    Miss,
}

struct ControlState {
    /// State as seen by callers, updated as soon as a control is accepted.
    state: EngineState,
    commands: VecDeque<Command>,
    cancelled: bool,
}

struct Control {
    state: Mutex<ControlState>,
    wake: Condvar,
}

impl Control {
    fn submit(&self, action: Action, command: Command) -> Result<()> {
        let mut guard = self.state.lock();
        guard.state = guard.state.apply(action)?;
        guard.commands.push_back(command);
        self.wake.notify_all();
        Ok(())
    }
}

/// Handle to a running session. Dropping it cancels the session and waits
/// for the thread to exit.
pub struct PacingSession {
    book_id: String,
    control: Arc<Control>,
    total: usize,
    mode: PacingMode,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PacingSession {
    /// Start `engine` on `book_id` at word `from` on a new thread.
    ///
    /// Words and the final outcome arrive on the returned receiver. Progress
    /// updates, if a tracker is given, go to `sink` on pause, cancel, finish
    /// and at the tracker's interval.
    pub fn spawn(
        mut engine: PacingEngine,
        book_id: impl Into<String>,
        from: usize,
        mode: PacingMode,
        progress: Option<(ProgressTracker, ProgressSink)>,
    ) -> Result<(Self, Receiver<PacerEvent>)> {
        engine.start(from, mode, 0)?;
        let total = engine.total();

        let control = Arc::new(Control {
            state: Mutex::new(ControlState {
                state: EngineState::Running,
                commands: VecDeque::new(),
                cancelled: false,
            }),
            wake: Condvar::new(),
        });
        let (tx, rx) = mpsc::channel();

        let worker = Worker {
            engine,
            control: control.clone(),
            events: tx,
            progress,
            epoch: Instant::now(),
        };
        let thread = thread::Builder::new()
            .name("lura-pacer".to_string())
            .spawn(move || worker.run())?;

        Ok((
            Self {
                book_id: book_id.into(),
                control,
                total,
                mode,
                thread: Mutex::new(Some(thread)),
            },
            rx,
        ))
    }

    pub fn book_id(&self) -> &str {
        &self.book_id
    }

    pub fn state(&self) -> EngineState {
        self.control.state.lock().state
    }

    pub fn mode(&self) -> PacingMode {
        self.mode
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn pause(&self) -> Result<()> {
        self.control.submit(Action::Pause, Command::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.control.submit(Action::Resume, Command::Resume)
    }

    /// Queue a jump to `index`; returns the clamped index that will be used.
    pub fn seek(&self, index: usize) -> Result<usize> {
        let target = index.min(self.total.saturating_sub(1));
        self.control.submit(Action::Seek, Command::Seek(target))?;
        Ok(target)
    }

    pub fn record_miss(&self) {
        let mut guard = self.control.state.lock();
        if !guard.cancelled {
            guard.commands.push_back(Command::Miss);
        }
    }

    /// Stop the session. Interrupts the current word immediately.
    pub fn cancel(&self) {
        let mut guard = self.control.state.lock();
        guard.cancelled = true;
        guard.state = EngineState::Cancelled;
        guard.commands.clear();
        self.control.wake.notify_all();
    }

    /// Whether the session has finished or been cancelled. The thread may
    /// still be delivering its last progress update.
    pub fn is_ended(&self) -> bool {
        matches!(self.state(), EngineState::Finished | EngineState::Cancelled)
    }

    /// Whether the session thread has exited.
    pub fn is_done(&self) -> bool {
        self.thread.lock().as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the session thread to exit without cancelling it. Every
    /// progress update has been delivered once this returns.
    pub fn join(&self) {
        let thread = self.thread.lock().take();
        if let Some(thread) = thread
            && thread.join().is_err()
        {
            log::warn!("pacing thread panicked");
        }
    }
}

impl Drop for PacingSession {
    fn drop(&mut self) {
        if self.thread.get_mut().is_some() {
            self.cancel();
            self.join();
        }
    }
}

struct Worker {
    engine: PacingEngine,
    control: Arc<Control>,
    events: Sender<PacerEvent>,
    progress: Option<(ProgressTracker, ProgressSink)>,
    epoch: Instant,
}

impl Worker {
    fn now(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn run(mut self) {
        loop {
            let (commands, cancelled) = {
                let mut guard = self.control.state.lock();
                (std::mem::take(&mut guard.commands), guard.cancelled)
            };
            let now = self.now();
            if cancelled {
                self.engine.cancel(now);
                self.report(now, ProgressReason::Cancel);
                let _ = self.events.send(PacerEvent::Cancelled(self.engine.stats(now)));
                return;
            }
            for command in commands {
                self.apply(command, now);
            }

            match self.engine.tick(now) {
                Tick::Word(word) => {
                    let _ = self.events.send(PacerEvent::Word(word));
                    self.report(now, ProgressReason::Interval);
                }
                Tick::Wait { until_ms } => self.sleep_until(until_ms),
                Tick::Paused => self.sleep_while_paused(),
                Tick::Finished => {
                    self.control.state.lock().state = EngineState::Finished;
                    self.report(now, ProgressReason::Finish);
                    let _ = self.events.send(PacerEvent::Finished(self.engine.stats(now)));
                    log::debug!("pacing session finished");
                    return;
                }
                Tick::Idle | Tick::Cancelled => return,
            }
        }
    }

    fn apply(&mut self, command: Command, now: u64) {
        let result = match command {
            Command::Pause => {
                let result = self.engine.pause(now);
                if result.is_ok() {
                    self.report(now, ProgressReason::Pause);
                }
                result
            }
            Command::Resume => self.engine.resume(now),
            Command::Seek(index) => self.engine.seek(index, now).map(|_| ()),
            Command::Miss => {
                self.engine.record_miss();
                Ok(())
            }
        };
        if let Err(err) = result {
            log::debug!("ignoring queued control: {err}");
        }
    }

    /// Block until `until_ms` or until cancelled. Other controls wait for the
    /// word boundary.
    fn sleep_until(&self, until_ms: u64) {
        let deadline = self.epoch + Duration::from_millis(until_ms);
        let mut guard = self.control.state.lock();
        while !guard.cancelled && Instant::now() < deadline {
            self.control.wake.wait_until(&mut guard, deadline);
        }
    }

    fn sleep_while_paused(&self) {
        let mut guard = self.control.state.lock();
        while !guard.cancelled && guard.commands.is_empty() {
            self.control.wake.wait(&mut guard);
        }
    }

    fn report(&mut self, now: u64, reason: ProgressReason) {
        if let Some((tracker, sink)) = self.progress.as_mut()
            && let Some(update) = tracker.observe(&self.engine, now, reason)
        {
            sink(update);
        }
    }
}
