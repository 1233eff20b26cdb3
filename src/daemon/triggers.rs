//! Reload triggers: OS signals, config file changes, and the state machine
//! that coalesces them into applies.

use crate::core::error::{Error, Result};
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher, recommended_watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Reload and terminate flags set from signal handlers.
///
/// The handlers only store `true`; everything else happens on the worker.
#[derive(Debug, Clone, Default)]
pub struct ReloadSignal {
    reload: Arc<AtomicBool>,
    terminate: Arc<AtomicBool>,
}

impl ReloadSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers SIGHUP as reload and SIGTERM/SIGINT/SIGQUIT as terminate.
    ///
    /// # Errors
    ///
    /// Returns `Err` if a handler cannot be installed.
    pub fn register_os_handlers(&self) -> std::io::Result<()> {
        use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};

        signal_hook::flag::register(SIGHUP, Arc::clone(&self.reload))?;
        for sig in [SIGTERM, SIGINT, SIGQUIT] {
            signal_hook::flag::register(sig, Arc::clone(&self.terminate))?;
        }
        Ok(())
    }

    pub fn request_reload(&self) {
        self.reload.store(true, Ordering::SeqCst);
    }

    pub fn request_terminate(&self) {
        self.terminate.store(true, Ordering::SeqCst);
    }

    /// Consumes a pending reload request.
    pub fn take_reload(&self) -> bool {
        self.reload.swap(false, Ordering::SeqCst)
    }

    pub fn terminate_requested(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Applying,
    Draining,
    Terminated,
}

/// What caused an apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    Signal,
    FileChange,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Signal => "signal",
            Self::FileChange => "file change",
        }
    }
}

/// Lifecycle state plus at most one queued apply
///
/// Any number of requests made while an apply is running collapse into a
/// single pending trigger; the first one wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSet {
    phase: Phase,
    pending: Option<Trigger>,
}

impl Default for TriggerSet {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerSet {
    /// Starts idle with the initial startup apply queued.
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            pending: Some(Trigger::Startup),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Queues an apply. Returns `false` if one was already queued or the
    /// daemon is shutting down.
    pub fn request(&mut self, trigger: Trigger) -> bool {
        if matches!(self.phase, Phase::Draining | Phase::Terminated) || self.pending.is_some() {
            return false;
        }
        self.pending = Some(trigger);
        true
    }

    /// Moves `Idle → Applying` if an apply is queued.
    pub fn begin_apply(&mut self) -> Option<Trigger> {
        if self.phase != Phase::Idle {
            return None;
        }
        let trigger = self.pending.take()?;
        self.phase = Phase::Applying;
        Some(trigger)
    }

    /// Moves `Applying → Idle`.
    pub fn finish_apply(&mut self) {
        if self.phase == Phase::Applying {
            self.phase = Phase::Idle;
        }
    }

    /// Enters `Draining` from any live phase, dropping queued work.
    pub fn drain(&mut self) {
        if self.phase != Phase::Terminated {
            self.phase = Phase::Draining;
            self.pending = None;
        }
    }

    /// Moves `Draining → Terminated`.
    pub fn terminate(&mut self) {
        if self.phase == Phase::Draining {
            self.phase = Phase::Terminated;
        }
    }
}

/// Watches the config file for completed writes
///
/// The parent directory is watched non-recursively so that editors which
/// save by renaming a temp file over the target are noticed too.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    target: PathBuf,
}

impl ConfigWatcher {
    /// Starts watching `config`.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the path has no file name or the watch cannot be set up.
    pub fn new(config: &Path) -> Result<Self> {
        let file_name = config
            .file_name()
            .ok_or_else(|| notify::Error::generic("config path has no file name"))?;
        let parent = match config.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        // Events arrive with canonical paths
        let parent = std::fs::canonicalize(&parent).unwrap_or(parent);
        let target = parent.join(file_name);

        let (event_tx, rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
            let _ = event_tx.send(event);
        })
        .map_err(Error::Watch)?;
        watcher.watch(&parent, RecursiveMode::NonRecursive)?;

        debug!("Watching {} for changes", target.display());
        Ok(Self {
            _watcher: watcher,
            rx,
            target,
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Waits up to `wait` for a completed write to the config file.
    ///
    /// Everything already queued behind the first event is drained so a
    /// burst of events counts once.
    pub async fn next_change(&mut self, wait: Duration) -> bool {
        let first = match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                // Watcher thread gone; behave like a plain sleep
                tokio::time::sleep(wait).await;
                return false;
            }
            Err(_) => return false,
        };

        let changed = self.is_relevant(first);
        self.take_pending() || changed
    }

    /// Drains already-queued events without waiting.
    ///
    /// Returns `true` if any of them was a completed write.
    pub fn take_pending(&mut self) -> bool {
        let mut changed = false;
        while let Ok(event) = self.rx.try_recv() {
            changed |= self.is_relevant(event);
        }
        changed
    }

    fn is_relevant(&self, event: notify::Result<Event>) -> bool {
        match event {
            Ok(event) => is_write_completed(&event, &self.target),
            Err(err) => {
                warn!(error = %err, "watcher event error");
                false
            }
        }
    }
}

/// True if `event` means `target` now holds complete new content.
///
/// Counted: close after write and a rename onto the path. Creation and
/// plain modify events are ignored since the writer may not be done.
pub fn is_write_completed(event: &Event, target: &Path) -> bool {
    let kind_matches = matches!(
        event.kind,
        EventKind::Access(AccessKind::Close(AccessMode::Write))
            | EventKind::Modify(ModifyKind::Name(
                RenameMode::To | RenameMode::Both | RenameMode::Any
            ))
    );
    if !kind_matches {
        return false;
    }

    match event.kind {
        // Both carries [from, to]; only the destination counts
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.last().is_some_and(|p| p == target)
        }
        _ => event.paths.iter().any(|p| p == target),
    }
}
