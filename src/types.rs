// src/types.rs
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

/// One fixed-size read of successive samples from the active channel.
///
/// The acquisition loop reads every block into a fresh buffer and moves it
/// into the queue, so a published block has exactly one owner.
#[derive(Clone, Debug)]
pub struct SampleBlock {
    sequence: u64,
    samples: Vec<f64>,
}

impl SampleBlock {
    pub fn new(sequence: u64, samples: Vec<f64>) -> Self {
        Self { sequence, samples }
    }
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }
    pub fn len(&self) -> usize {
        self.samples.len()
    }
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum StopReason {
    MotionComplete = 1,
    MotionFailed = 2,
}

const NOT_STOPPED: u8 = 0;

/// Single-use stop flag shared by the motion controller and both loops.
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    state: Arc<AtomicU8>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }
    /// Returns `true` only for the call that performed the transition.
    pub fn set(&self, reason: StopReason) -> bool {
        self.state
            .compare_exchange(
                NOT_STOPPED,
                reason as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
    pub fn is_set(&self) -> bool {
        self.state.load(Ordering::Acquire) != NOT_STOPPED
    }
    pub fn reason(&self) -> Option<StopReason> {
        match self.state.load(Ordering::Acquire) {
            1 => Some(StopReason::MotionComplete),
            2 => Some(StopReason::MotionFailed),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum RunPhase {
    Idle = 0,
    Armed = 1,
    Active = 2,
    Complete = 3,
    Terminated = 4,
}

impl RunPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => RunPhase::Idle,
            1 => RunPhase::Armed,
            2 => RunPhase::Active,
            3 => RunPhase::Complete,
            _ => RunPhase::Terminated,
        }
    }
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Idle => "idle",
            RunPhase::Armed => "armed",
            RunPhase::Active => "active",
            RunPhase::Complete => "complete",
            RunPhase::Terminated => "terminated",
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run phase shared across threads. Phases only move forward.
#[derive(Clone, Debug, Default)]
pub struct PhaseTracker {
    phase: Arc<AtomicU8>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn current(&self) -> RunPhase {
        RunPhase::from_u8(self.phase.load(Ordering::Acquire))
    }
    pub fn advance(&self, to: RunPhase) -> bool {
        let previous = self.phase.fetch_max(to as u8, Ordering::AcqRel);
        let advanced = previous < to as u8;
        if advanced {
            log::info!("run phase: {} -> {}", RunPhase::from_u8(previous), to);
        }
        advanced
    }
}

/// Firing half of a one-shot. Dropping it unfired abandons the waiter.
#[derive(Debug)]
pub struct Trigger(Sender<()>);

#[derive(Debug)]
pub struct Waiter(Receiver<()>);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitError {
    Abandoned,
    TimedOut,
}

pub fn one_shot() -> (Trigger, Waiter) {
    let (tx, rx) = mpsc::channel();
    (Trigger(tx), Waiter(rx))
}

impl Trigger {
    pub fn fire(self) {
        // The waiter may already be gone; nothing left to notify then.
        self.0.send(()).ok();
    }
}

impl Waiter {
    pub fn wait(self) -> Result<(), WaitError> {
        self.0.recv().map_err(|_| WaitError::Abandoned)
    }
    pub fn wait_timeout(self, timeout: Duration) -> Result<(), WaitError> {
        self.0.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => WaitError::TimedOut,
            RecvTimeoutError::Disconnected => WaitError::Abandoned,
        })
    }
}
