//! Deterministic DAQ and stage doubles for exercising the run engine.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use crate::drivers::{ChannelSpec, DaqDriver, DaqError, MotorDriver, MotorError, VoltageRange};
use crate::types::{StopSignal, Trigger, Waiter};
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BenchEvent {
    Read(usize),
    MoveCommanded,
    MoveFinished,
}
pub type EventLog = Arc<Mutex<Vec<BenchEvent>>>;
fn record(log: &Option<EventLog>, event: BenchEvent) {
    if let Some(log) = log {
        log.lock().unwrap().push(event);
    }
}
pub enum DaqScript {
    /// Ramp blocks of whatever size is requested, forever.
    Endless,
    /// These blocks in order; further reads time out.
    Blocks(Vec<Vec<f64>>),
}
#[derive(Clone, Default)]
pub struct DaqProbe {
    stops: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
}
impl DaqProbe {
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}
struct Park {
    index: usize,
    notify: Option<Trigger>,
    release: StopSignal,
}
pub struct ScriptedDaq {
    script: DaqScript,
    cursor: usize,
    started: bool,
    fail_configure: bool,
    fail_read_at: Option<usize>,
    park: Option<Park>,
    pace: Duration,
    log: Option<EventLog>,
    probe: DaqProbe,
}
impl ScriptedDaq {
    pub fn new(script: DaqScript) -> Self {
        Self {
            script,
            cursor: 0,
            started: false,
            fail_configure: false,
            fail_read_at: None,
            park: None,
            pace: Duration::from_millis(1),
            log: None,
            probe: DaqProbe::default(),
        }
    }
    pub fn probe(&self) -> DaqProbe {
        self.probe.clone()
    }
    pub fn fail_configure(mut self) -> Self {
        self.fail_configure = true;
        self
    }
    pub fn fail_read_at(mut self, index: usize) -> Self {
        self.fail_read_at = Some(index);
        self
    }
    /// When read `index` begins, fire `notify`, then hold the read until
    /// `release` is set.
    pub fn park_at(mut self, index: usize, notify: Trigger, release: StopSignal) -> Self {
        self.park = Some(Park {
            index,
            notify: Some(notify),
            release,
        });
        self
    }
    /// Time every read takes once it is allowed to complete.
    pub fn paced(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }
    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }
    fn hold_if_parked(&mut self, index: usize, timeout: Duration) -> Result<(), DaqError> {
        let Some(park) = self.park.as_mut().filter(|p| p.index == index) else {
            return Ok(());
        };
        if let Some(notify) = park.notify.take() {
            notify.fire();
        }
        let started = Instant::now();
        while !park.release.is_set() {
            if started.elapsed() >= timeout {
                return Err(DaqError::Timeout {
                    requested: 0,
                    timeout,
                });
            }
            thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }
}
impl DaqDriver for ScriptedDaq {
    fn configure_channel(
        &mut self,
        channel: &ChannelSpec,
        _range: VoltageRange,
    ) -> Result<(), DaqError> {
        if self.fail_configure {
            return Err(DaqError::ChannelNotFound(channel.to_string()));
        }
        Ok(())
    }
    fn start_continuous(
        &mut self,
        _sample_rate_hz: f64,
        _samples_per_channel: usize,
    ) -> Result<(), DaqError> {
        self.started = true;
        Ok(())
    }
    fn read(&mut self, samples: usize, timeout: Duration) -> Result<Vec<f64>, DaqError> {
        if !self.started {
            return Err(DaqError::NotRunning);
        }
        let index = self.cursor;
        self.cursor += 1;
        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        record(&self.log, BenchEvent::Read(index));
        if self.fail_read_at == Some(index) {
            return Err(DaqError::Driver {
                code: -200279,
                context: "DAQmxReadAnalogF64",
                message: "scripted read failure".into(),
            });
        }
        self.hold_if_parked(index, timeout)?;
        thread::sleep(self.pace);
        match &self.script {
            DaqScript::Endless => Ok((0..samples)
                .map(|i| (index * samples + i) as f64)
                .collect()),
            DaqScript::Blocks(blocks) => {
                blocks.get(index).cloned().ok_or(DaqError::Timeout {
                    requested: samples,
                    timeout,
                })
            }
        }
    }
    fn stop(&mut self) -> Result<(), DaqError> {
        self.started = false;
        self.probe.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
#[derive(Clone, Default)]
pub struct StageProbe {
    closes: Arc<AtomicUsize>,
}
impl StageProbe {
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}
pub struct ScriptedStage {
    position: f64,
    moving_polls: u32,
    remaining_polls: u32,
    fail_enable: bool,
    fail_move: bool,
    complete_after: Option<Waiter>,
    log: Option<EventLog>,
    probe: StageProbe,
}
impl ScriptedStage {
    pub fn new() -> Self {
        Self {
            position: 0.0,
            moving_polls: 0,
            remaining_polls: 0,
            fail_enable: false,
            fail_move: false,
            complete_after: None,
            log: None,
            probe: StageProbe::default(),
        }
    }
    pub fn probe(&self) -> StageProbe {
        self.probe.clone()
    }
    /// Number of `is_moving` polls that report motion after each command.
    pub fn moving_polls(mut self, polls: u32) -> Self {
        self.moving_polls = polls;
        self
    }
    pub fn fail_enable(mut self) -> Self {
        self.fail_enable = true;
        self
    }
    pub fn fail_move(mut self) -> Self {
        self.fail_move = true;
        self
    }
    /// `wait_move` returns only after `waiter` is released.
    pub fn complete_after(mut self, waiter: Waiter) -> Self {
        self.complete_after = Some(waiter);
        self
    }
    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }
}
impl MotorDriver for ScriptedStage {
    fn serial(&self) -> &str {
        "scripted"
    }
    fn enable_channel(&mut self, channel: u8) -> Result<(), MotorError> {
        if self.fail_enable {
            return Err(MotorError::DeviceNotFound("scripted".into()));
        }
        if channel == 0 {
            return Err(MotorError::InvalidChannel(channel));
        }
        Ok(())
    }
    fn position(&mut self, _channel: u8) -> Result<f64, MotorError> {
        Ok(self.position)
    }
    fn move_by(&mut self, channel: u8, distance: f64) -> Result<(), MotorError> {
        let target = self.position + distance;
        self.move_to(channel, target)
    }
    fn move_to(&mut self, _channel: u8, position: f64) -> Result<(), MotorError> {
        record(&self.log, BenchEvent::MoveCommanded);
        self.position = position;
        self.remaining_polls = self.moving_polls;
        Ok(())
    }
    fn is_moving(&mut self, _channel: u8) -> Result<bool, MotorError> {
        if self.remaining_polls == 0 {
            return Ok(false);
        }
        self.remaining_polls -= 1;
        Ok(true)
    }
    fn wait_move(
        &mut self,
        channel: u8,
        timeout: Option<Duration>,
        poll: Duration,
    ) -> Result<(), MotorError> {
        if let Some(waiter) = self.complete_after.take() {
            waiter.wait().ok();
        }
        if self.fail_move {
            return Err(MotorError::Fault("scripted stall".into()));
        }
        let started = Instant::now();
        while self.is_moving(channel)? {
            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    return Err(MotorError::MoveTimeout(limit));
                }
            }
            thread::sleep(poll);
        }
        record(&self.log, BenchEvent::MoveFinished);
        Ok(())
    }
    fn close(&mut self) -> Result<(), MotorError> {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
