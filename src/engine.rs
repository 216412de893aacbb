// src/engine.rs
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use log::{error, info, trace, warn};
use thiserror::Error;
use crate::config::{ConfigError, MotorSettings, RunConfig, RunSettings};
use crate::drivers::{
    AcquisitionSession, DaqDriver, DaqError, Motion, MotorDriver, MotorError, SessionSettings,
    StageSession,
};
use crate::types::*;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("DAQ setup failed: {0}")]
    DaqSetup(DaqError),
    #[error("motor setup failed: {0}")]
    MotorSetup(MotorError),
    #[error("acquisition never became ready ({0})")]
    NotReady(&'static str),
    #[error("could not start {0} thread: {1}")]
    Spawn(&'static str, std::io::Error),
    #[error("DAQ failed during the scan: {0}")]
    DaqRun(DaqError),
    #[error("motion failed: {0}")]
    Motion(MotorError),
    #[error("{0} thread panicked")]
    Panicked(&'static str),
}

impl RunError {
    /// Setup failures happen before any motion is commanded.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            RunError::Config(_)
                | RunError::DaqSetup(_)
                | RunError::MotorSetup(_)
                | RunError::NotReady(_)
                | RunError::Spawn(..)
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AcquisitionReport {
    pub gate_opened: bool,
    pub blocks_read: u64,
    pub blocks_published: u64,
    pub consumer_gone: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MotionReport {
    pub motion: Motion,
    pub start_position: f64,
    pub end_position: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunReport {
    pub acquisition: AcquisitionReport,
    pub motion: MotionReport,
    pub stop_reason: Option<StopReason>,
}

/// Channels and signals handed to the acquisition thread.
pub struct AcquisitionLinks {
    pub ready: Trigger,
    pub motion_gate: Waiter,
    pub stop: StopSignal,
    pub phase: PhaseTracker,
    pub blocks: Sender<SampleBlock>,
}

/// Channels and signals handed to the motion controller.
pub struct MotionLinks {
    pub ready: Waiter,
    pub motion_gate: Trigger,
    pub stop: StopSignal,
    pub phase: PhaseTracker,
}

/// Opens the DAQ on the calling thread, starts the sampling session, waits
/// for the move, then publishes blocks until the stop signal is seen. The DAQ
/// is released on every exit path.
pub fn run_acquisition<D, F>(
    open_daq: F,
    settings: SessionSettings,
    links: AcquisitionLinks,
) -> Result<AcquisitionReport, RunError>
where
    D: DaqDriver,
    F: FnOnce() -> Result<D, DaqError>,
{
    let AcquisitionLinks {
        ready,
        motion_gate,
        stop,
        phase,
        blocks,
    } = links;

    // 1. Arm: session running, motion controller may proceed.
    let daq = open_daq().map_err(RunError::DaqSetup)?;
    let mut session = AcquisitionSession::open(daq, settings).map_err(RunError::DaqSetup)?;
    phase.advance(RunPhase::Armed);
    ready.fire();

    // 2. Nothing is published before the move has been commanded.
    if motion_gate.wait().is_err() {
        warn!("move was never commanded; closing DAQ without publishing");
        session.close().map_err(RunError::DaqRun)?;
        return Ok(AcquisitionReport::default());
    }

    // 3. Stream until stopped.
    let mut report = AcquisitionReport {
        gate_opened: true,
        ..AcquisitionReport::default()
    };
    while !stop.is_set() {
        let block = session.read_block().map_err(RunError::DaqRun)?;
        trace!("block {} ({} samples)", block.sequence(), block.len());
        if blocks.send(block).is_err() {
            warn!("display hung up; stopping acquisition early");
            report.consumer_gone = true;
            break;
        }
        report.blocks_published += 1;
    }
    report.blocks_read = session.blocks_read();
    session.close().map_err(RunError::DaqRun)?;
    info!(
        "acquisition finished: {} blocks published",
        report.blocks_published
    );
    Ok(report)
}

/// Performs the single scan move and sets the stop signal exactly once,
/// whether the move succeeded or not.
pub fn run_motion<M, F>(
    open_motor: F,
    motor_settings: &MotorSettings,
    run_settings: &RunSettings,
    links: MotionLinks,
) -> Result<MotionReport, RunError>
where
    M: MotorDriver,
    F: FnOnce() -> Result<M, MotorError>,
{
    let MotionLinks {
        ready,
        motion_gate,
        stop,
        phase,
    } = links;
    let result = open_motor().map_err(RunError::MotorSetup).and_then(|motor| {
        drive_stage(motor, motor_settings, run_settings, ready, motion_gate, &phase)
    });
    let reason = match &result {
        Ok(_) => StopReason::MotionComplete,
        Err(e) => {
            error!("motion controller: {e}");
            StopReason::MotionFailed
        }
    };
    if stop.set(reason) {
        info!("stop signal set ({reason:?})");
    }
    phase.advance(RunPhase::Complete);
    result
}

fn drive_stage<M: MotorDriver>(
    motor: M,
    motor_settings: &MotorSettings,
    run_settings: &RunSettings,
    ready: Waiter,
    motion_gate: Trigger,
    phase: &PhaseTracker,
) -> Result<MotionReport, RunError> {
    let poll = motor_settings.poll_interval();
    let mut stage =
        StageSession::open(motor, motor_settings.channel).map_err(RunError::MotorSetup)?;
    let start_position = stage.position().map_err(RunError::MotorSetup)?;
    info!("start position: {start_position}");

    match ready.wait_timeout(run_settings.ready_timeout()) {
        Ok(()) => {}
        Err(WaitError::TimedOut) => return Err(RunError::NotReady("timed out")),
        Err(WaitError::Abandoned) => return Err(RunError::NotReady("DAQ setup failed")),
    }
    let grace = run_settings.grace_period();
    if !grace.is_zero() {
        thread::sleep(grace);
    }

    stage
        .command(motor_settings.motion)
        .map_err(RunError::Motion)?;
    if run_settings.wait_for_motion_start {
        stage
            .wait_motion_start(start_position, run_settings.motion_start_timeout(), poll)
            .map_err(RunError::Motion)?;
    }
    phase.advance(RunPhase::Active);
    motion_gate.fire();

    stage
        .wait_move(motor_settings.move_timeout(), poll)
        .map_err(RunError::Motion)?;
    let end_position = stage.position().map_err(RunError::Motion)?;
    info!("end position: {end_position}");
    stage.close().map_err(RunError::Motion)?;
    Ok(MotionReport {
        motion: motor_settings.motion,
        start_position,
        end_position,
    })
}

/// Both worker threads of a run. Joining reports the first root-cause error.
pub struct RunHandle {
    acquisition: JoinHandle<Result<AcquisitionReport, RunError>>,
    motion: JoinHandle<Result<MotionReport, RunError>>,
    stop: StopSignal,
    phase: PhaseTracker,
}

impl RunHandle {
    pub fn join(self) -> Result<RunReport, RunError> {
        let acquisition = self
            .acquisition
            .join()
            .unwrap_or(Err(RunError::Panicked("acquisition")));
        let motion = self
            .motion
            .join()
            .unwrap_or(Err(RunError::Panicked("motion")));
        self.phase.advance(RunPhase::Terminated);
        match (acquisition, motion) {
            (Ok(acquisition), Ok(motion)) => Ok(RunReport {
                acquisition,
                motion,
                stop_reason: self.stop.reason(),
            }),
            (Err(e), Ok(_)) | (Ok(_), Err(e)) => Err(e),
            // A motion controller left waiting is only a symptom of the DAQ failure.
            (Err(acq), Err(RunError::NotReady(_))) => Err(acq),
            (Err(_), Err(motion)) => Err(motion),
        }
    }
}

/// A started run: the consumer end of the block queue plus shared state.
pub struct Run {
    pub blocks: Receiver<SampleBlock>,
    pub stop: StopSignal,
    pub phase: PhaseTracker,
    pub handle: RunHandle,
}

/// Spawns the acquisition thread and the motion controller thread. Each
/// device is opened by the thread that drives it.
pub fn spawn_run<D, M, FD, FM>(
    config: &RunConfig,
    open_daq: FD,
    open_motor: FM,
) -> Result<Run, RunError>
where
    D: DaqDriver,
    M: MotorDriver,
    FD: FnOnce() -> Result<D, DaqError> + Send + 'static,
    FM: FnOnce() -> Result<M, MotorError> + Send + 'static,
{
    config.validate()?;
    let session = config.daq.session()?;
    let motor_settings = config.motor.clone();
    let run_settings = config.run.clone();

    let stop = StopSignal::new();
    let phase = PhaseTracker::new();
    let (block_tx, block_rx) = mpsc::channel();
    let (ready_trigger, ready_waiter) = one_shot();
    let (gate_trigger, gate_waiter) = one_shot();

    let acquisition_links = AcquisitionLinks {
        ready: ready_trigger,
        motion_gate: gate_waiter,
        stop: stop.clone(),
        phase: phase.clone(),
        blocks: block_tx,
    };
    let acquisition = thread::Builder::new()
        .name("acquisition".to_owned())
        .spawn(move || run_acquisition(open_daq, session, acquisition_links))
        .map_err(|e| RunError::Spawn("acquisition", e))?;

    let motion_links = MotionLinks {
        ready: ready_waiter,
        motion_gate: gate_trigger,
        stop: stop.clone(),
        phase: phase.clone(),
    };
    // If this spawn fails the acquisition thread sees an abandoned gate and
    // closes its session by itself.
    let motion = thread::Builder::new()
        .name("motion".to_owned())
        .spawn(move || run_motion(open_motor, &motor_settings, &run_settings, motion_links))
        .map_err(|e| RunError::Spawn("motion", e))?;

    Ok(Run {
        blocks: block_rx,
        stop: stop.clone(),
        phase: phase.clone(),
        handle: RunHandle {
            acquisition,
            motion,
            stop,
            phase,
        },
    })
}
