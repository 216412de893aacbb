// src/main.rs
mod config;
mod display;
mod drivers;
mod engine;
mod gui;
mod types;
use anyhow::{anyhow, Context};
use eframe::egui;
use log::{error, info};
use crate::config::{Backend, RunConfig};
use crate::display::{DisplayLoop, TraceSurface};
use crate::drivers::{
    DaqDriver, DaqError, KinesisInertialMotor, MotorDriver, MotorError, NiDaqmx, SimulatedDaq,
    SimulatedStage,
};
use crate::engine::{spawn_run, Run};

type DaqOpener = Box<dyn FnOnce() -> Result<Box<dyn DaqDriver>, DaqError> + Send>;
type MotorOpener = Box<dyn FnOnce() -> Result<Box<dyn MotorDriver>, MotorError> + Send>;

/// Device openers for the configured backend. Hardware handles are created
/// inside the worker thread that drives them.
fn backend(config: &RunConfig) -> (DaqOpener, MotorOpener) {
    match config.backend {
        Backend::Sim => {
            let stage = SimulatedStage::new(&config.motor.serial, config.sim.stage_velocity);
            let daq = SimulatedDaq::new(config.sim.clone()).watching(stage.telemetry());
            info!("using simulated DAQ and stage");
            let open_daq: DaqOpener =
                Box::new(move || -> Result<Box<dyn DaqDriver>, DaqError> { Ok(Box::new(daq)) });
            let open_motor: MotorOpener =
                Box::new(move || -> Result<Box<dyn MotorDriver>, MotorError> { Ok(Box::new(stage)) });
            (open_daq, open_motor)
        }
        Backend::Hardware => {
            let serial = config.motor.serial.clone();
            info!("using NI-DAQmx and KIM101 {serial}");
            let open_daq: DaqOpener =
                Box::new(|| -> Result<Box<dyn DaqDriver>, DaqError> {
                    Ok(Box::new(NiDaqmx::create()?))
                });
            let open_motor: MotorOpener =
                Box::new(move || -> Result<Box<dyn MotorDriver>, MotorError> {
                    Ok(Box::new(KinesisInertialMotor::open(&serial)?))
                });
            (open_daq, open_motor)
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = RunConfig::load().context("loading configuration")?;
    let (open_daq, open_motor) = backend(&config);
    let Run {
        blocks,
        stop,
        phase,
        handle,
    } = spawn_run(&config, open_daq, open_motor)?;
    let display = DisplayLoop::new(
        blocks,
        stop.clone(),
        &config.display,
        config.daq.read_timeout(),
    );

    if config.display.headless {
        let mut display = display;
        let mut surface = TraceSurface::new(config.display.y_scale);
        let reason = display.run(&mut surface);
        info!("display finished: {reason:?}, {} frames", surface.redraws());
    } else {
        let title = format!("stagescan: {}", config.daq.channel);
        let plot = gui::PlotView::new(config.display.y_scale, config.daq.sample_rate_hz);
        let viewport = egui::ViewportBuilder::default()
            .with_inner_size([960.0, 600.0])
            .with_title(title.clone());
        let options = eframe::NativeOptions {
            viewport,
            ..Default::default()
        };
        eframe::run_native(
            "stagescan",
            options,
            Box::new(move |_cc| Box::new(gui::ScanApp::new(display, plot, phase, stop, title))),
        )
        .map_err(|e| anyhow!("plot window failed: {e}"))?;
    }

    match handle.join() {
        Ok(report) => {
            info!(
                "scan finished: {} of {} blocks shown, stage {} -> {}, stop {:?}",
                report.acquisition.blocks_published,
                report.acquisition.blocks_read,
                report.motion.start_position,
                report.motion.end_position,
                report.stop_reason
            );
            Ok(())
        }
        Err(e) => {
            if e.is_setup() {
                error!("scan never started: {e}");
            } else {
                error!("scan aborted: {e}");
            }
            Err(e.into())
        }
    }
}
