use std::f64::consts::PI;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use crate::drivers::{ChannelSpec, DaqDriver, DaqError, MotorDriver, MotorError, VoltageRange};
/// Parameters of the simulated bench: a constant-velocity stage and a signal
/// that peaks while the stage crosses `peak_center`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SimSettings {
    pub stage_velocity: f64,
    pub tone_hz: f64,
    pub amplitude: f64,
    pub noise: f64,
    pub peak_center: f64,
    pub peak_width: f64,
    pub peak_height: f64,
    pub seed: Option<u64>,
}
impl Default for SimSettings {
    fn default() -> Self {
        Self {
            stage_velocity: 5.0,
            tone_hz: 5.0,
            amplitude: 1.0,
            noise: 0.05,
            peak_center: 5.0,
            peak_width: 1.0,
            peak_height: 4.0,
            seed: None,
        }
    }
}
#[derive(Debug)]
struct Kinematics {
    origin: f64,
    target: f64,
    velocity: f64,
    started: Option<Instant>,
}
impl Kinematics {
    fn position_at(&self, now: Instant) -> f64 {
        let Some(started) = self.started else {
            return self.origin;
        };
        let span = self.target - self.origin;
        let travelled = self.velocity * now.duration_since(started).as_secs_f64();
        if travelled >= span.abs() {
            self.target
        } else {
            self.origin + travelled * span.signum()
        }
    }
    fn is_moving_at(&self, now: Instant) -> bool {
        self.started.is_some() && self.position_at(now) != self.target
    }
}
/// Read-only view of the simulated stage position, shared with the DAQ.
#[derive(Clone, Debug)]
pub struct StageTelemetry(Arc<Mutex<Kinematics>>);
impl StageTelemetry {
    pub fn position(&self) -> f64 {
        match self.0.lock() {
            Ok(k) => k.position_at(Instant::now()),
            Err(poisoned) => poisoned.into_inner().position_at(Instant::now()),
        }
    }
}
pub struct SimulatedStage {
    serial: String,
    enabled: bool,
    state: Arc<Mutex<Kinematics>>,
}
impl SimulatedStage {
    pub fn new(serial: &str, velocity: f64) -> Self {
        Self {
            serial: serial.to_string(),
            enabled: false,
            state: Arc::new(Mutex::new(Kinematics {
                origin: 0.0,
                target: 0.0,
                velocity: velocity.abs().max(f64::EPSILON),
                started: None,
            })),
        }
    }
    pub fn telemetry(&self) -> StageTelemetry {
        StageTelemetry(self.state.clone())
    }
    fn with_state<T>(&self, f: impl FnOnce(&mut Kinematics) -> T) -> Result<T, MotorError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| MotorError::Fault("stage state poisoned".into()))?;
        Ok(f(&mut state))
    }
    fn check_channel(&self, channel: u8) -> Result<(), MotorError> {
        if !(1..=4).contains(&channel) {
            return Err(MotorError::InvalidChannel(channel));
        }
        if !self.enabled {
            return Err(MotorError::Fault(format!("channel {channel} not enabled")));
        }
        Ok(())
    }
}
impl MotorDriver for SimulatedStage {
    fn serial(&self) -> &str {
        &self.serial
    }
    fn enable_channel(&mut self, channel: u8) -> Result<(), MotorError> {
        if !(1..=4).contains(&channel) {
            return Err(MotorError::InvalidChannel(channel));
        }
        self.enabled = true;
        Ok(())
    }
    fn position(&mut self, channel: u8) -> Result<f64, MotorError> {
        self.check_channel(channel)?;
        self.with_state(|k| k.position_at(Instant::now()))
    }
    fn move_by(&mut self, channel: u8, distance: f64) -> Result<(), MotorError> {
        let current = self.position(channel)?;
        self.move_to(channel, current + distance)
    }
    fn move_to(&mut self, channel: u8, position: f64) -> Result<(), MotorError> {
        self.check_channel(channel)?;
        self.with_state(|k| {
            let now = Instant::now();
            k.origin = k.position_at(now);
            k.target = position;
            k.started = Some(now);
            debug!("sim stage {} -> {}", k.origin, k.target);
        })
    }
    fn is_moving(&mut self, channel: u8) -> Result<bool, MotorError> {
        self.check_channel(channel)?;
        self.with_state(|k| k.is_moving_at(Instant::now()))
    }
    fn close(&mut self) -> Result<(), MotorError> {
        self.enabled = false;
        Ok(())
    }
}
/// Clock-paced analog input: a tone plus noise, with a bump where the
/// stage crosses the configured peak.
pub struct SimulatedDaq {
    settings: SimSettings,
    stage: Option<StageTelemetry>,
    rng: StdRng,
    range: VoltageRange,
    channel: Option<ChannelSpec>,
    sample_rate_hz: f64,
    started_at: Option<Instant>,
    delivered: u64,
}
impl SimulatedDaq {
    pub fn new(settings: SimSettings) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            settings,
            stage: None,
            rng,
            range: VoltageRange::default(),
            channel: None,
            sample_rate_hz: 0.0,
            started_at: None,
            delivered: 0,
        }
    }
    pub fn watching(mut self, stage: StageTelemetry) -> Self {
        self.stage = Some(stage);
        self
    }
    fn sample(&mut self, t: f64, position: f64) -> f64 {
        let s = &self.settings;
        let tone = s.amplitude * (2.0 * PI * s.tone_hz * t).sin();
        let offset = (position - s.peak_center) / s.peak_width.max(f64::EPSILON);
        let peak = s.peak_height * (-offset * offset).exp();
        let noise = if s.noise > 0.0 {
            self.rng.gen_range(-s.noise..s.noise)
        } else {
            0.0
        };
        (tone + peak + noise).clamp(self.range.min, self.range.max)
    }
}
impl DaqDriver for SimulatedDaq {
    fn configure_channel(
        &mut self,
        channel: &ChannelSpec,
        range: VoltageRange,
    ) -> Result<(), DaqError> {
        if range.min >= range.max {
            return Err(DaqError::InvalidConfig(format!(
                "empty voltage range {}..{}",
                range.min, range.max
            )));
        }
        self.channel = Some(channel.clone());
        self.range = range;
        Ok(())
    }
    fn start_continuous(
        &mut self,
        sample_rate_hz: f64,
        _samples_per_channel: usize,
    ) -> Result<(), DaqError> {
        if self.channel.is_none() {
            return Err(DaqError::InvalidConfig("no channel configured".into()));
        }
        if sample_rate_hz <= 0.0 {
            return Err(DaqError::InvalidConfig("sample rate must be positive".into()));
        }
        self.sample_rate_hz = sample_rate_hz;
        self.started_at = Some(Instant::now());
        self.delivered = 0;
        Ok(())
    }
    fn read(&mut self, samples: usize, timeout: Duration) -> Result<Vec<f64>, DaqError> {
        let started_at = self.started_at.ok_or(DaqError::NotRunning)?;
        let first = self.delivered;
        let ready_at = started_at
            + Duration::from_secs_f64((first + samples as u64) as f64 / self.sample_rate_hz);
        let wait = ready_at.saturating_duration_since(Instant::now());
        if wait > timeout {
            thread::sleep(timeout);
            return Err(DaqError::Timeout {
                requested: samples,
                timeout,
            });
        }
        thread::sleep(wait);
        let position = self.stage.as_ref().map(|s| s.position()).unwrap_or(0.0);
        let rate = self.sample_rate_hz;
        let block = (0..samples)
            .map(|i| {
                let t = (first + i as u64) as f64 / rate;
                self.sample(t, position)
            })
            .collect();
        self.delivered += samples as u64;
        Ok(block)
    }
    fn stop(&mut self) -> Result<(), DaqError> {
        self.started_at = None;
        Ok(())
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    fn quiet() -> SimSettings {
        SimSettings {
            noise: 0.0,
            seed: Some(7),
            ..SimSettings::default()
        }
    }
    #[test]
    fn simulated_daq_returns_requested_length() {
        let mut daq = SimulatedDaq::new(quiet());
        daq.configure_channel(&"Dev1/ai0".parse().unwrap(), VoltageRange::default())
            .unwrap();
        daq.start_continuous(10_000.0, 50).unwrap();
        for n in [1, 7, 50] {
            let block = daq.read(n, Duration::from_secs(1)).unwrap();
            assert_eq!(block.len(), n);
            assert!(block.iter().all(|v| (-10.0..=10.0).contains(v)));
        }
    }
    #[test]
    fn simulated_daq_times_out_on_slow_clock() {
        let mut daq = SimulatedDaq::new(quiet());
        daq.configure_channel(&"Dev1/ai0".parse().unwrap(), VoltageRange::default())
            .unwrap();
        daq.start_continuous(10.0, 100).unwrap();
        let err = daq.read(100, Duration::from_millis(5)).unwrap_err();
        assert!(matches!(err, DaqError::Timeout { requested: 100, .. }));
    }
    #[test]
    fn read_before_start_is_rejected() {
        let mut daq = SimulatedDaq::new(quiet());
        assert!(matches!(
            daq.read(1, Duration::from_millis(1)),
            Err(DaqError::NotRunning)
        ));
    }
    #[test]
    fn simulated_stage_travels_and_settles() {
        let mut stage = SimulatedStage::new("sim", 1000.0);
        stage.enable_channel(1).unwrap();
        stage.move_by(1, 2.0).unwrap();
        stage
            .wait_move(1, Some(Duration::from_secs(1)), Duration::from_millis(1))
            .unwrap();
        assert_eq!(stage.position(1).unwrap(), 2.0);
        assert!(!stage.is_moving(1).unwrap());
        assert_eq!(stage.telemetry().position(), 2.0);
    }
    #[test]
    fn simulated_stage_requires_enabled_channel() {
        let mut stage = SimulatedStage::new("sim", 1.0);
        assert!(stage.move_by(1, 1.0).is_err());
        assert!(matches!(
            stage.enable_channel(9),
            Err(MotorError::InvalidChannel(9))
        ));
    }
}
