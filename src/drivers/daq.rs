use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use log::{debug, info};
use serde::Deserialize;
use crate::drivers::error::log_release;
use crate::drivers::DaqError;
use crate::types::SampleBlock;
/// Physical channel in `device/channel` form, e.g. `Dev1/ai0`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelSpec {
    device: String,
    channel: String,
}
impl FromStr for ChannelSpec {
    type Err = DaqError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (device, channel) = s
            .split_once('/')
            .ok_or_else(|| DaqError::InvalidConfig(format!("`{s}` is not device/channel")))?;
        let device = device.trim();
        let channel = channel.trim();
        if device.is_empty() || channel.is_empty() || channel.contains('/') {
            return Err(DaqError::InvalidConfig(format!(
                "`{s}` is not device/channel"
            )));
        }
        Ok(Self {
            device: device.to_string(),
            channel: channel.to_string(),
        })
    }
}
impl fmt::Display for ChannelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.channel)
    }
}
/// Expected input range of the channel, in volts.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct VoltageRange {
    pub min: f64,
    pub max: f64,
}
impl Default for VoltageRange {
    fn default() -> Self {
        Self {
            min: -10.0,
            max: 10.0,
        }
    }
}
/// Blocking analog-input driver with continuous sampling.
pub trait DaqDriver: Send {
    fn configure_channel(
        &mut self,
        channel: &ChannelSpec,
        range: VoltageRange,
    ) -> Result<(), DaqError>;
    /// Free-runs the sample clock; `samples_per_channel` sizes the driver buffer.
    fn start_continuous(
        &mut self,
        sample_rate_hz: f64,
        samples_per_channel: usize,
    ) -> Result<(), DaqError>;
    /// Blocks until `samples` readings are available or `timeout` elapses.
    fn read(&mut self, samples: usize, timeout: Duration) -> Result<Vec<f64>, DaqError>;
    fn stop(&mut self) -> Result<(), DaqError>;
}
impl<T: DaqDriver + ?Sized> DaqDriver for Box<T> {
    fn configure_channel(
        &mut self,
        channel: &ChannelSpec,
        range: VoltageRange,
    ) -> Result<(), DaqError> {
        (**self).configure_channel(channel, range)
    }
    fn start_continuous(
        &mut self,
        sample_rate_hz: f64,
        samples_per_channel: usize,
    ) -> Result<(), DaqError> {
        (**self).start_continuous(sample_rate_hz, samples_per_channel)
    }
    fn read(&mut self, samples: usize, timeout: Duration) -> Result<Vec<f64>, DaqError> {
        (**self).read(samples, timeout)
    }
    fn stop(&mut self) -> Result<(), DaqError> {
        (**self).stop()
    }
}
#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub channel: ChannelSpec,
    pub range: VoltageRange,
    pub sample_rate_hz: f64,
    pub block_size: usize,
    pub read_timeout: Duration,
}
/// Scoped continuous-sampling session. The driver is stopped exactly once,
/// either by [`AcquisitionSession::close`] or on drop.
pub struct AcquisitionSession<D: DaqDriver> {
    driver: D,
    settings: SessionSettings,
    next_sequence: u64,
    released: bool,
}
impl<D: DaqDriver> AcquisitionSession<D> {
    pub fn open(driver: D, settings: SessionSettings) -> Result<Self, DaqError> {
        if settings.block_size == 0 {
            return Err(DaqError::InvalidConfig("block size must be at least 1".into()));
        }
        let mut session = Self {
            driver,
            settings,
            next_sequence: 0,
            released: false,
        };
        // From here on a failure drops `session`, which releases the driver.
        session
            .driver
            .configure_channel(&session.settings.channel, session.settings.range)?;
        session
            .driver
            .start_continuous(session.settings.sample_rate_hz, session.settings.block_size)?;
        info!(
            "DAQ started on {} at {} Hz, {} samples per read",
            session.settings.channel, session.settings.sample_rate_hz, session.settings.block_size
        );
        Ok(session)
    }
    pub fn blocks_read(&self) -> u64 {
        self.next_sequence
    }
    pub fn read_block(&mut self) -> Result<SampleBlock, DaqError> {
        let expected = self.settings.block_size;
        let samples = self.driver.read(expected, self.settings.read_timeout)?;
        if samples.len() != expected {
            return Err(DaqError::ShortRead {
                expected,
                actual: samples.len(),
            });
        }
        let block = SampleBlock::new(self.next_sequence, samples);
        self.next_sequence += 1;
        Ok(block)
    }
    pub fn close(mut self) -> Result<(), DaqError> {
        self.release()
    }
    fn release(&mut self) -> Result<(), DaqError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        debug!("stopping DAQ session on {}", self.settings.channel);
        let result = self.driver.stop();
        info!("DAQ stopped after {} blocks", self.next_sequence);
        result
    }
}
impl<D: DaqDriver> Drop for AcquisitionSession<D> {
    fn drop(&mut self) {
        log_release("DAQ session", self.release());
    }
}
