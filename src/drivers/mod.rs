// src/drivers/mod.rs
// Device contracts, session guards, and the backends behind them.
pub mod daq;
pub mod error;
pub mod kinesis;
pub mod motor;
pub mod nidaqmx;
#[cfg(test)]
pub mod scripted;
pub mod sim;
pub use daq::{AcquisitionSession, ChannelSpec, DaqDriver, SessionSettings, VoltageRange};
pub use error::{DaqError, MotorError};
pub use kinesis::KinesisInertialMotor;
pub use motor::{Motion, MotorDriver, StageSession};
pub use nidaqmx::NiDaqmx;
pub use sim::{SimSettings, SimulatedDaq, SimulatedStage};
