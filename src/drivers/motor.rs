use std::thread;
use std::time::{Duration, Instant};
use log::{debug, info};
use serde::Deserialize;
use crate::drivers::error::log_release;
use crate::drivers::MotorError;
/// Single move spanning the scan travel, in device position units.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Motion {
    By(f64),
    To(f64),
}
impl Default for Motion {
    fn default() -> Self {
        Motion::By(10.0)
    }
}
/// Blocking motor-controller driver, addressed by channel index.
pub trait MotorDriver: Send {
    fn serial(&self) -> &str;
    fn enable_channel(&mut self, channel: u8) -> Result<(), MotorError>;
    fn position(&mut self, channel: u8) -> Result<f64, MotorError>;
    fn move_by(&mut self, channel: u8, distance: f64) -> Result<(), MotorError>;
    fn move_to(&mut self, channel: u8, position: f64) -> Result<(), MotorError>;
    fn is_moving(&mut self, channel: u8) -> Result<bool, MotorError>;
    /// Blocks until the channel reports idle. Drivers with a native wait can
    /// override this; the default polls [`MotorDriver::is_moving`].
    fn wait_move(
        &mut self,
        channel: u8,
        timeout: Option<Duration>,
        poll: Duration,
    ) -> Result<(), MotorError> {
        let started = Instant::now();
        while self.is_moving(channel)? {
            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    return Err(MotorError::MoveTimeout(limit));
                }
            }
            thread::sleep(poll);
        }
        Ok(())
    }
    fn close(&mut self) -> Result<(), MotorError>;
}
impl<T: MotorDriver + ?Sized> MotorDriver for Box<T> {
    fn serial(&self) -> &str {
        (**self).serial()
    }
    fn enable_channel(&mut self, channel: u8) -> Result<(), MotorError> {
        (**self).enable_channel(channel)
    }
    fn position(&mut self, channel: u8) -> Result<f64, MotorError> {
        (**self).position(channel)
    }
    fn move_by(&mut self, channel: u8, distance: f64) -> Result<(), MotorError> {
        (**self).move_by(channel, distance)
    }
    fn move_to(&mut self, channel: u8, position: f64) -> Result<(), MotorError> {
        (**self).move_to(channel, position)
    }
    fn is_moving(&mut self, channel: u8) -> Result<bool, MotorError> {
        (**self).is_moving(channel)
    }
    fn wait_move(
        &mut self,
        channel: u8,
        timeout: Option<Duration>,
        poll: Duration,
    ) -> Result<(), MotorError> {
        (**self).wait_move(channel, timeout, poll)
    }
    fn close(&mut self) -> Result<(), MotorError> {
        (**self).close()
    }
}
/// Enabled motor channel. The controller is closed exactly once, either by
/// [`StageSession::close`] or on drop.
pub struct StageSession<M: MotorDriver> {
    driver: M,
    channel: u8,
    released: bool,
}
impl<M: MotorDriver> StageSession<M> {
    pub fn open(driver: M, channel: u8) -> Result<Self, MotorError> {
        let mut session = Self {
            driver,
            channel,
            released: false,
        };
        session.driver.enable_channel(channel)?;
        info!(
            "motor {} channel {} enabled",
            session.driver.serial(),
            channel
        );
        Ok(session)
    }
    pub fn position(&mut self) -> Result<f64, MotorError> {
        self.driver.position(self.channel)
    }
    pub fn command(&mut self, motion: Motion) -> Result<(), MotorError> {
        match motion {
            Motion::By(distance) => {
                self.driver.move_by(self.channel, distance)?;
                info!("motor commanded to move by {distance}");
            }
            Motion::To(target) => {
                self.driver.move_to(self.channel, target)?;
                info!("motor commanded to move to {target}");
            }
        }
        Ok(())
    }
    /// Waits until the stage reports motion or has left `origin`, whichever
    /// is seen first. Short moves can finish between two polls.
    pub fn wait_motion_start(
        &mut self,
        origin: f64,
        timeout: Duration,
        poll: Duration,
    ) -> Result<(), MotorError> {
        let started = Instant::now();
        loop {
            if self.driver.is_moving(self.channel)? {
                break;
            }
            if (self.driver.position(self.channel)? - origin).abs() > f64::EPSILON {
                break;
            }
            if started.elapsed() >= timeout {
                return Err(MotorError::MotionNotStarted(timeout));
            }
            thread::sleep(poll);
        }
        debug!("motion started after {:?}", started.elapsed());
        Ok(())
    }
    pub fn wait_move(&mut self, timeout: Option<Duration>, poll: Duration) -> Result<(), MotorError> {
        self.driver.wait_move(self.channel, timeout, poll)?;
        info!("motor move complete");
        Ok(())
    }
    pub fn close(mut self) -> Result<(), MotorError> {
        self.release()
    }
    fn release(&mut self) -> Result<(), MotorError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        debug!("closing motor {}", self.driver.serial());
        self.driver.close()
    }
}
impl<M: MotorDriver> Drop for StageSession<M> {
    fn drop(&mut self) {
        let result = self.release();
        let what = format!("motor {}", self.driver.serial());
        log_release(&what, result);
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::scripted::ScriptedStage;
    const POLL: Duration = Duration::from_millis(1);
    #[test]
    fn motion_parses_from_json() {
        let by: Motion = serde_json::from_str(r#"{"by": 2.5}"#).unwrap();
        let to: Motion = serde_json::from_str(r#"{"to": -1.0}"#).unwrap();
        assert_eq!(by, Motion::By(2.5));
        assert_eq!(to, Motion::To(-1.0));
    }
    #[test]
    fn stage_session_closes_once() {
        let stage = ScriptedStage::new().moving_polls(3);
        let probe = stage.probe();
        let mut session = StageSession::open(stage, 1).unwrap();
        session.command(Motion::By(4.0)).unwrap();
        session.wait_move(None, POLL).unwrap();
        assert_eq!(session.position().unwrap(), 4.0);
        session.close().unwrap();
        assert_eq!(probe.closes(), 1);
    }
    #[test]
    fn failed_enable_still_closes() {
        let stage = ScriptedStage::new().fail_enable();
        let probe = stage.probe();
        assert!(StageSession::open(stage, 1).is_err());
        assert_eq!(probe.closes(), 1);
    }
    #[test]
    fn default_wait_move_times_out() {
        let stage = ScriptedStage::new().moving_polls(u32::MAX);
        let mut session = StageSession::open(stage, 1).unwrap();
        session.command(Motion::To(1.0)).unwrap();
        let err = session
            .wait_move(Some(Duration::from_millis(10)), POLL)
            .unwrap_err();
        assert!(matches!(err, MotorError::MoveTimeout(_)));
    }
    #[test]
    fn motion_start_seen_through_position_change() {
        // Move finishes before the first poll: is_moving never reports true.
        let stage = ScriptedStage::new().moving_polls(0);
        let mut session = StageSession::open(stage, 1).unwrap();
        let origin = session.position().unwrap();
        session.command(Motion::By(1.0)).unwrap();
        session
            .wait_motion_start(origin, Duration::from_millis(50), POLL)
            .unwrap();
    }
    #[test]
    fn motion_start_times_out_when_stage_stays_put() {
        let stage = ScriptedStage::new();
        let mut session = StageSession::open(stage, 1).unwrap();
        let err = session
            .wait_motion_start(0.0, Duration::from_millis(10), POLL)
            .unwrap_err();
        assert!(matches!(err, MotorError::MotionNotStarted(_)));
    }
}
