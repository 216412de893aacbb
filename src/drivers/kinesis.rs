use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_short, c_uint};
use std::thread;
use std::time::Duration;
use libloading::Library;
use log::{debug, info, warn};
use once_cell::sync::OnceCell;
use crate::drivers::error::log_release;
use crate::drivers::{MotorDriver, MotorError};
const LIBRARY_NAME: &str = "Thorlabs.MotionControl.KCube.InertialMotor.dll";
const POLLING_MS: c_int = 50;
const ERR_DEVICE_NOT_FOUND: c_short = 2;
// KIM status bits: moving forward/reverse, jogging forward/reverse.
const STATUS_MOVING_MASK: c_uint = 0x0000_0010 | 0x0000_0020 | 0x0000_0040 | 0x0000_0080;
const CHANNEL_COUNT: u8 = 4;
struct KinesisApi {
    #[allow(dead_code)]
    lib: Library,
    build_device_list: unsafe extern "C" fn() -> c_short,
    open: unsafe extern "C" fn(*const c_char) -> c_short,
    close: unsafe extern "C" fn(*const c_char),
    start_polling: unsafe extern "C" fn(*const c_char, c_int) -> bool,
    stop_polling: unsafe extern "C" fn(*const c_char),
    enable: unsafe extern "C" fn(*const c_char) -> c_short,
    request_status: unsafe extern "C" fn(*const c_char) -> c_short,
    get_current_position: unsafe extern "C" fn(*const c_char, c_int) -> c_int,
    move_relative: unsafe extern "C" fn(*const c_char, c_int, c_int) -> c_short,
    move_absolute: unsafe extern "C" fn(*const c_char, c_int, c_int) -> c_short,
    get_status_bits: unsafe extern "C" fn(*const c_char, c_int) -> c_uint,
}
// Safety: only function pointers into the loaded library are held.
unsafe impl Send for KinesisApi {}
unsafe impl Sync for KinesisApi {}
impl KinesisApi {
    fn load() -> Result<Self, MotorError> {
        let lib = unsafe { Library::new(LIBRARY_NAME) }
            .map_err(|e| MotorError::Library(format!("{LIBRARY_NAME}: {e}")))?;
        let missing = |e: libloading::Error| MotorError::Library(e.to_string());
        // Safety: signatures follow Thorlabs.MotionControl.KCube.InertialMotor.h.
        unsafe {
            Ok(Self {
                build_device_list: *lib.get(b"TLI_BuildDeviceList\0").map_err(missing)?,
                open: *lib.get(b"KIM_Open\0").map_err(missing)?,
                close: *lib.get(b"KIM_Close\0").map_err(missing)?,
                start_polling: *lib.get(b"KIM_StartPolling\0").map_err(missing)?,
                stop_polling: *lib.get(b"KIM_StopPolling\0").map_err(missing)?,
                enable: *lib.get(b"KIM_Enable\0").map_err(missing)?,
                request_status: *lib.get(b"KIM_RequestStatus\0").map_err(missing)?,
                get_current_position: *lib.get(b"KIM_GetCurrentPosition\0").map_err(missing)?,
                move_relative: *lib.get(b"KIM_MoveRelative\0").map_err(missing)?,
                move_absolute: *lib.get(b"KIM_MoveAbsolute\0").map_err(missing)?,
                get_status_bits: *lib.get(b"KIM_GetStatusBits\0").map_err(missing)?,
                lib,
            })
        }
    }
    fn instance() -> Result<&'static KinesisApi, MotorError> {
        static API: OnceCell<KinesisApi> = OnceCell::new();
        API.get_or_try_init(Self::load)
    }
    fn check(code: c_short, context: &'static str) -> Result<(), MotorError> {
        if code == 0 {
            Ok(())
        } else {
            Err(MotorError::Driver {
                code: code as c_int,
                context,
            })
        }
    }
}
/// Thorlabs KIM101 piezo inertia-motor controller. Positions are in steps.
pub struct KinesisInertialMotor {
    api: &'static KinesisApi,
    serial: String,
    serial_c: CString,
    open: bool,
}
impl KinesisInertialMotor {
    pub fn open(serial: &str) -> Result<Self, MotorError> {
        let api = KinesisApi::instance()?;
        let serial_c = CString::new(serial)
            .map_err(|_| MotorError::DeviceNotFound(serial.to_string()))?;
        KinesisApi::check(
            unsafe { (api.build_device_list)() },
            "TLI_BuildDeviceList",
        )?;
        let code = unsafe { (api.open)(serial_c.as_ptr()) };
        if code == ERR_DEVICE_NOT_FOUND {
            return Err(MotorError::DeviceNotFound(serial.to_string()));
        }
        KinesisApi::check(code, "KIM_Open")?;
        if !unsafe { (api.start_polling)(serial_c.as_ptr(), POLLING_MS) } {
            warn!("KIM_StartPolling refused for {serial}; status may be stale");
        }
        info!("KIM101 {serial} opened");
        Ok(Self {
            api,
            serial: serial.to_string(),
            serial_c,
            open: true,
        })
    }
    fn check_channel(channel: u8) -> Result<c_int, MotorError> {
        if (1..=CHANNEL_COUNT).contains(&channel) {
            Ok(channel as c_int)
        } else {
            Err(MotorError::InvalidChannel(channel))
        }
    }
    fn steps(value: f64) -> Result<c_int, MotorError> {
        if !value.is_finite() || value.abs() > c_int::MAX as f64 {
            return Err(MotorError::Fault(format!("step count {value} out of range")));
        }
        Ok(value.round() as c_int)
    }
}
impl MotorDriver for KinesisInertialMotor {
    fn serial(&self) -> &str {
        &self.serial
    }
    fn enable_channel(&mut self, channel: u8) -> Result<(), MotorError> {
        Self::check_channel(channel)?;
        KinesisApi::check(
            unsafe { (self.api.enable)(self.serial_c.as_ptr()) },
            "KIM_Enable",
        )
    }
    fn position(&mut self, channel: u8) -> Result<f64, MotorError> {
        let ch = Self::check_channel(channel)?;
        Ok(unsafe { (self.api.get_current_position)(self.serial_c.as_ptr(), ch) } as f64)
    }
    fn move_by(&mut self, channel: u8, distance: f64) -> Result<(), MotorError> {
        let ch = Self::check_channel(channel)?;
        let steps = Self::steps(distance)?;
        KinesisApi::check(
            unsafe { (self.api.move_relative)(self.serial_c.as_ptr(), ch, steps) },
            "KIM_MoveRelative",
        )
    }
    fn move_to(&mut self, channel: u8, position: f64) -> Result<(), MotorError> {
        let ch = Self::check_channel(channel)?;
        let steps = Self::steps(position)?;
        KinesisApi::check(
            unsafe { (self.api.move_absolute)(self.serial_c.as_ptr(), ch, steps) },
            "KIM_MoveAbsolute",
        )
    }
    fn is_moving(&mut self, channel: u8) -> Result<bool, MotorError> {
        let ch = Self::check_channel(channel)?;
        KinesisApi::check(
            unsafe { (self.api.request_status)(self.serial_c.as_ptr()) },
            "KIM_RequestStatus",
        )?;
        // Let the polling thread pick up the fresh status message.
        thread::sleep(Duration::from_millis(POLLING_MS as u64 / 5));
        let bits = unsafe { (self.api.get_status_bits)(self.serial_c.as_ptr(), ch) };
        Ok(bits & STATUS_MOVING_MASK != 0)
    }
    fn close(&mut self) -> Result<(), MotorError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        unsafe {
            (self.api.stop_polling)(self.serial_c.as_ptr());
            (self.api.close)(self.serial_c.as_ptr());
        }
        debug!("KIM101 {} closed", self.serial);
        Ok(())
    }
}
impl Drop for KinesisInertialMotor {
    fn drop(&mut self) {
        let what = format!("KIM101 {}", self.serial);
        log_release(&what, self.close());
    }
}
