use std::ffi::{c_void, CString};
use std::os::raw::{c_char, c_double, c_int, c_uint, c_ulonglong};
use std::time::Duration;
use libloading::Library;
use log::{debug, warn};
use once_cell::sync::OnceCell;
use crate::drivers::error::log_release;
use crate::drivers::{ChannelSpec, DaqDriver, DaqError, VoltageRange};
type TaskHandle = *mut c_void;
const VAL_CFG_DEFAULT: c_int = -1;
const VAL_VOLTS: c_int = 10348;
const VAL_RISING: c_int = 10280;
const VAL_CONT_SAMPS: c_int = 10123;
const VAL_GROUP_BY_CHANNEL: c_uint = 0;
const ERR_SAMPLES_NOT_AVAILABLE: c_int = -200284;
const ERR_TIMEOUT: c_int = -200474;
const ERR_DEVICE_NOT_FOUND: c_int = -200220;
const ERR_PHYSICAL_CHAN_NOT_FOUND: c_int = -200170;
#[cfg(windows)]
const LIBRARY_NAMES: &[&str] = &["nicaiu.dll"];
#[cfg(not(windows))]
const LIBRARY_NAMES: &[&str] = &["libnidaqmx.so", "libnidaqmx.so.1"];
struct DaqmxApi {
    #[allow(dead_code)]
    lib: Library,
    create_task: unsafe extern "C" fn(*const c_char, *mut TaskHandle) -> c_int,
    create_ai_voltage_chan: unsafe extern "C" fn(
        TaskHandle,
        *const c_char,
        *const c_char,
        c_int,
        c_double,
        c_double,
        c_int,
        *const c_char,
    ) -> c_int,
    cfg_samp_clk_timing: unsafe extern "C" fn(
        TaskHandle,
        *const c_char,
        c_double,
        c_int,
        c_int,
        c_ulonglong,
    ) -> c_int,
    start_task: unsafe extern "C" fn(TaskHandle) -> c_int,
    stop_task: unsafe extern "C" fn(TaskHandle) -> c_int,
    clear_task: unsafe extern "C" fn(TaskHandle) -> c_int,
    read_analog_f64: unsafe extern "C" fn(
        TaskHandle,
        c_int,
        c_double,
        c_uint,
        *mut c_double,
        c_uint,
        *mut c_int,
        *mut c_uint,
    ) -> c_int,
    get_extended_error_info: unsafe extern "C" fn(*mut c_char, c_uint) -> c_int,
}
// Safety: the NI-DAQmx C API is documented as thread-safe; the struct only
// holds function pointers into the loaded library.
unsafe impl Send for DaqmxApi {}
unsafe impl Sync for DaqmxApi {}
impl DaqmxApi {
    fn load() -> Result<Self, DaqError> {
        let lib = LIBRARY_NAMES
            .iter()
            .find_map(|name| unsafe { Library::new(name) }.ok())
            .ok_or_else(|| DaqError::Library(format!("none of {LIBRARY_NAMES:?} found")))?;
        let missing = |e: libloading::Error| DaqError::Library(e.to_string());
        // Safety: signatures follow NIDAQmx.h.
        unsafe {
            Ok(Self {
                create_task: *lib.get(b"DAQmxCreateTask\0").map_err(missing)?,
                create_ai_voltage_chan: *lib.get(b"DAQmxCreateAIVoltageChan\0").map_err(missing)?,
                cfg_samp_clk_timing: *lib.get(b"DAQmxCfgSampClkTiming\0").map_err(missing)?,
                start_task: *lib.get(b"DAQmxStartTask\0").map_err(missing)?,
                stop_task: *lib.get(b"DAQmxStopTask\0").map_err(missing)?,
                clear_task: *lib.get(b"DAQmxClearTask\0").map_err(missing)?,
                read_analog_f64: *lib.get(b"DAQmxReadAnalogF64\0").map_err(missing)?,
                get_extended_error_info: *lib
                    .get(b"DAQmxGetExtendedErrorInfo\0")
                    .map_err(missing)?,
                lib,
            })
        }
    }
    fn instance() -> Result<&'static DaqmxApi, DaqError> {
        static API: OnceCell<DaqmxApi> = OnceCell::new();
        API.get_or_try_init(Self::load)
    }
    fn last_error_message(&self) -> String {
        let mut buf = vec![0 as c_char; 2048];
        unsafe { (self.get_extended_error_info)(buf.as_mut_ptr(), buf.len() as c_uint) };
        let bytes: Vec<u8> = buf
            .iter()
            .take_while(|c| **c != 0)
            .map(|c| *c as u8)
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
    /// Positive codes are warnings and are only logged.
    fn check(&self, code: c_int, context: &'static str) -> Result<(), DaqError> {
        if code == 0 {
            return Ok(());
        }
        let message = self.last_error_message();
        if code > 0 {
            warn!("{context} warning {code}: {message}");
            return Ok(());
        }
        Err(DaqError::Driver {
            code,
            context,
            message,
        })
    }
}
fn c_string(value: &str) -> Result<CString, DaqError> {
    CString::new(value).map_err(|_| DaqError::InvalidConfig(format!("`{value}` contains NUL")))
}
/// NI-DAQmx analog-input task for one voltage channel.
pub struct NiDaqmx {
    api: &'static DaqmxApi,
    task: TaskHandle,
    channel: Option<ChannelSpec>,
    running: bool,
}
// Safety: a DAQmx task handle may be used from any thread, one at a time;
// `&mut self` on every call keeps use exclusive.
unsafe impl Send for NiDaqmx {}
impl NiDaqmx {
    pub fn create() -> Result<Self, DaqError> {
        let api = DaqmxApi::instance()?;
        let name = c_string("")?;
        let mut task: TaskHandle = std::ptr::null_mut();
        api.check(
            unsafe { (api.create_task)(name.as_ptr(), &mut task as *mut TaskHandle) },
            "DAQmxCreateTask",
        )?;
        Ok(Self {
            api,
            task,
            channel: None,
            running: false,
        })
    }
}
impl DaqDriver for NiDaqmx {
    fn configure_channel(
        &mut self,
        channel: &ChannelSpec,
        range: VoltageRange,
    ) -> Result<(), DaqError> {
        let physical = c_string(&channel.to_string())?;
        let empty = c_string("")?;
        let code = unsafe {
            (self.api.create_ai_voltage_chan)(
                self.task,
                physical.as_ptr(),
                empty.as_ptr(),
                VAL_CFG_DEFAULT,
                range.min,
                range.max,
                VAL_VOLTS,
                std::ptr::null(),
            )
        };
        if code == ERR_DEVICE_NOT_FOUND || code == ERR_PHYSICAL_CHAN_NOT_FOUND {
            return Err(DaqError::ChannelNotFound(channel.to_string()));
        }
        self.api.check(code, "DAQmxCreateAIVoltageChan")?;
        self.channel = Some(channel.clone());
        Ok(())
    }
    fn start_continuous(
        &mut self,
        sample_rate_hz: f64,
        samples_per_channel: usize,
    ) -> Result<(), DaqError> {
        self.api.check(
            unsafe {
                (self.api.cfg_samp_clk_timing)(
                    self.task,
                    std::ptr::null(),
                    sample_rate_hz,
                    VAL_RISING,
                    VAL_CONT_SAMPS,
                    samples_per_channel as c_ulonglong,
                )
            },
            "DAQmxCfgSampClkTiming",
        )?;
        self.api
            .check(unsafe { (self.api.start_task)(self.task) }, "DAQmxStartTask")?;
        self.running = true;
        debug!("DAQmx task started on {:?}", self.channel);
        Ok(())
    }
    fn read(&mut self, samples: usize, timeout: Duration) -> Result<Vec<f64>, DaqError> {
        if !self.running {
            return Err(DaqError::NotRunning);
        }
        let mut buf = vec![0.0f64; samples];
        let mut read: c_int = 0;
        let code = unsafe {
            (self.api.read_analog_f64)(
                self.task,
                samples as c_int,
                timeout.as_secs_f64(),
                VAL_GROUP_BY_CHANNEL,
                buf.as_mut_ptr(),
                buf.len() as c_uint,
                &mut read as *mut c_int,
                std::ptr::null_mut(),
            )
        };
        if code == ERR_SAMPLES_NOT_AVAILABLE || code == ERR_TIMEOUT {
            return Err(DaqError::Timeout {
                requested: samples,
                timeout,
            });
        }
        self.api.check(code, "DAQmxReadAnalogF64")?;
        buf.truncate(read.max(0) as usize);
        Ok(buf)
    }
    fn stop(&mut self) -> Result<(), DaqError> {
        if !self.running {
            return Ok(());
        }
        self.running = false;
        self.api
            .check(unsafe { (self.api.stop_task)(self.task) }, "DAQmxStopTask")
    }
}
impl Drop for NiDaqmx {
    fn drop(&mut self) {
        log_release("DAQmx task", self.stop());
        if !self.task.is_null() {
            let code = unsafe { (self.api.clear_task)(self.task) };
            log_release("DAQmx task", self.api.check(code, "DAQmxClearTask"));
            self.task = std::ptr::null_mut();
        }
    }
}
