//! Native layer backed by V4L2 via the `v4l` crate.
//!
//! Frames are streamed through mmap buffers. Sensor registers are reached
//! through the V4L2 debug register ioctls, which address the sensor
//! subdevice behind the bridge (requires `CONFIG_VIDEO_ADV_DEBUG`).

use crate::error_codes::ErrorCode;
use crate::native::{DeviceId, DeviceIdentity, NativeFault, NativeLayer, RawImage, SourceConfig};
use crate::sensor_config::{ConfigError, SensorConfig};
use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::time::Duration;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::FourCC;

/// `VIDIOC_DBG_S_REGISTER` = `_IOW('V', 79, struct v4l2_dbg_register)`.
const VIDIOC_DBG_S_REGISTER: libc::c_ulong = 0x4038_564F;

/// `VIDIOC_DBG_G_REGISTER` = `_IOWR('V', 80, struct v4l2_dbg_register)`.
const VIDIOC_DBG_G_REGISTER: libc::c_ulong = 0xC038_5650;

/// `V4L2_CHIP_MATCH_SUBDEV`: `match.addr` is a subdevice index.
const V4L2_CHIP_MATCH_SUBDEV: u32 = 4;

/// Highest `/dev/videoN` index probed during enumeration.
const MAX_VIDEO_INDEX: u32 = 64;

/// Mirror of the packed `struct v4l2_dbg_register` from `<linux/videodev2.h>`.
///
/// Layout: match.type:u32 match.{addr:u32 | name:[u8;32]} size:u32 reg:u64 val:u64
/// Total: 4+32+4+8+8 = 56 bytes.
#[repr(C, packed)]
struct V4l2DbgRegister {
    match_type: u32,
    match_addr: u32,
    _match_name_tail: [u8; 28],
    size: u32,
    reg: u64,
    val: u64,
}

const _SIZE_ASSERT: () = assert!(
    std::mem::size_of::<V4l2DbgRegister>() == 56,
    "V4l2DbgRegister must be 56 bytes to match the kernel ABI"
);

/// Negotiated pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale, reduced to the high byte.
    Y16,
    /// YUYV 4:2:2, luma extracted.
    Yuyv,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"GREY" => Some(Self::Grey),
            b"Y16 " | b"Y16\0" => Some(Self::Y16),
            b"YUYV" => Some(Self::Yuyv),
            _ => None,
        }
    }

    /// Convert a raw buffer to 8-bit luma. Returns `None` if the buffer is
    /// too short for `pixels`.
    fn to_luma(self, buf: &[u8], pixels: usize) -> Option<Vec<u8>> {
        match self {
            Self::Grey => buf.get(..pixels).map(<[u8]>::to_vec),
            Self::Y16 => {
                let bytes = buf.get(..pixels * 2)?;
                Some(bytes.chunks_exact(2).map(|px| px[1]).collect())
            }
            Self::Yuyv => {
                let bytes = buf.get(..pixels * 2)?;
                Some(bytes.iter().step_by(2).copied().collect())
            }
        }
    }
}

/// An opened V4L2 device.
pub struct V4l2Handle {
    index: u32,
    device: Device,
    /// Second descriptor used for register ioctls.
    control: File,
    subdev: u32,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    stream: Option<MmapStream<'static>>,
}

/// V4L2 implementation of [`NativeLayer`].
#[derive(Debug, Clone)]
pub struct V4l2Backend {
    buffer_count: u32,
    timeout: Duration,
}

impl Default for V4l2Backend {
    fn default() -> Self {
        Self {
            buffer_count: 4,
            timeout: Duration::from_secs(2),
        }
    }
}

impl V4l2Backend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mmap buffers requested when capture begins.
    pub fn with_buffer_count(mut self, count: u32) -> Self {
        self.buffer_count = count.max(1);
        self
    }

    /// How long a single capture waits for a buffer.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn video_path(index: u32) -> String {
    format!("/dev/video{index}")
}

/// Map a register ioctl failure onto the status taxonomy where one fits.
fn register_fault(op: &str, address: u16, err: std::io::Error) -> NativeFault {
    match err.raw_os_error() {
        Some(libc::EIO) | Some(libc::ENXIO) | Some(libc::EREMOTEIO) => {
            NativeFault::Status(ErrorCode::I2C_NACK)
        }
        Some(libc::ETIMEDOUT) => NativeFault::Status(ErrorCode::I2C_TIMEOUT),
        _ => NativeFault::library(format!("{op} register 0x{address:04X}: {err}")),
    }
}

impl V4l2Handle {
    fn dbg_register(&self, address: u16, value: u8) -> V4l2DbgRegister {
        V4l2DbgRegister {
            match_type: V4L2_CHIP_MATCH_SUBDEV,
            match_addr: self.subdev,
            _match_name_tail: [0; 28],
            size: 1,
            reg: u64::from(address),
            val: u64::from(value),
        }
    }

    fn read_reg(&self, address: u16) -> Result<u8, NativeFault> {
        let mut query = self.dbg_register(address, 0);

        // SAFETY:
        // - fd is valid for the lifetime of `self.control`
        // - `query` is repr(C, packed) and sized to match the kernel ABI
        let ret = unsafe {
            libc::ioctl(
                self.control.as_raw_fd(),
                VIDIOC_DBG_G_REGISTER,
                &mut query as *mut V4l2DbgRegister,
            )
        };
        if ret < 0 {
            return Err(register_fault(
                "read",
                address,
                std::io::Error::last_os_error(),
            ));
        }
        let val = query.val;
        Ok((val & 0xFF) as u8)
    }

    fn write_reg(&self, address: u16, value: u8) -> Result<(), NativeFault> {
        let mut query = self.dbg_register(address, value);

        // SAFETY: as in `read_reg`; the kernel only reads from `query`.
        let ret = unsafe {
            libc::ioctl(
                self.control.as_raw_fd(),
                VIDIOC_DBG_S_REGISTER,
                &mut query as *mut V4l2DbgRegister,
            )
        };
        if ret < 0 {
            Err(register_fault(
                "write",
                address,
                std::io::Error::last_os_error(),
            ))
        } else {
            Ok(())
        }
    }
}

impl NativeLayer for V4l2Backend {
    type Handle = V4l2Handle;

    fn list_devices(&mut self) -> Result<Vec<DeviceIdentity>, NativeFault> {
        let mut devices = Vec::new();

        for index in 0..MAX_VIDEO_INDEX {
            let path = video_path(index);
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceIdentity {
                serial: caps.bus.clone(),
                index,
            });
        }

        Ok(devices)
    }

    fn initialize(
        &mut self,
        id: DeviceId,
        config: &SourceConfig,
    ) -> Result<V4l2Handle, NativeFault> {
        let sensor = SensorConfig::load(&config.config_path).map_err(|e| match e {
            ConfigError::NotFound(_) => NativeFault::Status(ErrorCode::CONFIG_NOT_FOUND),
            other => NativeFault::library(other.to_string()),
        })?;
        let fourcc_bytes = sensor
            .fourcc_bytes()
            .map_err(|e| NativeFault::library(e.to_string()))?;

        let index = id.get();
        let path = video_path(index);
        let device = Device::with_path(&path)
            .map_err(|e| NativeFault::library(format!("failed to open {path}: {e}")))?;

        let caps = device
            .query_caps()
            .map_err(|e| NativeFault::library(format!("failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(NativeFault::library(format!(
                "{path} is not a video capture device"
            )));
        }

        tracing::info!(
            device = %path,
            driver = %caps.driver,
            card = %caps.card,
            sensor = %sensor.sensor.name,
            "opened camera"
        );

        let mut fmt = device
            .format()
            .map_err(|e| NativeFault::library(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(&fourcc_bytes);
        fmt.width = config.frame_size.width;
        fmt.height = config.frame_size.height;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| NativeFault::library(format!("failed to set format: {e}")))?;

        if negotiated.width != config.frame_size.width
            || negotiated.height != config.frame_size.height
        {
            tracing::warn!(
                requested_width = config.frame_size.width,
                requested_height = config.frame_size.height,
                width = negotiated.width,
                height = negotiated.height,
                "driver rejected frame size"
            );
            return Err(NativeFault::Status(ErrorCode::SIZE_EXCEED));
        }
        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            NativeFault::library(format!(
                "unsupported pixel format: {:?} (need GREY, Y16 or YUYV)",
                negotiated.fourcc
            ))
        })?;

        if let Err(e) = device.set_params(&Parameters::with_fps(config.frame_rate)) {
            tracing::warn!(fps = config.frame_rate, error = %e, "failed to set frame rate");
        }

        let control = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| NativeFault::library(format!("failed to open {path}: {e}")))?;

        let handle = V4l2Handle {
            index,
            device,
            control,
            subdev: sensor.sensor.subdev,
            width: negotiated.width,
            height: negotiated.height,
            pixel_format,
            stream: None,
        };

        for write in &sensor.init {
            handle.write_reg(write.address, write.value)?;
        }
        tracing::debug!(device = %path, writes = sensor.init.len(), "sensor init sequence applied");

        Ok(handle)
    }

    fn begin_capture(&mut self, handle: &mut V4l2Handle) -> Result<(), NativeFault> {
        let mut stream =
            MmapStream::with_buffers(&handle.device, BufType::VideoCapture, self.buffer_count)
                .map_err(|e| {
                    NativeFault::library(format!("failed to create mmap stream: {e}"))
                })?;
        stream.set_timeout(self.timeout);
        handle.stream = Some(stream);
        Ok(())
    }

    fn capture(&mut self, handle: &mut V4l2Handle) -> Result<Option<RawImage>, NativeFault> {
        let pixels = handle.width as usize * handle.height as usize;
        let pixel_format = handle.pixel_format;
        let stream = handle
            .stream
            .as_mut()
            .ok_or_else(|| NativeFault::library("capture has not begun"))?;

        let (buf, meta) = stream.next().map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                NativeFault::Status(ErrorCode::USB_TIMEOUT)
            }
            _ => NativeFault::library(format!("failed to dequeue buffer: {e}")),
        })?;

        let used = (meta.bytesused as usize).min(buf.len());
        let Some(data) = pixel_format.to_luma(&buf[..used], pixels) else {
            tracing::debug!(
                seq = meta.sequence,
                bytes_used = used,
                "short buffer from driver"
            );
            return Ok(None);
        };

        Ok(Some(RawImage {
            width: handle.width,
            height: handle.height,
            data,
        }))
    }

    fn read_register(&mut self, handle: &mut V4l2Handle, address: u16) -> Result<u8, NativeFault> {
        handle.read_reg(address)
    }

    fn write_register(
        &mut self,
        handle: &mut V4l2Handle,
        address: u16,
        value: u8,
    ) -> Result<(), NativeFault> {
        handle.write_reg(address, value)
    }

    fn end_capture(&mut self, handle: &mut V4l2Handle) -> Result<(), NativeFault> {
        // dropping the stream issues STREAMOFF and unmaps the buffers
        handle.stream = None;
        Ok(())
    }

    fn close(&mut self, handle: V4l2Handle) -> Result<(), NativeFault> {
        tracing::debug!(device = %video_path(handle.index), "closing camera");
        drop(handle);
        Ok(())
    }
}
