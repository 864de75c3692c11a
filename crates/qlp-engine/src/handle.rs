use bytes::Bytes;
use qlp_frame::{ChipId, Color, Command};
use qlp_transport::{DatagramTransport, UdpBroadcast};

use crate::correlator::{Dispatch, Disposition};
use crate::device::Device;
use crate::engine::Engine;
use crate::error::{EngineError, Result};

/// Largest strip length the one-byte LENGTH argument can carry.
pub const MAX_STRIP_LENGTH: u16 = u8::MAX as u16;

/// High-level commands for one registered device.
///
/// The handle is bound to the device's chip id and reads the registry on
/// every call, so it follows device id and address changes picked up by later
/// announcements.
#[derive(Debug)]
pub struct DeviceHandle<T: DatagramTransport = UdpBroadcast> {
    engine: Engine<T>,
    chip_id: ChipId,
}

impl<T: DatagramTransport> Clone for DeviceHandle<T> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            chip_id: self.chip_id,
        }
    }
}

impl<T: DatagramTransport> DeviceHandle<T> {
    pub(crate) fn new(engine: Engine<T>, chip_id: ChipId) -> Self {
        Self { engine, chip_id }
    }

    pub fn chip_id(&self) -> ChipId {
        self.chip_id
    }

    /// Current registry record.
    pub fn device(&self) -> Result<Device> {
        self.engine
            .lookup_chip(self.chip_id)
            .ok_or_else(|| EngineError::UnknownDevice(self.chip_id.to_string()))
    }

    /// Last strip length set through any handle; 0 if never set.
    pub fn length(&self) -> u16 {
        self.device().map_or(0, |device| device.strip_length)
    }

    /// Set the strip length.
    ///
    /// The cached length is updated as soon as the command is sent, without
    /// waiting for the device to acknowledge it. Until the reply arrives (or if
    /// the device rejects the command) the cache may not match the device.
    pub async fn set_length(&self, length: u16) -> Result<Dispatch> {
        let Ok(arg) = u8::try_from(length) else {
            return Err(EngineError::OutOfRange {
                field: "length",
                value: length,
                range: 0..MAX_STRIP_LENGTH + 1,
            });
        };
        let dispatch = self.send(Command::Length(arg)).await?;
        self.engine.registry().set_strip_length(self.chip_id, length);
        Ok(dispatch)
    }

    pub async fn set_pixel_color(&self, index: u16, color: Color) -> Result<Dispatch> {
        let device = self.device()?;
        check_index("index", index, device.strip_length)?;
        self.engine
            .send_command(&device, Command::SetPixel { index, color })
            .await
    }

    /// Color pixels `start` through `end`. Both must lie inside the strip and
    /// `start` must be below `end`.
    pub async fn set_line_color(&self, start: u16, end: u16, color: Color) -> Result<Dispatch> {
        let device = self.device()?;
        check_index("start", start, device.strip_length)?;
        check_index("end", end, device.strip_length)?;
        if start >= end {
            return Err(EngineError::OutOfRange {
                field: "start",
                value: start,
                range: 0..end,
            });
        }
        self.engine
            .send_command(&device, Command::SetLine { start, end, color })
            .await
    }

    pub async fn fill(&self, color: Color) -> Result<Dispatch> {
        self.send(Command::Fill(color)).await
    }

    pub async fn reboot(&self) -> Result<Dispatch> {
        self.send(Command::Reboot).await
    }

    /// Send any command id with pre-encoded arguments.
    pub async fn send_raw(&self, id: u8, args: impl Into<Bytes>) -> Result<Dispatch> {
        self.send(Command::Raw {
            id,
            args: args.into(),
        })
        .await
    }

    /// Wait for the command in flight, if any.
    pub async fn settle(&self) -> Result<Disposition> {
        let device = self.device()?;
        Ok(self.engine.settle(&device.device_id).await)
    }

    async fn send(&self, command: Command) -> Result<Dispatch> {
        let device = self.device()?;
        self.engine.send_command(&device, command).await
    }
}

fn check_index(field: &'static str, value: u16, length: u16) -> Result<()> {
    if value < length {
        Ok(())
    } else {
        Err(EngineError::OutOfRange {
            field,
            value,
            range: 0..length,
        })
    }
}
