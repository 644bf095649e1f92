// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Argon One fan control over I2C.
//!
//! The case's fan controller sits at a fixed address on the Pi's I2C bus
//! and takes a single byte: the desired duty cycle in percent (0-100).

use rppal::i2c::I2c;
use thiserror::Error;

/// I2C address of the fan controller in the Argon One case.
///
/// This is a hardware constant and should never change; it can be
/// overridden for diagnostic purposes only (`i2cdetect` shows the real
/// address if in doubt).
pub const DEFAULT_FAN_ADDRESS: u16 = 0x1A;

/// Default I2C bus the fan resides on.
pub const DEFAULT_I2C_BUS: u8 = 0;

#[derive(Debug, Error)]
pub enum FanError {
    #[error("fan speed {0} is out of range [0-100]")]
    SpeedOutOfRange(u8),

    #[error("opening i2c bus {bus}: {source}")]
    Bus {
        bus: u8,
        source: rppal::i2c::Error,
    },

    #[error("writing speed to fan at 0x{address:02x} on bus {bus}: {source}")]
    Write {
        bus: u8,
        address: u16,
        source: rppal::i2c::Error,
    },
}

/// Handle to the fan controller on a specific bus and address.
///
/// Each [`set_speed`](Fan::set_speed) call opens its own bus transaction,
/// so the handle stays valid across process suspension.
#[derive(Debug, Clone)]
pub struct Fan {
    bus: u8,
    address: u16,
}

impl Fan {
    /// Connect to the fan controller. Opens the bus once to verify it is
    /// usable; an unopenable bus is a startup failure.
    pub fn connect(bus: u8, address: u16) -> Result<Self, FanError> {
        I2c::with_bus(bus).map_err(|source| FanError::Bus { bus, source })?;
        Ok(Self { bus, address })
    }

    /// Write a duty cycle (0-100 percent) to the fan controller.
    ///
    /// An out-of-range percentage fails before any bus access.
    pub fn set_speed(&self, percent: u8) -> Result<(), FanError> {
        if percent > 100 {
            return Err(FanError::SpeedOutOfRange(percent));
        }

        let mut i2c = I2c::with_bus(self.bus).map_err(|source| FanError::Bus {
            bus: self.bus,
            source,
        })?;
        i2c.set_slave_address(self.address)
            .map_err(|source| self.write_error(source))?;
        i2c.write(&[percent])
            .map_err(|source| self.write_error(source))?;
        Ok(())
    }

    fn write_error(&self, source: rppal::i2c::Error) -> FanError {
        FanError::Write {
            bus: self.bus,
            address: self.address,
            source,
        }
    }
}

/// Fan actuation seam for the control loop. Abstracted so tests can record
/// writes without an I2C bus.
pub trait FanOutput: Send {
    /// Write a duty cycle (0-100 percent) to the fan.
    fn set_speed(&mut self, percent: u8) -> Result<(), FanError>;
}

impl FanOutput for Fan {
    fn set_speed(&mut self, percent: u8) -> Result<(), FanError> {
        Fan::set_speed(self, percent)
    }
}
