use std::fmt::{self, Display, Formatter};

use embedded_hal::blocking::spi::Transfer;
use error_stack::{Context, Report, Result, ResultExt};
use log::{debug, info};
use mcp3208_eh::FRAME_LEN;
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};

use crate::config::{ChipSelect, ClockMode, SpiConfig};

// The ADC sits alone on its chip select, so the transport never shares the
// bus. Whoever holds the Transport holds the device.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    Initialization,
    Transfer,
    Closed,
}

impl Context for TransportError {}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            TransportError::Initialization => write!(f, "SPI initialization failed"),
            TransportError::Transfer => write!(f, "SPI transfer failed"),
            TransportError::Closed => write!(f, "SPI device already closed"),
        }
    }
}

/// A full-duplex SPI device that can be released explicitly.
pub trait SpiHandle: Transfer<u8> {
    /// Releases the device. Calling it again does nothing.
    fn close(&mut self);
}

impl From<ChipSelect> for SlaveSelect {
    fn from(cs: ChipSelect) -> Self {
        match cs {
            ChipSelect::Ce0 => SlaveSelect::Ss0,
            ChipSelect::Ce1 => SlaveSelect::Ss1,
        }
    }
}

impl From<ClockMode> for Mode {
    fn from(mode: ClockMode) -> Self {
        match mode {
            ClockMode::Mode0 => Mode::Mode0,
            ClockMode::Mode1 => Mode::Mode1,
            ClockMode::Mode2 => Mode::Mode2,
            ClockMode::Mode3 => Mode::Mode3,
        }
    }
}

impl From<ClockMode> for SpiModeFlags {
    fn from(mode: ClockMode) -> Self {
        match mode {
            ClockMode::Mode0 => SpiModeFlags::SPI_MODE_0,
            ClockMode::Mode1 => SpiModeFlags::SPI_MODE_1,
            ClockMode::Mode2 => SpiModeFlags::SPI_MODE_2,
            ClockMode::Mode3 => SpiModeFlags::SPI_MODE_3,
        }
    }
}

enum Device {
    /// slave on the default controller (SPI0)
    Controller(Spi),
    /// explicit /dev/spidevB.C node
    Node(Spidev),
}

pub struct Transport {
    device: Option<Device>,
}

impl Transport {
    pub fn open(config: &SpiConfig) -> Result<Self, TransportError> {
        if config.clock_hz == 0 {
            return Err(Report::new(TransportError::Initialization)
                .attach_printable("SPI clock rate must be greater than zero"));
        }

        let device = match &config.device {
            None => {
                let spi = Spi::new(
                    Bus::Spi0,
                    config.chip_select.into(),
                    config.clock_hz,
                    config.clock_mode.into(),
                )
                    .change_context(TransportError::Initialization)
                    .attach_printable_lazy(|| {
                        format!("no usable SPI0 controller for CE{}", config.chip_select.index())
                    })?;
                Device::Controller(spi)
            }
            Some(path) => {
                let options = SpidevOptions::new()
                    .bits_per_word(8)
                    .max_speed_hz(config.clock_hz)
                    .lsb_first(false)
                    .mode(config.clock_mode.into())
                    .build();
                let mut spi = Spidev::open(path)
                    .change_context(TransportError::Initialization)
                    .attach_printable_lazy(|| format!("failed opening {}", path.display()))?;
                spi.configure(&options)
                    .change_context(TransportError::Initialization)
                    .attach_printable_lazy(|| format!("failed configuring {}", path.display()))?;
                Device::Node(spi)
            }
        };

        info!(
            "SPI device open: CE{} at {} Hz, {:?}",
            config.chip_select.index(),
            config.clock_hz,
            config.clock_mode
        );
        Ok(Self { device: Some(device) })
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Clocks `write` out while clocking the same number of bytes in.
    pub fn exchange(&mut self, write: [u8; FRAME_LEN]) -> Result<[u8; FRAME_LEN], TransportError> {
        let mut read = [0u8; FRAME_LEN];
        self.full_duplex(&mut read, &write)?;
        Ok(read)
    }

    pub fn close(&mut self) {
        if self.device.take().is_some() {
            info!("SPI device released");
        }
    }

    fn full_duplex(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), TransportError> {
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| Report::new(TransportError::Closed))?;
        match device {
            Device::Controller(spi) => {
                let clocked = spi.transfer(read, write).change_context(TransportError::Transfer)?;
                if clocked != write.len() {
                    return Err(Report::new(TransportError::Transfer).attach_printable(format!(
                        "short transfer: {} of {} bytes",
                        clocked,
                        write.len()
                    )));
                }
            }
            Device::Node(spi) => {
                let mut transfer = SpidevTransfer::read_write(write, read);
                spi.transfer(&mut transfer).change_context(TransportError::Transfer)?;
            }
        }
        debug!("spi exchange {:02x?} -> {:02x?}", write, read);
        Ok(())
    }
}

impl Transfer<u8> for Transport {
    type Error = Report<TransportError>;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], TransportError> {
        let write = words.to_vec();
        self.full_duplex(words, &write)?;
        Ok(words)
    }
}

impl SpiHandle for Transport {
    fn close(&mut self) {
        Transport::close(self)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn closed() -> Transport {
        Transport { device: None }
    }

    #[test]
    fn zero_clock_is_rejected() {
        let config = SpiConfig { clock_hz: 0, ..SpiConfig::default() };
        let report = Transport::open(&config).err().unwrap();
        assert_eq!(*report.current_context(), TransportError::Initialization);
    }

    #[test]
    fn missing_node_is_an_initialization_error() {
        let config = SpiConfig {
            device: Some(PathBuf::from("/dev/does-not-exist/spidev9.9")),
            ..SpiConfig::default()
        };
        let report = Transport::open(&config).err().unwrap();
        assert_eq!(*report.current_context(), TransportError::Initialization);
    }

    #[test]
    fn exchange_after_close_fails_fast() {
        let mut transport = closed();
        assert!(!transport.is_open());
        let report = transport.exchange([0x06, 0x00, 0x00]).err().unwrap();
        assert_eq!(*report.current_context(), TransportError::Closed);
    }

    #[test]
    fn transfer_after_close_fails_fast() {
        let mut transport = closed();
        let mut words = [0x06, 0x00, 0x00];
        let report = transport.transfer(&mut words).err().unwrap();
        assert_eq!(*report.current_context(), TransportError::Closed);
    }

    #[test]
    fn close_is_idempotent() {
        let mut transport = closed();
        transport.close();
        SpiHandle::close(&mut transport);
        assert!(!transport.is_open());
    }
}
