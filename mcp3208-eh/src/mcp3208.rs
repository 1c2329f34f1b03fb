use std::fmt;

use embedded_hal::blocking::spi::Transfer;

use crate::channel::{Channel, CHANNEL_COUNT};

/// bytes clocked per conversion
pub const FRAME_LEN: usize = 3;

/// full scale output code (12 bits)
pub const MAX_CODE: u16 = 0x0FFF;

/// start bit and single-ended mode bit, both in byte 0
const START_SINGLE_ENDED: u8 = 0b0000_0110;

#[derive(Debug, PartialEq)]
pub enum Error<E> {
    Spi(E),
    InvalidChannel(u8),
    /// the bus clocked fewer than `FRAME_LEN` bytes back
    ShortResponse(usize),
}

impl<E: fmt::Debug> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Spi(err) => write!(f, "spi transfer failed: {:?}", err),
            Error::InvalidChannel(index) => write!(f, "invalid channel number ({})", index),
            Error::ShortResponse(len) => {
                write!(f, "short response ({} of {} bytes)", len, FRAME_LEN)
            }
        }
    }
}

impl<E: fmt::Debug> std::error::Error for Error<E> {}

/// Builds the single-ended read command for `channel`.
///
/// ```text
/// byte 0: 0000_0SM2   S: start, M: single-ended, 2: channel bit 2
/// byte 1: 10xx_xxxx   1, 0: channel bits 1..0, rest don't care (0)
/// byte 2: xxxx_xxxx   don't care (0), clocks out the low result byte
/// ```
pub fn command(channel: Channel) -> [u8; FRAME_LEN] {
    let channel = channel.index();
    [
        START_SINGLE_ENDED | ((channel & 0b100) >> 2),
        (channel & 0b011) << 6,
        0x00,
    ]
}

/// Extracts the 12-bit code from a response frame.
///
/// The chip answers with a null bit followed by B11..B0, so the code sits in
/// the low nibble of byte 1 and all of byte 2. Byte 0 carries nothing.
pub fn decode(response: [u8; FRAME_LEN]) -> u16 {
    ((response[1] & 0x0F) as u16) << 8 | response[2] as u16
}

/// Scales a raw code against the reference voltage. `MAX_CODE` maps to `vref`.
pub fn to_voltage(raw: u16, vref: f64) -> f64 {
    raw as f64 * vref / MAX_CODE as f64
}

/// An MCP3208 on a dedicated SPI device. Chip select is the bus' business.
pub struct Mcp3208<SPI> {
    spi: SPI,
    vref: f64,
}

impl<SPI, E> Mcp3208<SPI>
where
    SPI: Transfer<u8, Error = E>,
{
    pub fn new(spi: SPI, vref: f64) -> Self {
        Mcp3208 { spi, vref }
    }

    pub fn reference_voltage(&self) -> f64 {
        self.vref
    }

    /// Runs one conversion and returns the raw 12-bit code.
    pub fn read(&mut self, channel: Channel) -> Result<u16, Error<E>> {
        let mut frame = command(channel);
        let response = self.spi.transfer(&mut frame).map_err(Error::Spi)?;
        let rx: [u8; FRAME_LEN] = response
            .try_into()
            .map_err(|_| Error::ShortResponse(response.len()))?;
        Ok(decode(rx))
    }

    pub fn read_index(&mut self, index: u8) -> Result<u16, Error<E>> {
        let channel = Channel::try_from(index).map_err(|e| Error::InvalidChannel(e.0))?;
        self.read(channel)
    }

    pub fn read_voltage(&mut self, channel: Channel) -> Result<f64, Error<E>> {
        let raw = self.read(channel)?;
        Ok(to_voltage(raw, self.vref))
    }

    /// Raw codes of every channel, read one after another in ascending order.
    pub fn read_all(&mut self) -> Result<[u16; CHANNEL_COUNT], Error<E>> {
        let mut codes = [0u16; CHANNEL_COUNT];
        for channel in Channel::ALL {
            codes[channel.index() as usize] = self.read(channel)?;
        }
        Ok(codes)
    }

    /// Gives the bus back.
    pub fn release(self) -> SPI {
        self.spi
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::spi::{Mock as MockSPI, Transaction as SPITransaction};

    #[test]
    fn command_layout_for_every_channel() {
        for channel in Channel::ALL {
            let ch = channel.index();
            let frame = command(channel);
            assert_eq!(frame[0], 6 | ((ch >> 2) & 1));
            assert_eq!(frame[1], (ch & 3) << 6);
            assert_eq!(frame[2], 0);
        }
    }

    #[test]
    fn command_for_channel_7() {
        assert_eq!(command(Channel::Ch7), [0x07, 0xC0, 0x00]);
    }

    #[test]
    fn decode_ignores_leading_bits() {
        assert_eq!(decode([0xFF, 0xF0, 0x00]), 0);
        assert_eq!(decode([0x00, 0x0F, 0xFF]), 4095);
        assert_eq!(decode([0xA5, 0xE8, 0x01]), 0x801);
    }

    #[test]
    fn decode_inverts_every_code() {
        for raw in 0..=MAX_CODE {
            let x = rand::random::<u8>();
            let response = [x, ((raw >> 8) & 0x0F) as u8, (raw & 0xFF) as u8];
            assert_eq!(decode(response), raw);
        }
    }

    #[test]
    fn voltage_end_points() {
        for vref in [5.0, 3.3, 1.0, 0.3] {
            assert_eq!(to_voltage(0, vref), 0.0);
            assert!((to_voltage(MAX_CODE, vref) - vref).abs() < 1e-12);
        }
    }

    #[test]
    fn voltage_is_monotonic() {
        let mut last = to_voltage(0, 5.0);
        for raw in 1..=MAX_CODE {
            let v = to_voltage(raw, 5.0);
            assert!(v >= last);
            last = v;
        }
    }

    #[test]
    fn it_reads_value() {
        let expectations = [SPITransaction::transfer(
            vec![0x06, 0xC0, 0x00],
            vec![0x00, 0x03, 0xFF],
        )];
        let mut adc = Mcp3208::new(MockSPI::new(&expectations), 5.0);
        assert_eq!(adc.read(Channel::Ch3).unwrap(), 1023);
        adc.release().done();
    }

    #[test]
    fn it_reads_voltage() {
        let expectations = [SPITransaction::transfer(
            vec![0x06, 0xC0, 0x00],
            vec![0x00, 0x0F, 0xFF],
        )];
        let mut adc = Mcp3208::new(MockSPI::new(&expectations), 5.0);
        let volts = adc.read_voltage(Channel::Ch3).unwrap();
        assert!((volts - 5.0).abs() < 1e-9);
        adc.release().done();
    }

    /// Clocks out the frame but only hands back its first two bytes.
    struct Truncating;

    impl Transfer<u8> for Truncating {
        type Error = ();

        fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], ()> {
            words.fill(0xFF);
            Ok(&words[..2])
        }
    }

    #[test]
    fn it_rejects_a_short_response() {
        let mut adc = Mcp3208::new(Truncating, 5.0);
        assert_eq!(adc.read(Channel::Ch0), Err(Error::ShortResponse(2)));
        assert_eq!(adc.read_all(), Err(Error::ShortResponse(2)));
    }

    #[test]
    fn it_rejects_bad_index_without_touching_the_bus() {
        let mut adc = Mcp3208::new(MockSPI::new(&[]), 5.0);
        assert!(matches!(adc.read_index(9), Err(Error::InvalidChannel(9))));
        adc.release().done();
    }
}
