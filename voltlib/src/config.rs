//! Settings that are fixed on the board (jumpers) or picked at startup.
//! Nothing in here changes once the bus is open.

use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

/// Chip enable line the ADC sits on (jumper CE0 / CE1).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ChipSelect {
    #[default]
    Ce0,
    Ce1,
}

impl ChipSelect {
    pub fn index(self) -> u8 {
        match self {
            ChipSelect::Ce0 => 0,
            ChipSelect::Ce1 => 1,
        }
    }
}

impl TryFrom<u8> for ChipSelect {
    type Error = String;

    fn try_from(line: u8) -> Result<Self, Self::Error> {
        match line {
            0 => Ok(ChipSelect::Ce0),
            1 => Ok(ChipSelect::Ce1),
            other => Err(format!("chip select must be 0 or 1, got {}", other)),
        }
    }
}

/// SPI clock polarity / phase. The MCP3208 wants `Mode0`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    #[default]
    Mode0,
    Mode1,
    Mode2,
    Mode3,
}

impl TryFrom<u8> for ClockMode {
    type Error = String;

    fn try_from(mode: u8) -> Result<Self, Self::Error> {
        match mode {
            0 => Ok(ClockMode::Mode0),
            1 => Ok(ClockMode::Mode1),
            2 => Ok(ClockMode::Mode2),
            3 => Ok(ClockMode::Mode3),
            other => Err(format!("spi mode must be 0..=3, got {}", other)),
        }
    }
}

/// Full scale voltage, selected by jumper on the board.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub enum ReferenceVoltage {
    #[default]
    V5_0,
    V3_3,
    V1_0,
    V0_3,
}

impl ReferenceVoltage {
    pub fn volts(self) -> f64 {
        match self {
            ReferenceVoltage::V5_0 => 5.0,
            ReferenceVoltage::V3_3 => 3.3,
            ReferenceVoltage::V1_0 => 1.0,
            ReferenceVoltage::V0_3 => 0.3,
        }
    }
}

impl FromStr for ReferenceVoltage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "5" | "5.0" => Ok(ReferenceVoltage::V5_0),
            "3.3" => Ok(ReferenceVoltage::V3_3),
            "1" | "1.0" => Ok(ReferenceVoltage::V1_0),
            "0.3" => Ok(ReferenceVoltage::V0_3),
            other => Err(format!(
                "reference voltage must be one of 5.0, 3.3, 1.0, 0.3, got {}",
                other
            )),
        }
    }
}

impl fmt::Display for ReferenceVoltage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:.1}V", self.volts())
    }
}

/// What the sampler does when an exchange fails in the middle of a cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TransferPolicy {
    /// Drop the cycle and try again on the next tick.
    #[default]
    Skip,
    /// Stop sampling and report the failure.
    Stop,
}

impl FromStr for TransferPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(TransferPolicy::Skip),
            "stop" => Ok(TransferPolicy::Stop),
            other => Err(format!("transfer error policy must be skip or stop, got {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpiConfig {
    pub chip_select: ChipSelect,
    pub clock_hz: u32,
    pub clock_mode: ClockMode,
    /// spidev node to use instead of the default controller
    pub device: Option<PathBuf>,
}

impl SpiConfig {
    pub const DEFAULT_CLOCK_HZ: u32 = 500_000;
}

impl Default for SpiConfig {
    fn default() -> Self {
        SpiConfig {
            chip_select: ChipSelect::default(),
            clock_hz: Self::DEFAULT_CLOCK_HZ,
            clock_mode: ClockMode::default(),
            device: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerConfig {
    pub spi: SpiConfig,
    pub reference: ReferenceVoltage,
    pub period: Duration,
    pub on_transfer_error: TransferPolicy,
    /// stop on our own after this many completed cycles
    pub max_cycles: Option<u64>,
}

impl SamplerConfig {
    pub const DEFAULT_PERIOD: Duration = Duration::from_millis(100);
}

impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfig {
            spi: SpiConfig::default(),
            reference: ReferenceVoltage::default(),
            period: Self::DEFAULT_PERIOD,
            on_transfer_error: TransferPolicy::default(),
            max_cycles: None,
        }
    }
}
