use std::fmt;

/// number of single-ended inputs on the chip
pub const CHANNEL_COUNT: usize = 8;

/// One of the eight single-ended inputs.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Channel {
    #[default]
    Ch0 = 0,
    Ch1,
    Ch2,
    Ch3,
    Ch4,
    Ch5,
    Ch6,
    Ch7,
}

impl Channel {
    /// All channels in ascending order, the order a full scan runs in.
    pub const ALL: [Channel; CHANNEL_COUNT] = [
        Channel::Ch0,
        Channel::Ch1,
        Channel::Ch2,
        Channel::Ch3,
        Channel::Ch4,
        Channel::Ch5,
        Channel::Ch6,
        Channel::Ch7,
    ];

    pub fn index(self) -> u8 {
        self as u8
    }
}

/// Returned when an index outside `0..8` is turned into a [`Channel`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InvalidChannel(pub u8);

impl fmt::Display for InvalidChannel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid channel number ({})", self.0)
    }
}

impl std::error::Error for InvalidChannel {}

impl TryFrom<u8> for Channel {
    type Error = InvalidChannel;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        Channel::ALL
            .get(index as usize)
            .copied()
            .ok_or(InvalidChannel(index))
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}
