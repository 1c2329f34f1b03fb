use std::{
    collections::VecDeque,
    fmt::{self, Display, Formatter},
    time::Instant,
};

use mcp3208_eh::{Channel, CHANNEL_COUNT};
use statrs::statistics::Statistics;

use crate::sampler::Cycle;

/// Rolling window of recent voltages per channel.
#[derive(Debug)]
pub struct History {
    channels: Vec<VecDeque<f64>>,
    capacity: usize,
    pub last_update: Option<Instant>,
}

impl Display for History {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        for channel in Channel::ALL {
            if channel.index() > 0 {
                write!(f, ", ")?;
            }
            match self.mean(channel) {
                Some(mean) => write!(f, "Ch{}: {:.4}V", channel, mean)?,
                None => write!(f, "Ch{}: -", channel)?,
            }
        }
        Ok(())
    }
}

impl History {
    pub const DEFAULT_CAPACITY: usize = 10;

    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        History {
            channels: vec![VecDeque::with_capacity(capacity); CHANNEL_COUNT],
            capacity,
            last_update: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(&mut self, cycle: &Cycle) {
        for sample in cycle.samples.iter() {
            let window = &mut self.channels[sample.channel.index() as usize];
            window.push_back(sample.voltage);
            if window.len() > self.capacity {
                window.pop_front();
            }
        }
        self.last_update = Some(Instant::now());
    }

    pub fn len(&self, channel: Channel) -> usize {
        self.channels[channel.index() as usize].len()
    }

    /// Mean over the window, `None` until something was recorded.
    pub fn mean(&self, channel: Channel) -> Option<f64> {
        let window = &self.channels[channel.index() as usize];
        if window.is_empty() {
            None
        } else {
            Some(window.iter().mean())
        }
    }
}

impl Default for History {
    fn default() -> Self {
        History::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::ChannelSample;

    fn cycle(sequence: u64, voltage: f64) -> Cycle {
        let mut samples = [ChannelSample::default(); CHANNEL_COUNT];
        for (slot, channel) in samples.iter_mut().zip(Channel::ALL) {
            *slot = ChannelSample { channel, raw: 0, voltage: voltage + channel.index() as f64 };
        }
        Cycle { sequence, samples }
    }

    #[test]
    fn empty_history_has_no_mean() {
        let history = History::default();
        assert_eq!(history.mean(Channel::Ch0), None);
        assert!(history.last_update.is_none());
        assert_eq!(history.to_string().matches('-').count(), 8);
    }

    #[test]
    fn mean_over_window() {
        let mut history = History::new(3);
        for (i, v) in [1.0, 2.0, 3.0].iter().enumerate() {
            history.record(&cycle(i as u64, *v));
        }
        assert!((history.mean(Channel::Ch0).unwrap() - 2.0).abs() < 1e-12);
        assert!((history.mean(Channel::Ch7).unwrap() - 9.0).abs() < 1e-12);
        assert!(history.last_update.is_some());
    }

    #[test]
    fn oldest_readings_fall_out() {
        let mut history = History::new(2);
        for (i, v) in [10.0, 1.0, 3.0].iter().enumerate() {
            history.record(&cycle(i as u64, *v));
        }
        assert_eq!(history.len(Channel::Ch4), 2);
        assert!((history.mean(Channel::Ch0).unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn zero_capacity_keeps_one() {
        let mut history = History::new(0);
        history.record(&cycle(0, 1.0));
        history.record(&cycle(1, 4.0));
        assert_eq!(history.capacity(), 1);
        assert_eq!(history.mean(Channel::Ch0), Some(4.0));
    }
}
