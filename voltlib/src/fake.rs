// A stand-in for an MCP3208 on the bus. It answers each command with the
// code configured for the addressed channel and records what it was asked.

use std::sync::{Arc, Mutex};

use embedded_hal::blocking::spi::Transfer;
use error_stack::{Report, Result};

use crate::transport::{SpiHandle, TransportError};

#[derive(Debug, Default)]
pub struct BusLog {
    pub frames: Vec<[u8; 3]>,
    pub closes: usize,
    pub exchanges_after_close: usize,
}

pub struct FakeAdc {
    codes: [u16; 8],
    /// exchange numbers (0-based) that fail
    failing: Vec<usize>,
    exchanges: usize,
    closed: bool,
    log: Arc<Mutex<BusLog>>,
}

impl FakeAdc {
    pub fn new(codes: [u16; 8]) -> (Self, Arc<Mutex<BusLog>>) {
        let log = Arc::new(Mutex::new(BusLog::default()));
        let fake = FakeAdc {
            codes,
            failing: vec![],
            exchanges: 0,
            closed: false,
            log: Arc::clone(&log),
        };
        (fake, log)
    }

    pub fn failing_at(mut self, exchanges: &[usize]) -> Self {
        self.failing = exchanges.to_vec();
        self
    }
}

impl Transfer<u8> for FakeAdc {
    type Error = Report<TransportError>;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], TransportError> {
        let mut log = self.log.lock().unwrap();
        if self.closed {
            log.exchanges_after_close += 1;
            return Err(Report::new(TransportError::Closed));
        }
        let n = self.exchanges;
        self.exchanges += 1;
        log.frames.push([words[0], words[1], words[2]]);
        if self.failing.contains(&n) {
            return Err(Report::new(TransportError::Transfer)
                .attach_printable(format!("injected failure {}", n)));
        }
        let channel = ((words[0] & 0b1) << 2) | (words[1] >> 6);
        let code = self.codes[channel as usize];
        words[0] = 0xFF;
        words[1] = 0xE0 | (code >> 8) as u8;
        words[2] = (code & 0xFF) as u8;
        Ok(words)
    }
}

impl SpiHandle for FakeAdc {
    fn close(&mut self) {
        self.closed = true;
        self.log.lock().unwrap().closes += 1;
    }
}
