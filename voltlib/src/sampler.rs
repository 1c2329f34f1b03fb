use std::{
    fmt::{self, Debug, Display, Formatter},
    thread::{self, JoinHandle},
};

use crossbeam_channel::{bounded, select, tick, Receiver, Sender, TryRecvError, TrySendError};
use embedded_hal::blocking::spi::Transfer;
use error_stack::{Context, Report, Result};
use log::{debug, error, info, trace, warn};
use mcp3208_eh::{Channel, Mcp3208, CHANNEL_COUNT};

use crate::config::{SamplerConfig, TransferPolicy};
use crate::transport::SpiHandle;

/// One converted input.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ChannelSample {
    pub channel: Channel,
    pub raw: u16,
    pub voltage: f64,
}

/// Everything produced by one pass over the eight channels.
#[derive(Debug, Clone, PartialEq)]
pub struct Cycle {
    /// number of cycles completed before this one
    pub sequence: u64,
    pub samples: [ChannelSample; CHANNEL_COUNT],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerError {
    Transfer,
    Worker,
}

impl Context for SamplerError {}

impl Display for SamplerError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            SamplerError::Transfer => write!(f, "sampling stopped after a failed SPI transfer"),
            SamplerError::Worker => write!(f, "sampler thread died"),
        }
    }
}

/// Reads channels 0 to 7 in order, one exchange each, on the same bus.
/// The first failing exchange aborts the whole pass.
pub fn sample_all_channels<SPI, E>(
    adc: &mut Mcp3208<SPI>,
) -> std::result::Result<[ChannelSample; CHANNEL_COUNT], mcp3208_eh::Error<E>>
where
    SPI: Transfer<u8, Error = E>,
{
    let vref = adc.reference_voltage();
    let mut samples = [ChannelSample::default(); CHANNEL_COUNT];
    for (slot, channel) in samples.iter_mut().zip(Channel::ALL) {
        let raw = adc.read(channel)?;
        *slot = ChannelSample {
            channel,
            raw,
            voltage: mcp3208_eh::to_voltage(raw, vref),
        };
    }
    Ok(samples)
}

/// Single slot hand-off to the display. A cycle the display has not picked up
/// yet is replaced by the newer one, so a stalled display holds at most one.
struct Mailbox {
    tx: Sender<Cycle>,
    stale: Receiver<Cycle>,
}

impl Mailbox {
    fn new() -> (Self, Receiver<Cycle>) {
        let (tx, rx) = bounded(1);
        let stale = rx.clone();
        (Mailbox { tx, stale }, rx)
    }

    fn post(&self, cycle: Cycle) {
        if let Err(TrySendError::Full(cycle)) = self.tx.try_send(cycle) {
            if let Ok(old) = self.stale.try_recv() {
                trace!("display missed cycle {}", old.sequence);
            }
            // only this thread sends, so the slot is empty now
            let _ = self.tx.try_send(cycle);
        }
    }
}

type WorkerOutcome<SPI> = (Mcp3208<SPI>, Result<u64, SamplerError>);

/// The running sampler: a worker thread that owns the ADC while it runs.
///
/// The worker samples once right away and then once per tick. A cycle always
/// finishes before the next tick is looked at, and ticks that pile up during
/// a slow cycle collapse into one, so two cycles never touch the bus at the
/// same time. The bus comes back from the worker when it is joined and is
/// closed exactly once, after which nothing can exchange on it.
pub struct SamplerState<SPI>
where
    SPI: SpiHandle + Send + 'static,
{
    stop_tx: Option<Sender<()>>,
    /// disconnects when the worker returns
    finished: Receiver<()>,
    worker: Option<JoinHandle<WorkerOutcome<SPI>>>,
}

impl<SPI, E> SamplerState<SPI>
where
    SPI: SpiHandle + Transfer<u8, Error = E> + Send + 'static,
    E: Debug,
{
    /// Spawns the worker. The returned receiver always yields the newest
    /// completed cycle and disconnects once the worker is gone.
    pub fn start(adc: Mcp3208<SPI>, config: &SamplerConfig) -> (Self, Receiver<Cycle>) {
        let (stop_tx, stop_rx) = bounded(1);
        let (done_tx, finished) = bounded::<()>(0);
        let (mailbox, cycles) = Mailbox::new();
        let config = config.clone();
        info!(
            "starting sampler: period {:?}, vref {}, on transfer error {:?}",
            config.period, config.reference, config.on_transfer_error
        );
        let worker = thread::spawn(move || {
            let _done = done_tx;
            let mut adc = adc;
            let outcome = run_cycles(&mut adc, &config, &stop_rx, &mailbox);
            (adc, outcome)
        });
        let state = Self {
            stop_tx: Some(stop_tx),
            finished,
            worker: Some(worker),
        };
        (state, cycles)
    }
}

impl<SPI> SamplerState<SPI>
where
    SPI: SpiHandle + Send + 'static,
{
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().map_or(false, |worker| !worker.is_finished())
    }

    /// Stops the worker, lets an in-flight cycle finish, then closes the bus.
    /// Returns the number of completed cycles.
    pub fn stop(mut self) -> Result<u64, SamplerError> {
        self.shutdown()
    }

    /// Waits for the worker to end on its own, then closes the bus.
    pub fn wait(mut self) -> Result<u64, SamplerError> {
        self.join()
    }

    /// Waits until either the worker ends on its own or a message arrives on
    /// `shutdown`, whichever comes first, and closes the bus either way.
    /// A disconnected `shutdown` is never taken as a request.
    pub fn run_until(mut self, shutdown: &Receiver<()>) -> Result<u64, SamplerError> {
        let requested = select! {
            recv(shutdown) -> signal => signal.is_ok(),
            recv(self.finished) -> _ => false,
        };
        if requested {
            info!("shutdown requested");
            self.shutdown()
        } else {
            self.join()
        }
    }

    fn shutdown(&mut self) -> Result<u64, SamplerError> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.try_send(());
        }
        self.join()
    }

    fn join(&mut self) -> Result<u64, SamplerError> {
        let worker = match self.worker.take() {
            Some(worker) => worker,
            None => return Ok(0),
        };
        match worker.join() {
            Ok((adc, outcome)) => {
                let mut spi = adc.release();
                spi.close();
                info!("sampler stopped");
                outcome
            }
            Err(_) => {
                error!("sampler thread panicked");
                Err(Report::new(SamplerError::Worker))
            }
        }
    }
}

impl<SPI> Drop for SamplerState<SPI>
where
    SPI: SpiHandle + Send + 'static,
{
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

fn stop_requested(stop_rx: &Receiver<()>) -> bool {
    !matches!(stop_rx.try_recv(), Err(TryRecvError::Empty))
}

fn run_cycles<SPI, E>(
    adc: &mut Mcp3208<SPI>,
    config: &SamplerConfig,
    stop_rx: &Receiver<()>,
    mailbox: &Mailbox,
) -> Result<u64, SamplerError>
where
    SPI: Transfer<u8, Error = E>,
    E: Debug,
{
    let ticker = tick(config.period);
    let mut completed = 0u64;

    loop {
        if config.max_cycles.map_or(false, |max| completed >= max) {
            debug!("cycle limit of {} reached", completed);
            return Ok(completed);
        }
        if stop_requested(stop_rx) {
            debug!("stop requested after {} cycles", completed);
            return Ok(completed);
        }

        match sample_all_channels(adc) {
            Ok(samples) => {
                trace!("cycle {}: {:?}", completed, samples.map(|s| s.raw));
                mailbox.post(Cycle { sequence: completed, samples });
                completed += 1;
                if config.max_cycles == Some(completed) {
                    // limit reached, no tick to wait for
                    continue;
                }
            }
            Err(e) => match config.on_transfer_error {
                TransferPolicy::Skip => {
                    warn!("skipping cycle {}: {}", completed, e);
                }
                TransferPolicy::Stop => {
                    error!("stopping sampler in cycle {}: {}", completed, e);
                    return Err(Report::new(SamplerError::Transfer)
                        .attach_printable(format!("{}", e)));
                }
            },
        }

        select! {
            recv(stop_rx) -> _ => {
                debug!("stop requested after {} cycles", completed);
                return Ok(completed);
            },
            recv(ticker) -> _ => {},
        }
    }
}
