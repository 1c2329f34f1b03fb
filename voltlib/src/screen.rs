use std::io::{self, Write};

use crossbeam_channel::Receiver;
use log::{debug, trace};

use crate::history::History;
use crate::sampler::Cycle;

/// Where finished cycles end up. Rendering is entirely the screen's business;
/// the sampler only hands cycles over.
pub trait Screen {
    fn status(&mut self, message: &str) -> io::Result<()>;
    fn show(&mut self, cycle: &Cycle) -> io::Result<()>;
}

/// Plain text rendering, one line per channel:
///
/// ```text
/// Volt0=2.5006V ADC0=2048 Avg0=2.4998V
/// ```
pub struct TextScreen<W: Write> {
    out: W,
    history: History,
}

impl<W: Write> TextScreen<W> {
    pub fn new(out: W, history: History) -> Self {
        TextScreen { out, history }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Screen for TextScreen<W> {
    fn status(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.out, "Status: {}", message)?;
        self.out.flush()
    }

    fn show(&mut self, cycle: &Cycle) -> io::Result<()> {
        self.history.record(cycle);
        trace!("rolling means: {}", self.history);
        for sample in cycle.samples.iter() {
            let n = sample.channel;
            let avg = self.history.mean(n).unwrap_or(sample.voltage);
            writeln!(
                self.out,
                "Volt{n}={:.4}V ADC{n}={} Avg{n}={:.4}V",
                sample.voltage,
                sample.raw,
                avg,
                n = n
            )?;
        }
        writeln!(self.out)?;
        self.out.flush()
    }
}

/// Blocks for the next cycle and skips over any that queued up behind it,
/// so a slow screen always shows the newest data. `None` once the sampler
/// side is gone.
pub fn latest(rx: &Receiver<Cycle>) -> Option<Cycle> {
    let first = rx.recv().ok()?;
    let newest = rx.try_iter().last();
    if let Some(ref cycle) = newest {
        trace!("screen skipped to cycle {} from {}", cycle.sequence, first.sequence);
    }
    Some(newest.unwrap_or(first))
}

/// Renders cycles until the sampler drops its end of the channel.
/// Returns how many cycles were drawn.
pub fn run_screen<S: Screen>(rx: Receiver<Cycle>, screen: &mut S) -> io::Result<u64> {
    let mut shown = 0;
    while let Some(cycle) = latest(&rx) {
        screen.show(&cycle)?;
        shown += 1;
    }
    debug!("sampler gone, screen drew {} cycles", shown);
    Ok(shown)
}
