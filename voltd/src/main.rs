use std::{io, path::PathBuf, process::ExitCode, thread, time::Duration};

use clap::Parser;
use crossbeam_channel::{bounded, Sender};
use error_stack::{AttachmentKind, Context, FrameKind, Report};
use log::{debug, error, info, warn};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

use voltlib::config::{
    ChipSelect, ClockMode, ReferenceVoltage, SamplerConfig, SpiConfig, TransferPolicy,
};
use voltlib::history::History;
use voltlib::sampler::SamplerState;
use voltlib::screen::{run_screen, Screen, TextScreen};
use voltlib::transport::Transport;
use voltlib::Mcp3208;

/// Samples the eight inputs of an MCP3208 over SPI and prints their voltages.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Chip enable line the ADC is jumpered to
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=1))]
    chip_select: u8,

    /// SPI clock rate
    #[arg(long, default_value_t = SpiConfig::DEFAULT_CLOCK_HZ)]
    clock_hz: u32,

    /// SPI mode (clock polarity / phase), the MCP3208 needs 0
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=3))]
    mode: u8,

    /// spidev node to open instead of the default SPI0 controller
    #[arg(long)]
    device: Option<PathBuf>,

    /// Reference voltage jumper: 5.0, 3.3, 1.0 or 0.3
    #[arg(long, default_value = "5.0")]
    vref: ReferenceVoltage,

    /// Time between sampling cycles
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..))]
    period_ms: u64,

    /// What to do when a transfer fails mid-cycle: skip or stop
    #[arg(long, default_value = "skip")]
    on_transfer_error: TransferPolicy,

    /// Stop after this many cycles
    #[arg(long)]
    cycles: Option<u64>,

    /// Cycles in the rolling average
    #[arg(long, default_value_t = History::DEFAULT_CAPACITY)]
    history: usize,

    /// off, error, warn, info, debug or trace
    #[arg(long, default_value = "info", value_parser = parse_level)]
    log_level: LevelFilter,
}

impl Args {
    fn sampler_config(&self) -> Result<SamplerConfig, String> {
        Ok(SamplerConfig {
            spi: SpiConfig {
                chip_select: ChipSelect::try_from(self.chip_select)?,
                clock_hz: self.clock_hz,
                clock_mode: ClockMode::try_from(self.mode)?,
                device: self.device.clone(),
            },
            reference: self.vref,
            period: Duration::from_millis(self.period_ms),
            on_transfer_error: self.on_transfer_error,
            max_cycles: self.cycles,
        })
    }
}

fn parse_level(s: &str) -> Result<LevelFilter, String> {
    s.parse().map_err(|_| format!("unknown log level {}", s))
}

fn initiate_logging(level: LevelFilter) {
    let _ = TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto);
}

/// Contexts and printable attachments of a report, newest frame first.
fn describe<C: Context>(report: &Report<C>) -> String {
    report
        .frames()
        .filter_map(|frame| match frame.kind() {
            FrameKind::Context(context) => Some(context.to_string()),
            FrameKind::Attachment(AttachmentKind::Printable(attachment)) => {
                Some(attachment.to_string())
            }
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(": ")
}

/// SIGINT and SIGTERM ask the sampler to stop so the SPI device is released.
fn install_signal_handler(shutdown: Sender<()>) {
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = shutdown.try_send(());
    }) {
        warn!("no signal handler, the SPI device is only released on exit: {}", e);
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    initiate_logging(args.log_level);

    let config = match args.sampler_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    debug!("{:?}", config);

    let mut screen = TextScreen::new(io::stdout(), History::new(args.history));

    let transport = match Transport::open(&config.spi) {
        Ok(transport) => transport,
        Err(report) => {
            error!("{:?}", report);
            let _ = screen.status(&describe(&report));
            return ExitCode::FAILURE;
        }
    };

    let (shutdown_tx, shutdown_rx) = bounded(1);
    install_signal_handler(shutdown_tx.clone());

    let adc = Mcp3208::new(transport, config.reference.volts());
    let (sampler, cycle_rx) = SamplerState::start(adc, &config);
    if let Err(e) = screen.status("Running") {
        warn!("failed writing status: {}", e);
    }

    let display = thread::spawn(move || {
        let shown = run_screen(cycle_rx, &mut screen);
        if shown.is_err() {
            let _ = shutdown_tx.try_send(());
        }
        shown
    });

    let outcome = sampler.run_until(&shutdown_rx);
    match display.join() {
        Ok(Ok(shown)) => debug!("screen drew {} cycles", shown),
        Ok(Err(e)) => warn!("screen stopped: {}", e),
        Err(_) => error!("screen thread panicked"),
    }

    match outcome {
        Ok(cycles) => {
            info!("sampled {} cycles", cycles);
            ExitCode::SUCCESS
        }
        Err(report) => {
            error!("{:?}", report);
            ExitCode::FAILURE
        }
    }
}
