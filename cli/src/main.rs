mod audio;
mod config;
mod error;

use clap::{Parser, Subcommand};
use config::ConfigFile;
use fmwave_core::source::{BufferSource, SampleSource, Silence, ToneSource};
use fmwave_core::{
    plan, FmTransmitter, MonotonicClock, ReferenceClock, RunReport, SampleClock, SystemClock,
    TransmitterConfig, VirtualClock,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fmwave")]
#[command(about = "Analog FM transmitter over fractional-N carrier synthesis")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the synthesizer plan for a carrier frequency
    Plan {
        /// Carrier frequency in Hz
        #[arg(short, long, default_value_t = fmwave_core::DEFAULT_CARRIER_HZ)]
        frequency: u32,

        /// Maximum deviation in Hz
        #[arg(short, long, default_value_t = fmwave_core::MAX_DEVIATION_HZ)]
        deviation: u32,

        /// Reference oscillator in Hz
        #[arg(short, long, default_value_t = fmwave_core::DEFAULT_REFERENCE_HZ)]
        reference: u32,

        /// Use the early-revision register layout
        #[arg(long)]
        low_revision: bool,
    },

    /// Drive a simulated transmitter with audio and report timing
    Transmit {
        /// JSON configuration file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Modulation backend: direct, retuned or pulse-train
        #[arg(short, long)]
        backend: Option<String>,

        /// Carrier frequency in Hz
        #[arg(short, long)]
        frequency: Option<u32>,

        /// Maximum deviation in Hz
        #[arg(short, long)]
        deviation: Option<u32>,

        /// Audio sample rate in Hz
        #[arg(short, long)]
        sample_rate: Option<u32>,

        /// Audio file to transmit
        #[arg(long, value_name = "FILE", conflicts_with = "tone")]
        wav: Option<PathBuf>,

        /// Test tone frequency in Hz (silence when neither this nor --wav is given)
        #[arg(long)]
        tone: Option<f64>,

        /// Seconds to transmit (default: whole WAV file, or 1 s)
        #[arg(long)]
        seconds: Option<f64>,

        /// Run against a virtual clock instead of real time
        #[arg(long)]
        virtual_clock: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Plan {
            frequency,
            deviation,
            reference,
            low_revision,
        } => {
            let reference = ReferenceClock::new(reference).with_low_revision(low_revision);
            plan_command(frequency, deviation, reference)?
        }
        Commands::Transmit {
            config,
            backend,
            frequency,
            deviation,
            sample_rate,
            wav,
            tone,
            seconds,
            virtual_clock,
        } => {
            let flags = ConfigFile {
                frequency_hz: frequency,
                deviation_hz: deviation,
                sample_rate,
                backend,
                ..ConfigFile::default()
            };
            let file = match &config {
                Some(path) => ConfigFile::load(path)?,
                None => ConfigFile::default(),
            };
            let settings = flags.or(file);
            let input = AudioInput { wav, tone, seconds };
            transmit_command(&settings, &input, virtual_clock)?
        }
    }

    Ok(())
}

fn plan_command(
    frequency: u32,
    deviation: u32,
    reference: ReferenceClock,
) -> Result<(), Box<dyn std::error::Error>> {
    let plan = plan(frequency, deviation, reference)?;
    let code = plan.code;

    println!("Carrier:          {} Hz", plan.target_hz);
    println!(
        "Reference:        {} Hz{}",
        reference.frequency_hz,
        if reference.low_revision { " (low revision)" } else { "" }
    );
    println!("Output divider:   {} (/{})", code.output_divider, code.post_divisor());
    println!("Integer part:     {}", code.integer_part);
    println!("Fraction:         0x{:04X}", code.fractional_part);
    println!(
        "Registers:        sdm0=0x{:02X} sdm1=0x{:02X} sdm2={} o_div={}",
        code.sdm0(),
        code.sdm1(),
        code.integer_part,
        code.output_divider
    );
    println!(
        "Deviation limit:  {} LSB ({:.1} Hz/LSB, {:.0} Hz)",
        plan.deviation_limit.units(),
        plan.per_lsb_hz(),
        plan.deviation_hz()
    );
    println!("VCO:              {:.0} Hz", plan.vco_hz());
    println!("Actual output:    {:.3} Hz", plan.output_hz());
    Ok(())
}

struct AudioInput {
    wav: Option<PathBuf>,
    tone: Option<f64>,
    seconds: Option<f64>,
}

impl AudioInput {
    fn open(
        &self,
        sample_rate: u32,
        volume_percent: u8,
    ) -> Result<Box<dyn SampleSource + Send>, Box<dyn std::error::Error>> {
        let limit = self
            .seconds
            .map(|s| (s.max(0.0) * sample_rate as f64).round() as usize);

        if let Some(path) = &self.wav {
            let samples = audio::load_wav(path, sample_rate, volume_percent)?;
            info!("Transmitting {}", path.display());
            let buffer = BufferSource::new(samples);
            let source: Box<dyn SampleSource + Send> = match limit {
                Some(count) => Box::new(buffer.looping(true).take_samples(count)),
                None => Box::new(buffer),
            };
            return Ok(source);
        }

        let count = limit.unwrap_or(sample_rate as usize);
        let source: Box<dyn SampleSource + Send> = match self.tone {
            Some(hz) => {
                info!("Transmitting {} Hz test tone", hz);
                let amplitude = volume_percent as f64 / 100.0;
                Box::new(
                    ToneSource::new(hz, sample_rate)
                        .with_amplitude(amplitude)
                        .take_samples(count),
                )
            }
            None => {
                info!("Transmitting silence");
                Box::new(Silence.take_samples(count))
            }
        };
        Ok(source)
    }
}

fn transmit_command(
    settings: &ConfigFile,
    input: &AudioInput,
    virtual_clock: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = settings.resolve()?;
    let mut source = input.open(config.sample_rate, settings.volume_percent())?;
    let source = move || source.next_sample();

    let mut tx = FmTransmitter::simulated(config);
    let plan = tx.init()?;
    tx.enable()?;
    println!(
        "Carrier {} Hz via {} backend ({:.3} Hz actual, {} LSB deviation)",
        plan.target_hz,
        config.backend,
        plan.output_hz(),
        plan.deviation_limit.units()
    );

    let (mut tx, report) = if virtual_clock {
        run_clock(tx, source, &config, VirtualClock::new())?
    } else {
        run_clock(tx, source, &config, SystemClock::new())?
    };
    tx.shutdown()?;

    print_report(&report);
    if report.timing_violations > 0 || report.missed_deadlines > 0 {
        warn!(
            "{} backend could not keep up at {} Hz",
            config.backend, config.sample_rate
        );
    }
    Ok(())
}

fn run_clock<C, S>(
    tx: FmTransmitter,
    source: S,
    config: &TransmitterConfig,
    clock: C,
) -> Result<(FmTransmitter, RunReport), Box<dyn std::error::Error>>
where
    C: MonotonicClock + 'static,
    S: SampleSource + Send + 'static,
{
    let sampler = SampleClock::new(config.sample_rate, clock)?;
    let task = sampler.spawn(tx, source)?;
    Ok(task.join()?)
}

fn print_report(report: &RunReport) {
    println!("Samples:            {}", report.samples);
    println!("Apply errors:       {}", report.apply_errors);
    println!("Timing violations:  {}", report.timing_violations);
    println!("Missed deadlines:   {}", report.missed_deadlines);
    println!("Max lateness:       {:?}", report.max_lateness);
    println!("Mean lateness:      {:?}", report.mean_lateness);
    println!("Max apply time:     {:?}", report.max_apply_time);
}
