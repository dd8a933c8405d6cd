mod render;
mod repl;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, ensure};
use clap::{Args, Parser, Subcommand};
use tonebank_backend::{BufferScheduler, MemoryHost};
use tonebank_core::{StreamConfig, Wave, WaveSpec, WaveTable};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tonebank", version, about = "Additive tone source with a live control surface")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct StreamArgs {
    /// JSON stream config; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    period_frames: Option<usize>,

    #[arg(long)]
    buffer_frames: Option<usize>,

    /// Oscillator to start with, as `amp,phase,freq` or just `freq` (repeatable)
    #[arg(long = "wave", value_parser = parse_wave_spec)]
    waves: Vec<WaveSpec>,
}

impl StreamArgs {
    fn resolve(&self) -> anyhow::Result<StreamConfig> {
        let mut config = match &self.config {
            Some(path) => StreamConfig::load(path)?,
            None => StreamConfig::default(),
        };
        if let Some(frames) = self.period_frames {
            config = config.with_period_frames(frames);
        }
        if let Some(frames) = self.buffer_frames {
            config = config.with_buffer_frames(frames);
        }
        for &wave in &self.waves {
            config = config.with_wave(wave);
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Start the stream and read control commands from stdin
    Run {
        #[command(flatten)]
        stream: StreamArgs,

        /// Play through the default audio output
        #[cfg(feature = "playback")]
        #[arg(long)]
        play: bool,
    },
    /// Render a number of periods into a WAV file without real time
    Render {
        #[command(flatten)]
        stream: StreamArgs,

        #[arg(long, default_value_t = 200)]
        periods: usize,

        #[arg(short, long)]
        out: PathBuf,
    },
    /// Check the descriptor packing and print the decoded fields
    Check {
        #[arg(default_value_t = 87)]
        amplitude: u32,
        #[arg(default_value_t = 319)]
        phase: u32,
        #[arg(default_value_t = 41980)]
        frequency: u32,
    },
}

fn parse_wave_spec(text: &str) -> Result<WaveSpec, String> {
    let fields = text
        .split(',')
        .map(|field| field.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("bad wave `{text}`: {e}"))?;

    match fields.as_slice() {
        &[frequency] => Ok(WaveSpec {
            amplitude: 100,
            phase: 0,
            frequency,
        }),
        &[amplitude, phase, frequency] => Ok(WaveSpec {
            amplitude,
            phase,
            frequency,
        }),
        _ => Err(format!("bad wave `{text}`: expected `amp,phase,freq` or `freq`")),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    match Cli::parse().command {
        Command::Run {
            stream,
            #[cfg(feature = "playback")]
            play,
        } => {
            let config = stream.resolve()?;
            #[cfg(not(feature = "playback"))]
            let play = false;
            run(&config, play)
        }
        Command::Render {
            stream,
            periods,
            out,
        } => {
            let config = stream.resolve()?;
            let summary = render::render_to_wav(&config, periods, &out)?;
            info!(
                frames = summary.frames,
                skipped = summary.skipped_periods,
                path = %out.display(),
                "render finished"
            );
            Ok(())
        }
        Command::Check {
            amplitude,
            phase,
            frequency,
        } => check(amplitude, phase, frequency),
    }
}

fn run(config: &StreamConfig, play: bool) -> anyhow::Result<()> {
    info!(%config, "starting stream");

    let table = Arc::new(WaveTable::with_waves(&config.initial_waves())?);
    let host = Arc::new(MemoryHost::from_config(config));
    let mut scheduler = BufferScheduler::new(host.clone(), table.clone());

    #[cfg(feature = "playback")]
    let (_stream, played) = if play {
        use tonebank_backend::rt_processing::callback::{DmaReader, device};
        use tonebank_backend::{StreamHost, StreamRuntime};

        let reader = DmaReader::new(host.dma_area().clone(), &StreamRuntime::from(config));
        let played = reader.frames_read_handle();
        let stream = device::play_default_output(reader, host.runtime().sample_rate)?;
        (Some(stream), Some(played))
    } else {
        (None, None)
    };
    #[cfg(not(feature = "playback"))]
    let _ = play;

    scheduler.start()?;

    let stdin = io::stdin();
    let result = repl::run(&table, stdin.lock(), io::stdout(), || scheduler.fault());

    let stopped = scheduler.stop();
    #[cfg(feature = "playback")]
    if let Some(played) = played {
        info!(
            frames = played.load(std::sync::atomic::Ordering::Relaxed),
            "playback closed"
        );
    }
    let stats = scheduler.tick_stats();
    info!(
        ticks = stats.tick_count,
        frames = stats.frames_rendered,
        skipped = stats.skipped_fills,
        late = stats.late_ticks,
        load_percent = stats.avg_load_percent,
        periods = host.periods_elapsed(),
        "stream closed"
    );

    result?;
    stopped.context("stream halted")?;
    Ok(())
}

fn check(amplitude: u32, phase: u32, frequency: u32) -> anyhow::Result<()> {
    let wave = Wave::encode(amplitude, phase, frequency);
    let (a, p, f) = wave.decode();
    println!("{:#010x} {}", wave.bits(), wave);

    ensure!(
        (u32::from(a), u32::from(p), u32::from(f)) == (amplitude, phase, frequency),
        "fields do not survive packing (amp 0..128, phase 0..512, freq 0..65536)"
    );

    let changed = wave.set_amplitude(49).set_phase(187).set_frequency(21953);
    ensure!(changed.decode() == (49, 187, 21953), "field setters disturbed each other");

    if !wave.is_in_range() {
        println!("note: outside amp 0..=100, phase 0..=360, freq 0..=48000");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wave_spec() {
        assert_eq!(
            parse_wave_spec("480").unwrap(),
            WaveSpec {
                amplitude: 100,
                phase: 0,
                frequency: 480
            }
        );
        assert_eq!(
            parse_wave_spec("50, 90, 1000").unwrap(),
            WaveSpec {
                amplitude: 50,
                phase: 90,
                frequency: 1000
            }
        );
        assert!(parse_wave_spec("1,2").is_err());
        assert!(parse_wave_spec("abc").is_err());
    }

    #[test]
    fn test_stream_args_override_config() {
        let args = StreamArgs {
            config: None,
            period_frames: Some(480),
            buffer_frames: Some(480 * 4),
            waves: vec![parse_wave_spec("480").unwrap()],
        };
        let config = args.resolve().unwrap();
        assert_eq!(config.period_frames, 480);
        assert_eq!(config.initial_waves(), vec![Wave::encode(100, 0, 480)]);
    }

    #[test]
    fn test_stream_args_are_validated() {
        let args = StreamArgs {
            config: None,
            period_frames: Some(1),
            buffer_frames: None,
            waves: Vec::new(),
        };
        assert!(args.resolve().is_err());
    }

    #[test]
    fn test_check() {
        check(87, 319, 41980).unwrap();
        assert!(check(200, 0, 0).is_err());
    }

    #[test]
    fn test_cli_parses() {
        Cli::try_parse_from(["tonebank", "render", "--periods", "4", "-o", "x.wav", "--wave", "480"])
            .unwrap();
        Cli::try_parse_from(["tonebank", "check"]).unwrap();
    }
}
