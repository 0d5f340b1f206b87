use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{info, warn};

use looplab_analysis::{find_loop, prep, AudioData, LoopResult, PcmSamples};
use looplab_core::config::Settings;
use looplab_core::player::Player;
use looplab_core::{format_duration, logger};

mod decode;

/// Options configurable via the CLI.
#[derive(Debug, Parser)]
#[command(name = "looplab", version = env!("CARGO_PKG_VERSION"), about)]
struct Flags {
    /// Path to the config file. Defaults to the per-user Looplab.toml,
    /// which is created on first run.
    #[clap(long)]
    config: Option<PathBuf>,
    /// Log level.
    #[clap(long, default_value = "info")]
    log_level: log::LevelFilter,
    /// Subcommand to run.
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Find loop points in an audio file and print the ranked candidates.
    Scan {
        file: PathBuf,
        /// Estimated loop start, in seconds.
        #[clap(long)]
        t1: Option<f32>,
        /// Estimated loop end, in seconds.
        #[clap(long)]
        t2: Option<f32>,
    },
    /// Play a file, looping between the given frames.
    Play {
        file: PathBuf,
        /// Loop start frame.
        #[clap(long)]
        start: i64,
        /// Loop end frame.
        #[clap(long)]
        end: i64,
        /// How long to play before stopping.
        #[clap(long, default_value_t = 30.0)]
        seconds: f64,
        /// Play through once instead of looping.
        #[clap(long)]
        no_loop: bool,
    },
    /// Print the integrated loudness of an audio file.
    Loudness { file: PathBuf },
}

fn main() -> anyhow::Result<()> {
    let flags = Flags::parse();
    logger::init_logger(flags.log_level);

    let config_path = match flags.config {
        Some(path) => path,
        None => Settings::get_config_path()?,
    };
    let settings = Settings::init(config_path).context("failed to load settings")?;

    match flags.command {
        Command::Scan { file, t1, t2 } => scan(&settings, &file, t1, t2),
        Command::Play {
            file,
            start,
            end,
            seconds,
            no_loop,
        } => play(&settings, &file, start, end, seconds, no_loop),
        Command::Loudness { file } => loudness(&settings, &file),
    }
}

/// Candidate indices ordered by descending confidence.
fn ranked_order(result: &LoopResult) -> Vec<usize> {
    let mut order: Vec<usize> = (0..result.base_durations.len()).collect();
    order.sort_by(|&a, &b| {
        result.confidences[b]
            .total_cmp(&result.confidences[a])
            .then(result.base_durations[a].cmp(&result.base_durations[b]))
    });
    order
}

fn scan(settings: &Settings, file: &Path, t1: Option<f32>, t2: Option<f32>) -> anyhow::Result<()> {
    let track = decode::decode(file)?;
    let mut cfg = settings.finder.to_config();
    if let Some(t1) = t1 {
        cfg.t1_estimate = t1;
    }
    if let Some(t2) = t2 {
        cfg.t2_estimate = t2;
    }

    let audio = AudioData {
        samples: PcmSamples::Float(&track.samples),
        num_channels: track.channels,
        sample_rate: f64::from(track.sample_rate),
    };
    let started = Instant::now();
    let result = find_loop(&audio, &cfg)?;
    info!("analysis finished in {:.2?}", started.elapsed());

    if result.is_empty() {
        println!("no loop candidates found");
        return Ok(());
    }
    if result.degenerate {
        warn!("degenerate confidences; candidates are unranked");
    }

    let rate = f64::from(track.sample_rate);
    println!("{:>6} {:>12} {:>12} {:>12} {:>12}", "conf", "duration", "start", "end", "gap");
    for index in ranked_order(&result) {
        #[allow(clippy::cast_precision_loss)]
        let duration = result.base_durations[index] as f64 / rate;
        for (pair, (&start, &end)) in result.start_frames[index]
            .iter()
            .zip(&result.end_frames[index])
            .enumerate()
        {
            #[allow(clippy::cast_precision_loss)]
            let (t_start, t_end) = (start as f64 / rate, end as f64 / rate);
            let confidence = if pair == 0 {
                format!("{:>6.3}", result.confidences[index])
            } else {
                " ".repeat(6)
            };
            println!(
                "{confidence} {:>12} {:>12} {:>12} {:>12.2e}",
                format_duration(duration),
                format_duration(t_start),
                format_duration(t_end),
                result.sample_differences[index][pair],
            );
        }
    }
    Ok(())
}

fn play(
    settings: &Settings,
    file: &Path,
    start: i64,
    end: i64,
    seconds: f64,
    no_loop: bool,
) -> anyhow::Result<()> {
    let track = decode::decode(file)?;
    let mut player = Player::new(settings.player.wrap_mode);
    player.load(track.samples, track.channels, track.sample_rate);
    player.set_loop_points(start, end)?;
    player.set_loop_playback(!no_loop);
    player.set_volume_multiplier(settings.player.volume_multiplier);
    player.connect()?;
    player.play()?;
    info!(
        "playing {} for {seconds}s, looping frames {start}..{end}",
        file.display()
    );
    std::thread::sleep(Duration::from_secs_f64(seconds));
    player.stop();
    Ok(())
}

fn loudness(settings: &Settings, file: &Path) -> anyhow::Result<()> {
    let track = decode::decode(file)?;
    let audio = AudioData {
        samples: PcmSamples::Float(&track.samples),
        num_channels: track.channels,
        sample_rate: f64::from(track.sample_rate),
    };
    let cfg = settings.finder.to_config();
    match prep::integrated_lufs(&audio, cfg.framerate_reduction_limit, cfg.length_limit) {
        Ok(lufs) => println!("{}: {lufs:.2} LUFS", file.display()),
        Err(e) => {
            warn!("loudness engine failed ({e}); falling back to the dB average");
            let float = prep::to_float_stereo(&audio, usize::MAX, 1)?;
            println!("{}: {:.2} dB (average)", file.display(), prep::calc_avg_volume(&float));
        }
    }
    Ok(())
}
