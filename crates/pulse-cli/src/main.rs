use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use plotters::prelude::*;
use pulse_lib::{
    detectors::ppg::{self, PpgPipelineConfig},
    io::{csv as csv_io, text as text_io},
    metrics::quality::{self, Advice, Quality, QualityThresholds, QualityVerdict},
    plot::{figure_from_series, Figure, Series},
    session::{FeedOutcome, LiveSink, LiveUpdate, Session, SessionConfig, SessionError, MIN_SAMPLES},
    signal::normalize,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde_json::json;
use std::{
    f64::consts::PI,
    fs::File,
    io::{self, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

const INSTRUCTIONS: &str = "\
HEART RATE MEASUREMENT
1. Turn ON the flash and cover the whole lens with your fingertip
2. Apply light to moderate pressure, no light leaking around the finger
3. Keep the hand completely still and breathe normally
";

#[derive(Parser)]
#[command(
    name = "pulse",
    version,
    about = "Fingertip PPG heart-rate measurement tools"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded brightness series through a measurement session
    Measure {
        /// Newline-delimited brightness samples; stdin when omitted
        #[arg(long)]
        input: Option<PathBuf>,
        /// Timestamped CSV export instead of a plain series
        #[arg(long, conflicts_with = "input")]
        input_csv: Option<PathBuf>,
        #[arg(long, default_value = "green")]
        csv_column: String,
        #[arg(long, default_value_t = 30.0)]
        fs: f64,
        #[arg(long, default_value_t = 30.0)]
        duration: f64,
        #[arg(long, default_value_t = 15)]
        min_good_peaks: usize,
        #[arg(long, default_value_t = 5.0)]
        min_signal_std: f64,
        /// Live-monitor cadence in samples (default: 2x the sample rate)
        #[arg(long)]
        cadence: Option<usize>,
        /// Cancel the session after this many seconds of replayed data
        #[arg(long)]
        cancel_after: Option<f64>,
        /// Append each live update as a JSON line
        #[arg(long)]
        live_out: Option<PathBuf>,
        /// Render the final raw + filtered traces to a PNG
        #[arg(long)]
        plot: Option<PathBuf>,
        /// Suppress the instructions and the human-readable summary
        #[arg(long)]
        quiet: bool,
    },
    /// One-shot final pass over an entire recording
    Process {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long, default_value_t = 30.0)]
        fs: f64,
        #[arg(long, default_value_t = 15)]
        min_good_peaks: usize,
        #[arg(long, default_value_t = 5.0)]
        min_signal_std: f64,
    },
    /// Generate a synthetic PPG recording
    Simulate {
        #[arg(long, default_value_t = 72.0)]
        bpm: f64,
        #[arg(long, default_value_t = 30.0)]
        fs: f64,
        #[arg(long, default_value_t = 30.0)]
        duration: f64,
        #[arg(long, default_value_t = 25.0)]
        amplitude: f64,
        #[arg(long, default_value_t = 120.0)]
        baseline: f64,
        #[arg(long, default_value_t = 8.0)]
        noise_std: f64,
        #[arg(long, default_value_t = 7)]
        seed: u64,
        /// Output file; stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Render a recorded series (raw + filtered) to a PNG
    Render {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long, default_value_t = 30.0)]
        fs: f64,
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Measure {
            input,
            input_csv,
            csv_column,
            fs,
            duration,
            min_good_peaks,
            min_signal_std,
            cadence,
            cancel_after,
            live_out,
            plot,
            quiet,
        } => cmd_measure(
            input.as_deref(),
            input_csv.as_deref(),
            &csv_column,
            fs,
            duration,
            min_good_peaks,
            min_signal_std,
            cadence,
            cancel_after,
            live_out.as_deref(),
            plot.as_deref(),
            quiet,
        )?,
        Commands::Process {
            input,
            fs,
            min_good_peaks,
            min_signal_std,
        } => cmd_process(input.as_deref(), fs, min_good_peaks, min_signal_std)?,
        Commands::Simulate {
            bpm,
            fs,
            duration,
            amplitude,
            baseline,
            noise_std,
            seed,
            out,
        } => cmd_simulate(bpm, fs, duration, amplitude, baseline, noise_std, seed, out.as_deref())?,
        Commands::Render { input, fs, out } => cmd_render(input.as_deref(), fs, &out)?,
    }
    Ok(())
}

fn read_samples(input: Option<&Path>) -> Result<Vec<f64>> {
    match input {
        Some(path) => text_io::read_f64_series(path),
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            text_io::parse_f64_series(&buf)
        }
    }
}

/// Live sink that appends each update as one JSON line.
struct JsonlSink {
    writer: BufWriter<File>,
}

impl JsonlSink {
    fn create(path: &Path) -> Result<Self> {
        let file =
            File::create(path).with_context(|| format!("creating {}", path.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl LiveSink for JsonlSink {
    fn on_update(&mut self, update: &LiveUpdate) {
        match serde_json::to_string(update) {
            Ok(line) => {
                if let Err(err) = writeln!(self.writer, "{line}") {
                    log::warn!("dropping live update: {err}");
                }
            }
            Err(err) => log::warn!("dropping live update: {err}"),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_measure(
    input: Option<&Path>,
    input_csv: Option<&Path>,
    csv_column: &str,
    fs: f64,
    duration: f64,
    min_good_peaks: usize,
    min_signal_std: f64,
    cadence: Option<usize>,
    cancel_after: Option<f64>,
    live_out: Option<&Path>,
    plot: Option<&Path>,
    quiet: bool,
) -> Result<()> {
    let (fs, data) = if let Some(csv_path) = input_csv {
        csv_io::read_brightness_csv(csv_path, csv_column)?
    } else {
        (fs, read_samples(input)?)
    };

    if !quiet {
        eprint!("{INSTRUCTIONS}");
    }

    let config = SessionConfig {
        duration_s: duration,
        sample_rate_hz: fs,
        min_good_peaks,
        min_signal_std,
        live_cadence_samples: cadence,
    };
    let mut session = match live_out {
        Some(path) => Session::with_sink(config, Box::new(JsonlSink::create(path)?)),
        None => Session::new(config),
    };

    for (i, &value) in data.iter().enumerate() {
        let elapsed = i as f64 / fs;
        if let Some(limit) = cancel_after {
            if elapsed >= limit {
                session.cancel();
                break;
            }
        }
        if session.ingest(elapsed, value) == FeedOutcome::Done {
            break;
        }
    }

    match session.finalize() {
        Ok(verdict) => {
            if !quiet {
                print_summary(&verdict);
            }
            if let Some(png) = plot {
                render_final_plot(png, fs, &data)?;
            }
            println!("{}", serde_json::to_string(&verdict)?);
        }
        Err(err) => print_measurement_error(&err)?,
    }
    Ok(())
}

fn cmd_process(
    input: Option<&Path>,
    fs: f64,
    min_good_peaks: usize,
    min_signal_std: f64,
) -> Result<()> {
    let data = read_samples(input)?;
    if data.len() < MIN_SAMPLES {
        return print_measurement_error(&SessionError::InsufficientData {
            got: data.len(),
            needed: MIN_SAMPLES,
        });
    }
    let normalized = normalize(&data)?;
    let thresholds = QualityThresholds {
        min_good_peaks,
        min_signal_std,
    };
    match ppg::process(&normalized, fs, &PpgPipelineConfig::default()) {
        Ok(result) => {
            let duration_s = (data.len() as f64 - 1.0).max(0.0) / fs;
            let verdict = quality::assess(&data, &result, duration_s, &thresholds);
            println!("{}", serde_json::to_string(&verdict)?);
            Ok(())
        }
        Err(err) => print_measurement_error(&SessionError::Processing(err)),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_simulate(
    bpm: f64,
    fs: f64,
    duration: f64,
    amplitude: f64,
    baseline: f64,
    noise_std: f64,
    seed: u64,
    out: Option<&Path>,
) -> Result<()> {
    let samples = (duration * fs).round() as usize;
    let freq = bpm / 60.0;
    let mut rng = StdRng::seed_from_u64(seed);
    // uniform noise over +-std*sqrt(3) has the requested standard deviation
    let half_width = noise_std * 3.0f64.sqrt();
    let mut lines = String::with_capacity(samples * 8);
    for i in 0..samples {
        let t = i as f64 / fs;
        let noise = if noise_std > 0.0 {
            rng.gen_range(-half_width..=half_width)
        } else {
            0.0
        };
        let value = baseline + amplitude * (2.0 * PI * freq * t).sin() + noise;
        lines.push_str(&format!("{value:.6}\n"));
    }
    match out {
        Some(path) => std::fs::write(path, lines)
            .with_context(|| format!("writing {}", path.display()))?,
        None => io::stdout().write_all(lines.as_bytes())?,
    }
    Ok(())
}

fn cmd_render(input: Option<&Path>, fs: f64, out: &Path) -> Result<()> {
    let data = read_samples(input)?;
    render_final_plot(out, fs, &data)
}

/// Normalize + filter the full series and draw both traces; a failed filter
/// pass falls back to the normalized trace, mirroring the live monitor.
fn render_final_plot(path: &Path, fs: f64, data: &[f64]) -> Result<()> {
    let normalized = normalize(data)?;
    let filtered = match ppg::process(&normalized, fs, &PpgPipelineConfig::default()) {
        Ok(result) => result.filtered,
        Err(_) => normalized.clone(),
    };
    let elapsed: Vec<f64> = (0..normalized.len()).map(|i| i as f64 / fs).collect();
    let fig = figure_from_series(&elapsed, &normalized, &filtered);
    draw_plotters_figure(path, &fig)
}

fn draw_plotters_figure(path: &Path, fig: &Figure) -> Result<()> {
    let backend = BitMapBackend::new(path, (800, 480));
    let root = backend.into_drawing_area();
    root.fill(&WHITE)?;
    let x_values: Vec<f64> = fig
        .series
        .iter()
        .flat_map(|series| match series {
            Series::Line(line) => line.points.iter().map(|p| p[0]).collect::<Vec<_>>(),
        })
        .collect();
    let y_values: Vec<f64> = fig
        .series
        .iter()
        .flat_map(|series| match series {
            Series::Line(line) => line.points.iter().map(|p| p[1]).collect::<Vec<_>>(),
        })
        .collect();
    let x_min = x_values.iter().cloned().fold(f64::INFINITY, f64::min).min(0.0);
    let x_max = x_values.iter().cloned().fold(f64::NEG_INFINITY, f64::max).max(1.0);
    let y_min = y_values.iter().cloned().fold(f64::INFINITY, f64::min).min(0.0);
    let y_max = y_values.iter().cloned().fold(f64::NEG_INFINITY, f64::max).max(1.0);
    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .caption(
            fig.title.clone().unwrap_or_else(|| "Plot".into()),
            ("sans-serif", 24),
        )
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;
    chart.configure_mesh().draw()?;
    for series in &fig.series {
        match series {
            Series::Line(line) => {
                chart.draw_series(LineSeries::new(
                    line.points.iter().map(|p| (p[0], p[1])),
                    &RGBColor(
                        ((line.style.color.0 >> 16) & 0xFF) as u8,
                        ((line.style.color.0 >> 8) & 0xFF) as u8,
                        (line.style.color.0 & 0xFF) as u8,
                    ),
                ))?;
            }
        }
    }
    root.present()?;
    Ok(())
}

fn advice_text(advice: Advice) -> &'static str {
    match advice {
        Advice::ImproveContact => "Better finger contact (full coverage)",
        Advice::SteadyPressure => "Steady pressure and no movement",
        Advice::EnableFlash => "Flash turned ON",
    }
}

fn print_summary(verdict: &QualityVerdict) {
    eprintln!("{}", "=".repeat(50));
    eprintln!("FINAL RESULT");
    eprintln!("{}", "=".repeat(50));
    match verdict.status {
        Quality::Good => {
            if let Some(bpm) = verdict.bpm {
                eprintln!("Estimated Heart Rate: {bpm:.1} BPM");
            }
            eprintln!("Number of detected beats: {}", verdict.peak_count);
            eprintln!("Signal quality: GOOD");
            eprintln!("Measurement duration: {:.1} seconds", verdict.duration_s);
        }
        Quality::Poor => {
            eprintln!("Signal quality: POOR");
            eprintln!("Please try again with:");
            for advice in &verdict.advice {
                eprintln!(" - {}", advice_text(*advice));
            }
            eprintln!(
                "(Detected {} beats | Signal variation: {:.1})",
                verdict.peak_count, verdict.signal_std
            );
        }
    }
    if let Some(rmssd) = verdict.rmssd_ms {
        eprintln!("RMSSD (HRV): {rmssd:.1} ms");
    }
}

/// Measurement failures go to the result sink as data; they are not process
/// failures.
fn print_measurement_error(err: &SessionError) -> Result<()> {
    let kind = match err {
        SessionError::InsufficientData { .. } => "insufficient_data",
        SessionError::Processing(_) => "processing",
    };
    println!(
        "{}",
        serde_json::to_string(&json!({ "error": kind, "message": err.to_string() }))?
    );
    Ok(())
}
