use std::{
    f64::consts::PI,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use clap::{Parser, Subcommand};
use serde::Serialize;
use signal_pipe_core::{
    AppConfig, AsyncStats, Asynchronous, Consumer, FrameInfo, Job, JsonLinesListener, Result,
    SampleType, SignalPipeError, SpectralFeatures, SpectralSummary, Stream, StreamShape,
    ThreadPool, ThreadRegistry, Transformer, TriggerEventSender,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::live_defaults(),
    };
    let registry = Arc::new(ThreadRegistry::with_capacity(
        config.threads.registry_capacity,
    ));

    match cli.command {
        Commands::Detect {
            samples,
            dim,
            sample_rate,
            out,
        } => run_detect(&config, &samples, dim, sample_rate, out.as_deref()),
        Commands::Stream {
            seconds,
            frame_size,
            unpaced,
        } => run_stream(&config, &registry, seconds, frame_size, unpaced, cli.threads),
        Commands::Batch {
            inputs,
            out_dir,
            sample_rate,
        } => run_batch(&config, &registry, inputs, &out_dir, sample_rate, cli.threads),
    }
}

/// Prints the registry while the command's threads are still alive.
fn report_threads(registry: &ThreadRegistry, enabled: bool) -> Result<()> {
    if enabled {
        registry.write_info(&mut io::stderr())?;
    }
    Ok(())
}

fn run_detect(
    config: &AppConfig,
    samples: &Path,
    dim: usize,
    sample_rate: Option<f64>,
    out: Option<&Path>,
) -> Result<()> {
    let sample_rate = sample_rate.unwrap_or(config.pipeline.sample_rate);
    let values = read_samples(samples)?;
    let shape = StreamShape::new(dim, SampleType::Float, sample_rate);
    let stream = Stream::from_values(
        shape,
        &values.iter().map(|v| *v as f64).collect::<Vec<_>>(),
    )?;
    tracing::info!(?samples, num = stream.num(), dim, sample_rate, "running trigger");

    let writer: Box<dyn Write + Send> = match out {
        Some(path) => Box::new(io::BufWriter::new(fs::File::create(path)?)),
        None => Box::new(io::stdout()),
    };
    let mut trigger = TriggerEventSender::new(config.trigger.clone())
        .with_listener(Box::new(JsonLinesListener::new(writer)));

    trigger.consume_enter(&[shape])?;
    let frame_size = config.pipeline.frame_size;
    let delta = config.pipeline.delta_size;
    let mut frame = Stream::new(shape);
    let mut position = 0;
    while position < stream.num() {
        let frame_num = frame_size.min(stream.num() - position);
        let available = (frame_num + delta).min(stream.num() - position);
        copy_samples(&stream, position, available, &mut frame);

        let info = FrameInfo::new(position as f64 / sample_rate, frame_num, delta);
        trigger.consume(&info, std::slice::from_ref(&frame))?;
        position += frame_num;
    }
    trigger.consume_flush()
}

#[derive(Debug, Serialize)]
struct StreamReport {
    cycles: u64,
    seconds: f64,
    stats: AsyncStats,
    max_call_us: u128,
    mean_call_us: f64,
    /// Longest run of cycles that returned an unchanged result.
    max_stale_cycles: u64,
    last_rms: f64,
    last_centroid: f64,
}

fn run_stream(
    config: &AppConfig,
    registry: &Arc<ThreadRegistry>,
    seconds: f64,
    frame_size: Option<usize>,
    unpaced: bool,
    show_threads: bool,
) -> Result<()> {
    let sample_rate = config.pipeline.sample_rate;
    let frame_size = frame_size.unwrap_or(config.pipeline.frame_size);
    if frame_size < 2 {
        return Err(SignalPipeError::InvalidInput("frame size must be at least two"));
    }

    let input_shape = StreamShape::new(1, SampleType::Float, sample_rate);
    let output_shape = SpectralFeatures::output_shape(&input_shape, frame_size);
    let mut adapter = Asynchronous::new(SpectralFeatures::new())
        .with_registry(registry)
        .with_timeout(config.threads.stop_timeout());
    adapter.transform_enter(&input_shape, &output_shape, &[])?;
    tracing::info!(sample_rate, frame_size, seconds, "streaming synthetic sweep");

    let total = (seconds * sample_rate) as usize;
    let frame_period = Duration::from_secs_f64(frame_size as f64 / sample_rate);
    let mut input = Stream::zeroed(input_shape, frame_size);
    let mut output = Stream::zeroed(output_shape, 1);
    let mut previous = Vec::new();
    let mut report = StreamReport {
        cycles: 0,
        seconds,
        stats: AsyncStats::default(),
        max_call_us: 0,
        mean_call_us: 0.0,
        max_stale_cycles: 0,
        last_rms: 0.0,
        last_centroid: 0.0,
    };
    let mut stale = 0;
    let mut call_total = 0u128;
    let started = Instant::now();

    let mut position = 0;
    while position + frame_size <= total {
        fill_sweep(&mut input, position, sample_rate, total);
        let info = FrameInfo::new(position as f64 / sample_rate, frame_size, 0);

        let call = Instant::now();
        adapter.transform(&info, &input, &mut output, &[])?;
        let elapsed = call.elapsed().as_micros();
        report.max_call_us = report.max_call_us.max(elapsed);
        call_total += elapsed;
        report.cycles += 1;

        let current = output.to_values();
        if current == previous {
            stale += 1;
            report.max_stale_cycles = report.max_stale_cycles.max(stale);
        } else {
            stale = 0;
            previous = current;
        }

        position += frame_size;
        if !unpaced {
            let deadline = frame_period * report.cycles as u32;
            if let Some(wait) = deadline.checked_sub(started.elapsed()) {
                std::thread::sleep(wait);
            }
        }
    }

    report.stats = adapter.stats();
    report.mean_call_us = if report.cycles > 0 {
        call_total as f64 / report.cycles as f64
    } else {
        0.0
    };
    report.last_rms = output.value(0, 0);
    report.last_centroid = output.value(0, 1);
    report_threads(registry, show_threads)?;
    adapter.transform_flush()?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

type BatchOutput = Option<SpectralSummary>;

fn run_batch(
    config: &AppConfig,
    registry: &Arc<ThreadRegistry>,
    inputs: Vec<PathBuf>,
    out_dir: &Path,
    sample_rate: Option<f64>,
    show_threads: bool,
) -> Result<()> {
    fs::create_dir_all(out_dir)?;
    let sample_rate = sample_rate.unwrap_or(config.pipeline.sample_rate);
    let frame_size = config.pipeline.frame_size;
    let out_dir = out_dir.to_path_buf();

    let mut pool: ThreadPool<PathBuf, BatchOutput> =
        ThreadPool::with_registry("batch", config.pool.workers, registry)
            .with_poll_interval(config.pool.poll_interval());

    for input in inputs {
        let out_dir = out_dir.clone();
        pool.add(Job::new(
            move |inputs: &[PathBuf], outputs: &mut [BatchOutput]| {
                match summarize_file(&inputs[0], &out_dir, sample_rate, frame_size) {
                    Ok(summary) => {
                        outputs[0] = Some(summary);
                        true
                    }
                    Err(err) => {
                        tracing::warn!(input = ?inputs[0], error = %err, "batch job failed");
                        false
                    }
                }
            },
            vec![input],
            vec![None],
        ));
    }

    tracing::info!(jobs = pool.size(), workers = pool.workers(), "running batch");
    let all_ok = pool.work();
    report_threads(registry, show_threads)?;

    for job in pool.jobs() {
        match &job.outputs[0] {
            Some(summary) => println!(
                "{}\tframes={}\trms={:.4}\tcentroid={:.4}",
                job.inputs[0].display(),
                summary.frames,
                summary.mean_rms,
                summary.mean_centroid
            ),
            None => println!("{}\tfailed", job.inputs[0].display()),
        }
    }

    if all_ok {
        Ok(())
    } else {
        Err(SignalPipeError::msg("one or more batch jobs failed"))
    }
}

fn summarize_file(
    input: &Path,
    out_dir: &Path,
    sample_rate: f64,
    frame_size: usize,
) -> Result<SpectralSummary> {
    let samples = read_samples(input)?;
    let summary = SpectralFeatures::summarize(&samples, sample_rate, frame_size)?;

    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string());
    let target = out_dir.join(format!("{stem}.json"));
    fs::write(&target, serde_json::to_vec_pretty(&summary)?)?;
    tracing::debug!(?input, ?target, "summary written");
    Ok(summary)
}

/// Parses whitespace separated sample values.
fn read_samples(path: &Path) -> Result<Vec<f32>> {
    let text = fs::read_to_string(path)?;
    text.split_whitespace()
        .map(|token| {
            token.parse::<f32>().map_err(|err| {
                SignalPipeError::msg(format!("{}: invalid sample `{token}`: {err}", path.display()))
            })
        })
        .collect()
}

fn copy_samples(source: &Stream, start: usize, count: usize, target: &mut Stream) {
    let size = source.shape().sample_bytes();
    target.resize(count);
    target
        .bytes_mut()
        .copy_from_slice(&source.bytes()[start * size..(start + count) * size]);
}

/// Writes the next block of a logarithmic sine sweep.
fn fill_sweep(frame: &mut Stream, position: usize, sample_rate: f64, total: usize) {
    let low: f64 = 100.0;
    let high = sample_rate * 0.4;
    let duration = total as f64 / sample_rate;
    let ratio = (high / low).ln();

    for index in 0..frame.num() {
        let t = (position + index) as f64 / sample_rate;
        let phase = 2.0 * PI * low * duration / ratio * ((t / duration * ratio).exp() - 1.0);
        frame.set_value(index, 0, 0.5 * phase.sin());
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Real-time signal pipeline tools", long_about = None)]
struct Cli {
    /// JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Print the thread registry before the command's threads shut down.
    #[arg(long, global = true)]
    threads: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the threshold trigger over a sample file and print events as JSON lines.
    Detect {
        /// Whitespace separated, interleaved sample values.
        samples: PathBuf,
        /// Number of interleaved dimensions.
        #[arg(short, long, default_value_t = 1)]
        dim: usize,
        /// Overrides the configured sample rate.
        #[arg(short = 'r', long)]
        sample_rate: Option<f64>,
        /// Write events here instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Drive the asynchronous spectrum transformer with a synthetic sweep.
    Stream {
        #[arg(short, long, default_value_t = 2.0)]
        seconds: f64,
        /// Overrides the configured frame size.
        #[arg(short, long)]
        frame_size: Option<usize>,
        /// Feed frames as fast as possible instead of in real time.
        #[arg(long)]
        unpaced: bool,
    },
    /// Compute spectral summaries for many sample files in parallel.
    Batch {
        /// Mono sample files.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Directory receiving one JSON summary per input.
        #[arg(short, long)]
        out_dir: PathBuf,
        /// Overrides the configured sample rate.
        #[arg(short = 'r', long)]
        sample_rate: Option<f64>,
    },
}
