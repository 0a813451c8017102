// vim: noet

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;

use beatlight::animation::patterns::AnimationSelector;
use beatlight::audio::{AudioPipeline, CaptureFeed, FeedStep, SyntheticPipeline};
use beatlight::capture::{self, SampleAccumulator};
use beatlight::cli::Cli;
use beatlight::clock::{elapsed_ms, Clock};
use beatlight::config::{self, ConfigHandle, RuntimeConfig};
use beatlight::controller::Controller;
use beatlight::envelope::EnvelopeConfig;
use beatlight::handoff::{AudioTelemetryCell, BeatHandoff};
use beatlight::signal_processing::{SignalProcessing, Window};
use beatlight::telemetry::{self, FrameTap};
use beatlight::udpproto::UdpProto;

const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Everything the audio domain shares with the render domain.
#[derive(Clone)]
struct Shared
{
	handoff: Arc<BeatHandoff>,
	telemetry: Arc<AudioTelemetryCell>,
	config: ConfigHandle,
	clock: Clock,
	running: Arc<AtomicBool>,
}

struct CaptureOptions
{
	input: String,
	channels: usize,
	channel: usize,
	raw_shift: u32,
	sample_rate: f32,
	window: Window,
	synthetic: bool,
}

fn audio_interval() -> Duration
{
	Duration::from_millis(config::AUDIO_INTERVAL_MS as u64)
}

/// Read the capture source until it ends. An error means the source is unusable.
fn capture_loop(opts: &CaptureOptions, shared: &Shared) -> Result<()>
{
	let source = capture::open_source(&opts.input)?;
	let acc = SampleAccumulator::new(config::BLOCK_LEN, opts.channels, opts.channel, opts.raw_shift, opts.sample_rate)?;
	let mut feed = CaptureFeed::new(source, acc);

	let sigproc = SignalProcessing::new(config::BLOCK_LEN, opts.sample_rate,
		(config::BASS_MIN_HZ, config::BASS_MAX_HZ), opts.window);
	let envelope = EnvelopeConfig {
		sample_rate_hz: opts.sample_rate as u32,
		..EnvelopeConfig::default()
	};

	let mut pipeline = AudioPipeline::new(sigproc, envelope, shared.handoff.clone(), shared.telemetry.clone());

	log::info!("capturing from {} ({} Hz, slot {} of {}, shift {}, {:.1} ms blocks)",
		if opts.input == "-" { "stdin" } else { &opts.input },
		opts.sample_rate, opts.channel, opts.channels, opts.raw_shift, feed.block_ms());

	while shared.running.load(Ordering::Relaxed) {
		let cfg = shared.config.load();

		match feed.step(&mut pipeline, shared.clock.now_ms(), &cfg)? {
			FeedStep::Block { .. } => {},
			FeedStep::Wait(ms) => std::thread::sleep(Duration::from_millis(ms as u64)),
			FeedStep::Idle => std::thread::sleep(audio_interval()),
			FeedStep::Finished => {
				log::info!("end of capture stream");
				shared.running.store(false, Ordering::Relaxed);
				break;
			},
		}
	}

	Ok(())
}

fn synthetic_loop(shared: &Shared)
{
	let mut pipeline = SyntheticPipeline::new(StdRng::from_entropy(), shared.handoff.clone(), shared.telemetry.clone());

	while shared.running.load(Ordering::Relaxed) {
		let cfg = shared.config.load();
		pipeline.poll(shared.clock.now_ms(), &cfg);
		std::thread::sleep(audio_interval());
	}
}

fn audio_thread(opts: CaptureOptions, shared: Shared)
{
	if opts.synthetic {
		log::info!("synthetic beats requested, capture disabled");
	} else {
		match capture_loop(&opts, &shared) {
			Ok(()) => return,
			Err(e) => log::error!("capture unavailable: {:#}; falling back to synthetic beats", e),
		}
	}

	synthetic_loop(&shared);
}

fn modified(path: &Path) -> Option<SystemTime>
{
	std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Re-reads the config file when its modification time changes.
struct ConfigWatcher
{
	path: PathBuf,
	modified: Option<SystemTime>,
	last_check: Instant,
}

impl ConfigWatcher
{
	fn new(path: PathBuf) -> ConfigWatcher
	{
		ConfigWatcher {
			modified: modified(&path),
			path,
			last_check: Instant::now(),
		}
	}

	fn poll(&mut self, handle: &ConfigHandle)
	{
		if self.last_check.elapsed() < CONFIG_POLL_INTERVAL {
			return;
		}
		self.last_check = Instant::now();

		let m = modified(&self.path);
		if m == self.modified {
			return;
		}
		self.modified = m;

		match RuntimeConfig::load(&self.path) {
			Ok(cfg) => {
				handle.store(cfg);
				log::info!("reloaded {}", self.path.display());
			},
			Err(e) => log::warn!("{}; keeping the previous configuration", e),
		}
	}
}

fn main() -> Result<()>
{
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
		.format_timestamp_millis()
		.init();

	let cli = Cli::parse();

	let selector = AnimationSelector::new();

	let initial = match &cli.config {
		Some(path) => RuntimeConfig::load(path).context("loading the initial configuration")?,
		None => RuntimeConfig::default(),
	};

	let shared = Shared {
		handoff: Arc::new(BeatHandoff::new()),
		telemetry: Arc::new(AudioTelemetryCell::new()),
		config: ConfigHandle::new(initial, selector.count()),
		clock: Clock::new(),
		running: Arc::new(AtomicBool::new(true)),
	};

	let opts = CaptureOptions {
		input: cli.input.clone(),
		channels: cli.channels,
		channel: cli.channel,
		raw_shift: cli.raw_shift,
		sample_rate: cli.sample_rate,
		window: cli.window.into(),
		synthetic: cli.synthetic,
	};

	let audio = {
		let shared = shared.clone();
		std::thread::Builder::new()
			.name("audio".to_string())
			.spawn(move || audio_thread(opts, shared))
			.context("starting the audio thread")?
	};

	let mut udp = if cli.dry_run {
		log::info!("dry run, no UDP output");
		None
	} else {
		let u = UdpProto::new(&cli.target, config::NUM_LEDS_TOTAL)
			.with_context(|| format!("opening UDP output to {}", cli.target))?;
		log::info!("sending to {}", cli.target);
		Some(u)
	};

	let mut controller = Controller::with_parts(config::NUM_LEDS_TOTAL, selector, StdRng::from_entropy());
	let mut watcher = cli.config.clone().map(ConfigWatcher::new);
	let mut tap = FrameTap::new(config::FRAME_MIN_INTERVAL_MS);

	let status_interval_ms = (cli.status_interval * 1000).min(u32::MAX as u64) as u32;
	let mut last_status = shared.clock.now_ms();
	let mut output_ok = true;

	let interval = Duration::from_millis(config::RENDER_INTERVAL_MS as u64);
	let mut next_tick = Instant::now();

	println!("Done! Starting main loop…");

	while shared.running.load(Ordering::Relaxed) {
		let now = shared.clock.now_ms();
		let cfg = shared.config.load();

		controller.tick(now, &cfg, &shared.handoff);

		if let Some(u) = udp.as_mut() {
			match u.set_all(controller.leds()).and_then(|_| u.commit()) {
				Ok(()) if !output_ok => {
					log::info!("UDP output recovered");
					output_ok = true;
				},
				Ok(()) => {},
				Err(e) if output_ok => {
					log::warn!("{}", e);
					output_ok = false;
				},
				Err(_) => {},
			}
		}

		if cli.preview {
			if let Some(frame) = tap.snapshot(now, controller.leds()) {
				print!("\r{}", telemetry::ansi_preview(&frame));
				let _ = std::io::stdout().flush();
			}
		}

		if status_interval_ms > 0 && elapsed_ms(now, last_status) >= status_interval_ms {
			last_status = now;
			match controller.telemetry(now, &cfg, shared.telemetry.snapshot()).to_json() {
				Ok(json) => log::info!("status: {}", json),
				Err(e) => log::warn!("cannot serialize status: {}", e),
			}
		}

		if let Some(w) = watcher.as_mut() {
			w.poll(&shared.config);
		}

		next_tick += interval;
		let now_instant = Instant::now();
		if next_tick > now_instant {
			std::thread::sleep(next_tick - now_instant);
		} else {
			// fell behind, do not try to catch up
			next_tick = now_instant;
		}
	}

	if audio.join().is_err() {
		log::error!("audio thread panicked");
	}

	Ok(())
}
