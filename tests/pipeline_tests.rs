// vim: noet

use std::f32::consts::PI;
use std::io::Cursor;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use beatlight::animation::patterns::AnimationSelector;
use beatlight::audio::{AudioPipeline, CaptureFeed, FeedStep};
use beatlight::capture::{ReaderSource, SampleAccumulator};
use beatlight::clock::Millis;
use beatlight::config::{self, RuntimeConfig};
use beatlight::controller::Controller;
use beatlight::envelope::EnvelopeConfig;
use beatlight::handoff::{AudioTelemetryCell, BeatHandoff};
use beatlight::signal_processing::{SignalProcessing, Window};

const FULL_SCALE: f32 = 8388608.0;
const FRAME_MS: Millis = 16;
const FIRST_KICK: usize = 40;
const KICK_EVERY: usize = 32;
const KICKS: usize = 8;

/// A 125 Hz tone, quiet except for one loud block every `KICK_EVERY` blocks.
fn kick_track() -> Vec<Vec<i32>>
{
	let tone = |amplitude: f32| -> Vec<i32> {
		(0..config::BLOCK_LEN)
			.map(|i| (amplitude * FULL_SCALE * (2.0 * PI * 125.0 * i as f32 / config::SAMP_RATE).sin()) as i32)
			.collect()
	};

	let quiet = tone(0.05);
	let loud = tone(0.5);

	let blocks = FIRST_KICK + KICK_EVERY * KICKS;
	(0..blocks)
		.map(|i| {
			let kick = i >= FIRST_KICK && (i - FIRST_KICK) % KICK_EVERY == 0;
			if kick { loud.clone() } else { quiet.clone() }
		})
		.collect()
}

fn pipeline(handoff: &Arc<BeatHandoff>, telemetry: &Arc<AudioTelemetryCell>) -> AudioPipeline
{
	let sigproc = SignalProcessing::new(config::BLOCK_LEN, config::SAMP_RATE,
		(config::BASS_MIN_HZ, config::BASS_MAX_HZ), Window::Hamming);

	AudioPipeline::new(sigproc, EnvelopeConfig::default(), handoff.clone(), telemetry.clone())
}

#[test]
fn kicks_drive_waves_and_tempo()
{
	let handoff = Arc::new(BeatHandoff::new());
	let audio = Arc::new(AudioTelemetryCell::new());
	let mut pipeline = pipeline(&handoff, &audio);

	let mut controller = Controller::with_parts(config::NUM_LEDS_TOTAL, AnimationSelector::new(), StdRng::seed_from_u64(11));
	let cfg = RuntimeConfig::default();

	let mut beats = 0;
	let mut lit_ticks = 0;

	for (i, block) in kick_track().into_iter().enumerate() {
		let now = i as Millis * FRAME_MS;
		let frame = beatlight::capture::AudioFrame { samples: block, sample_rate: config::SAMP_RATE };

		if let Some(beat) = pipeline.process_frame(&frame, now, &cfg) {
			assert!(!beat.synthetic);
			assert!(beat.strength > 0.0);
			beats += 1;
		}

		controller.tick(now, &cfg, &handoff);
		if i > FIRST_KICK && controller.leds().iter().any(|c| !c.is_black()) {
			lit_ticks += 1;
		}
	}

	assert_eq!(beats, KICKS);
	assert_eq!(controller.beat_stats().beat_count, KICKS as u32);
	assert!(lit_ticks > 0);

	// 32 blocks of 16 ms between kicks
	assert!(handoff.tempo_reliable());
	let tempo = handoff.tempo_ms();
	assert!(tempo > 500.0 && tempo <= 512.0, "tempo {}", tempo);

	let now = (FIRST_KICK + KICK_EVERY * KICKS) as Millis * FRAME_MS;
	let status = controller.telemetry(now, &cfg, audio.snapshot());
	assert!(status.audio.source_ok);
	assert!(!status.audio.synthetic);
	assert_eq!(status.led_count, config::NUM_LEDS_TOTAL);

	let json = status.to_json().unwrap();
	assert!(json.contains(&format!("\"beatCount\":{}", KICKS)));
}

#[test]
fn buffered_capture_replays_at_capture_speed()
{
	// channel 0 carries the tone, channel 1 is silent; words are left aligned 24 bit samples
	let mut raw = Vec::new();
	for block in kick_track() {
		for s in block {
			raw.extend_from_slice(&(s << config::CAPTURE_RAW_SHIFT).to_le_bytes());
			raw.extend_from_slice(&0i32.to_le_bytes());
		}
	}

	// the whole recording is readable at once, like a file
	let source = Box::new(ReaderSource::new(Cursor::new(raw)));
	let acc = SampleAccumulator::new(config::BLOCK_LEN, config::CAPTURE_CHANNELS, 0,
		config::CAPTURE_RAW_SHIFT, config::SAMP_RATE).unwrap();
	let mut feed = CaptureFeed::new(source, acc);

	let handoff = Arc::new(BeatHandoff::new());
	let audio = Arc::new(AudioTelemetryCell::new());
	let mut pipeline = pipeline(&handoff, &audio);
	let cfg = RuntimeConfig::default();

	let start: Millis = 7000;
	let mut wall = start;
	let mut stamps = Vec::new();
	let mut beats = 0;

	loop {
		match feed.step(&mut pipeline, wall, &cfg).unwrap() {
			FeedStep::Block { stamp, beat } => {
				stamps.push(stamp);
				if beat.is_some() {
					beats += 1;
					assert!(handoff.consume().is_some());
				}
			},
			// a sleeping caller
			FeedStep::Wait(ms) => wall += ms,
			FeedStep::Idle => panic!("buffered source reported no data"),
			FeedStep::Finished => break,
		}
	}

	let blocks = FIRST_KICK + KICK_EVERY * KICKS;
	assert_eq!(stamps.len(), blocks);
	assert!(stamps.windows(2).all(|w| w[1] - w[0] == FRAME_MS));
	assert_eq!(stamps[0], start);
	assert_eq!(wall, start + (blocks as Millis - 1) * FRAME_MS);

	// unpaced, every kick after the first would land inside the minimum beat interval
	assert_eq!(beats, KICKS);
}
