// vim: noet

/*
 * The audio domain: one captured block in, beats and telemetry out through the shared handoff.
 */

use std::sync::Arc;

use rand::rngs::StdRng;

use crate::beat::{BeatDetector, BeatEvent, SyntheticBeats};
use crate::capture::{AudioFrame, CaptureSource, SampleAccumulator};
use crate::clock::{BlockClock, Millis};
use crate::config::RuntimeConfig;
use crate::envelope::{BassEnvelope, EnvelopeConfig};
use crate::error::CaptureError;
use crate::handoff::{AudioTelemetryCell, BeatHandoff};
use crate::signal_processing::SignalProcessing;

pub struct AudioPipeline
{
	sigproc: SignalProcessing,
	detector: BeatDetector,
	envelope: BassEnvelope,

	handoff: Arc<BeatHandoff>,
	telemetry: Arc<AudioTelemetryCell>,
}

impl AudioPipeline
{
	pub fn new(sigproc: SignalProcessing, envelope: EnvelopeConfig,
	           handoff: Arc<BeatHandoff>, telemetry: Arc<AudioTelemetryCell>) -> AudioPipeline
	{
		telemetry.set_source(true, false);
		telemetry.set_format(sigproc.samp_rate(), sigproc.block_size());
		telemetry.set_fft_ready(sigproc.is_ready());

		AudioPipeline {
			sigproc,
			detector: BeatDetector::new(),
			envelope: BassEnvelope::new(envelope),
			handoff,
			telemetry,
		}
	}

	pub fn detector(&self) -> &BeatDetector
	{
		&self.detector
	}

	/// Analyse one block captured at `now`. A detected beat is also published to the handoff.
	pub fn process_frame(&mut self, frame: &AudioFrame, now: Millis, cfg: &RuntimeConfig) -> Option<BeatEvent>
	{
		if let Some(event) = self.envelope.process_samples(&frame.samples, now) {
			log::debug!("bass envelope: attack {} ms, sustain+release {} ms", event.attack_ms, event.sustain_release_ms);
			self.telemetry.store_envelope(&event);
		}

		let result = self.sigproc.process(&frame.samples);
		self.telemetry.set_fft_ready(self.sigproc.is_ready());

		let snap = match result {
			Ok(Some(snap)) => snap,
			Ok(None) => return None,
			Err(e) => {
				log::warn!("spectral front-end: {}", e);
				return None;
			},
		};
		self.telemetry.store_spectrum(&snap);

		let beat = self.detector.process_tick(snap.energy, snap.flux, now, cfg);

		self.telemetry.store_detector(&self.detector.diagnostics(), self.detector.tempo());
		self.handoff.publish_tempo(self.detector.tempo());

		if let Some(b) = &beat {
			self.handoff.publish_beat(b);
		}

		beat
	}
}

/// Outcome of one [`CaptureFeed::step`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum FeedStep
{
	/// a block was analysed, stamped with its audio-domain time
	Block { stamp: Millis, beat: Option<BeatEvent> },
	/// a block is ready but not due for this many milliseconds
	Wait(Millis),
	/// no complete block available yet
	Idle,
	/// the source will never deliver again
	Finished,
}

/// Moves blocks from a capture source into an [`AudioPipeline`] at capture speed.
pub struct CaptureFeed
{
	source: Box<dyn CaptureSource>,
	acc: SampleAccumulator,
	clock: BlockClock,
}

impl CaptureFeed
{
	pub fn new(source: Box<dyn CaptureSource>, acc: SampleAccumulator) -> CaptureFeed
	{
		let clock = BlockClock::new(acc.block_len(), acc.sample_rate());

		CaptureFeed {
			source,
			acc,
			clock,
		}
	}

	pub fn block_ms(&self) -> f64
	{
		self.clock.block_ms()
	}

	/// Run one step of the capture loop at wall time `now`. Never sleeps, the caller honours
	/// [`FeedStep::Wait`] and [`FeedStep::Idle`].
	pub fn step(&mut self, pipeline: &mut AudioPipeline, now: Millis, cfg: &RuntimeConfig) -> Result<FeedStep, CaptureError>
	{
		while self.acc.pending_bytes() < self.acc.block_bytes() {
			if self.acc.fill_from(self.source.as_mut())? == 0 {
				return Ok(if self.source.is_finished() { FeedStep::Finished } else { FeedStep::Idle });
			}
		}

		let wait = self.clock.wait_ms(now);
		if wait > 0 {
			return Ok(FeedStep::Wait(wait));
		}

		let frame = match self.acc.next_frame() {
			Some(frame) => frame,
			None => return Ok(FeedStep::Idle),
		};

		let stamp = self.clock.stamp(now);
		let beat = pipeline.process_frame(&frame, stamp, cfg);

		Ok(FeedStep::Block { stamp, beat })
	}
}

/// Stand-in for the audio domain when no capture source is available.
pub struct SyntheticPipeline
{
	beats: SyntheticBeats,
	detector: BeatDetector,

	handoff: Arc<BeatHandoff>,
	telemetry: Arc<AudioTelemetryCell>,
}

impl SyntheticPipeline
{
	pub fn new(rng: StdRng, handoff: Arc<BeatHandoff>, telemetry: Arc<AudioTelemetryCell>) -> SyntheticPipeline
	{
		telemetry.set_source(false, true);
		telemetry.set_fft_ready(false);

		SyntheticPipeline {
			beats: SyntheticBeats::new(rng),
			detector: BeatDetector::new(),
			handoff,
			telemetry,
		}
	}

	pub fn poll(&mut self, now: Millis, cfg: &RuntimeConfig) -> Option<BeatEvent>
	{
		let beat = self.beats.poll(&mut self.detector, now, cfg);

		if let Some(b) = &beat {
			self.handoff.publish_beat(b);
			self.handoff.publish_tempo(self.detector.tempo());
			self.telemetry.store_detector(&self.detector.diagnostics(), self.detector.tempo());
		}

		beat
	}
}

#[cfg(test)]
mod tests
{
	use super::*;

	use rand::SeedableRng;

	use crate::config;
	use crate::signal_processing::Window;

	#[test]
	fn silence_produces_no_beats()
	{
		let handoff = Arc::new(BeatHandoff::new());
		let telemetry = Arc::new(AudioTelemetryCell::new());
		let sigproc = SignalProcessing::new(config::BLOCK_LEN, config::SAMP_RATE,
			(config::BASS_MIN_HZ, config::BASS_MAX_HZ), Window::Hamming);

		let mut pipeline = AudioPipeline::new(sigproc, EnvelopeConfig::default(), handoff.clone(), telemetry.clone());

		let frame = AudioFrame { samples: vec![0; config::BLOCK_LEN], sample_rate: config::SAMP_RATE };
		let cfg = RuntimeConfig::default();
		for i in 0..20 {
			assert!(pipeline.process_frame(&frame, i * 16, &cfg).is_none());
		}

		assert!(handoff.consume().is_none());
		let snap = telemetry.snapshot();
		assert!(snap.source_ok && snap.fft_ready && !snap.synthetic);
		assert_eq!(snap.fft_samples, config::BLOCK_LEN);
	}

	/// Hands out at most `chunk` bytes per read, then reports no data without finishing.
	struct Trickle
	{
		data: Vec<u8>,
		pos: usize,
		chunk: usize,
	}

	impl CaptureSource for Trickle
	{
		fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, CaptureError>
		{
			let n = self.chunk.min(buf.len()).min(self.data.len() - self.pos);
			buf[..n].copy_from_slice(&self.data[self.pos .. self.pos + n]);
			self.pos += n;
			Ok(n)
		}
	}

	#[test]
	fn feed_collects_partial_reads_into_blocks()
	{
		let block_bytes = config::BLOCK_LEN * config::CAPTURE_CHANNELS * config::CAPTURE_WORD_BYTES;
		let source = Box::new(Trickle { data: vec![0; block_bytes + block_bytes/2], pos: 0, chunk: 1000 });
		let acc = SampleAccumulator::new(config::BLOCK_LEN, config::CAPTURE_CHANNELS, 0,
			config::CAPTURE_RAW_SHIFT, config::SAMP_RATE).unwrap();
		let mut feed = CaptureFeed::new(source, acc);

		let sigproc = SignalProcessing::new(config::BLOCK_LEN, config::SAMP_RATE,
			(config::BASS_MIN_HZ, config::BASS_MAX_HZ), Window::Hamming);
		let mut pipeline = AudioPipeline::new(sigproc, EnvelopeConfig::default(),
			Arc::new(BeatHandoff::new()), Arc::new(AudioTelemetryCell::new()));
		let cfg = RuntimeConfig::default();

		assert_eq!(feed.block_ms(), 16.0);
		assert_eq!(feed.step(&mut pipeline, 50, &cfg).unwrap(), FeedStep::Block { stamp: 50, beat: None });
		// half a block is buffered, the source is not finished
		assert_eq!(feed.step(&mut pipeline, 60, &cfg).unwrap(), FeedStep::Idle);
	}

	#[test]
	fn synthetic_pipeline_publishes()
	{
		let handoff = Arc::new(BeatHandoff::new());
		let telemetry = Arc::new(AudioTelemetryCell::new());
		let mut pipeline = SyntheticPipeline::new(StdRng::seed_from_u64(3), handoff.clone(), telemetry.clone());

		let cfg = RuntimeConfig::default();
		let mut beats = 0;
		for i in 0..2000 {
			if pipeline.poll(i * 15, &cfg).is_some() {
				beats += 1;
				let b = handoff.consume().unwrap();
				assert!(b.synthetic);
			}
		}

		assert!(beats > 10);
		assert!(telemetry.snapshot().synthetic);
	}
}
