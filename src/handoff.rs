// vim: noet

/*
 * State shared between the audio domain (single producer) and the render domain (single
 * consumer).
 *
 * Every field is an independent atomic so the render domain never blocks on the audio domain.
 * A pending beat is packed into a single 64 bit word (time in the upper half, strength bits in
 * the lower half with the sign bit marking synthetic beats) and taken with one swap, so the
 * consumer can never pair a flag with the payload of a different beat.
 */

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use serde::Serialize;

use crate::beat::{BeatEvent, DetectorDiagnostics, TempoEstimator};
use crate::config;
use crate::envelope::EnvelopeEvent;
use crate::signal_processing::{BinRange, SpectralSnapshot};

/// f32 stored as its bit pattern.
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32
{
	pub fn new(value: f32) -> AtomicF32
	{
		AtomicF32(AtomicU32::new(value.to_bits()))
	}

	pub fn load(&self, order: Ordering) -> f32
	{
		f32::from_bits(self.0.load(order))
	}

	pub fn store(&self, value: f32, order: Ordering)
	{
		self.0.store(value.to_bits(), order)
	}
}

// strength is in [0, 1], so its bit pattern never reaches the sign bit and a packed beat is
// never all ones
const NO_BEAT: u64 = u64::MAX;
const SYNTHETIC_BIT: u32 = 1 << 31;

fn pack_beat(beat: &BeatEvent) -> u64
{
	let mut low = beat.strength.clamp(0.0, 1.0).to_bits();
	if beat.synthetic {
		low |= SYNTHETIC_BIT;
	}
	((beat.time_ms as u64) << 32) | low as u64
}

fn unpack_beat(word: u64) -> BeatEvent
{
	let low = word as u32;
	BeatEvent {
		strength: f32::from_bits(low & !SYNTHETIC_BIT),
		time_ms: (word >> 32) as u32,
		synthetic: low & SYNTHETIC_BIT != 0,
	}
}

#[derive(Debug)]
pub struct BeatHandoff
{
	pending: AtomicU64,

	tempo_ms: AtomicF32,
	tempo_reliable: AtomicBool,
}

impl BeatHandoff
{
	pub fn new() -> BeatHandoff
	{
		BeatHandoff {
			pending: AtomicU64::new(NO_BEAT),
			tempo_ms: AtomicF32::new(config::STARTUP_BEAT_INTERVAL_MS),
			tempo_reliable: AtomicBool::new(false),
		}
	}

	/// Audio domain: announce a beat. A beat that was not consumed yet is replaced.
	pub fn publish_beat(&self, beat: &BeatEvent)
	{
		self.pending.store(pack_beat(beat), Ordering::Release);
	}

	pub fn publish_tempo(&self, tempo: &TempoEstimator)
	{
		self.tempo_ms.store(tempo.average_ms(), Ordering::Relaxed);
		self.tempo_reliable.store(tempo.has_interval(), Ordering::Relaxed);
	}

	/// Render domain: take the pending beat, if any. Each beat is delivered at most once.
	pub fn consume(&self) -> Option<BeatEvent>
	{
		match self.pending.swap(NO_BEAT, Ordering::AcqRel) {
			NO_BEAT => None,
			word => Some(unpack_beat(word)),
		}
	}

	pub fn tempo_ms(&self) -> f32
	{
		self.tempo_ms.load(Ordering::Relaxed)
	}

	pub fn bpm(&self) -> f32
	{
		let ms = self.tempo_ms();
		if ms > 1.0 { 60000.0 / ms } else { 0.0 }
	}

	/// False until the detector has measured at least one real interval.
	pub fn tempo_reliable(&self) -> bool
	{
		self.tempo_reliable.load(Ordering::Relaxed)
	}
}

impl Default for BeatHandoff
{
	fn default() -> Self
	{
		BeatHandoff::new()
	}
}

/// Read-only projection of the audio domain for telemetry.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioTelemetry
{
	pub source_ok: bool,
	pub fft_ready: bool,
	pub synthetic: bool,

	#[serde(flatten)]
	pub detector: DetectorDiagnostics,
	pub last_beat_interval_ms: u32,

	pub sample_rate_hz: f32,
	pub fft_samples: usize,
	pub bass_min_hz: f32,
	pub bass_max_hz: f32,
	pub bins: BinRange,

	/// DC offset of the raw input, a drifting value hints at a broken microphone
	pub mic_mean: f32,
	pub mic_rms: f32,
	pub mic_peak: f32,

	pub envelope_events: u32,
	pub envelope_attack_ms: u16,
	pub envelope_release_ms: u16,
}

/// Lock-free holder of [`AudioTelemetry`]. Fields are updated independently, a reader may see
/// values from two consecutive ticks but never a torn scalar.
#[derive(Debug, Default)]
pub struct AudioTelemetryCell
{
	source_ok: AtomicBool,
	fft_ready: AtomicBool,
	synthetic: AtomicBool,

	energy: AtomicF32,
	energy_ema: AtomicF32,
	flux: AtomicF32,
	flux_ema: AtomicF32,
	ratio: AtomicF32,
	rise: AtomicF32,
	threshold: AtomicF32,
	rise_threshold: AtomicF32,
	interval_ok: AtomicBool,
	above: AtomicBool,
	rising: AtomicBool,
	last_strength: AtomicF32,
	last_beat_interval_ms: AtomicU32,

	sample_rate_hz: AtomicF32,
	fft_samples: AtomicU32,
	bin_min: AtomicU32,
	bin_max: AtomicU32,
	bin_width_hz: AtomicF32,

	mic_mean: AtomicF32,
	mic_rms: AtomicF32,
	mic_peak: AtomicF32,

	envelope_events: AtomicU32,
	envelope_attack_ms: AtomicU32,
	envelope_release_ms: AtomicU32,
}

impl AudioTelemetryCell
{
	pub fn new() -> AudioTelemetryCell
	{
		AudioTelemetryCell::default()
	}

	pub fn set_source(&self, source_ok: bool, synthetic: bool)
	{
		self.source_ok.store(source_ok, Ordering::Relaxed);
		self.synthetic.store(synthetic, Ordering::Relaxed);
	}

	pub fn set_format(&self, sample_rate_hz: f32, fft_samples: usize)
	{
		self.sample_rate_hz.store(sample_rate_hz, Ordering::Relaxed);
		self.fft_samples.store(fft_samples as u32, Ordering::Relaxed);
	}

	pub fn set_fft_ready(&self, ready: bool)
	{
		self.fft_ready.store(ready, Ordering::Relaxed);
	}

	pub fn store_spectrum(&self, snap: &SpectralSnapshot)
	{
		self.bin_min.store(snap.bins.min as u32, Ordering::Relaxed);
		self.bin_max.store(snap.bins.max as u32, Ordering::Relaxed);
		self.bin_width_hz.store(snap.bins.width_hz, Ordering::Relaxed);
		self.mic_mean.store(snap.mic_mean, Ordering::Relaxed);
		self.mic_rms.store(snap.mic_rms, Ordering::Relaxed);
		self.mic_peak.store(snap.mic_peak, Ordering::Relaxed);
	}

	pub fn store_detector(&self, diag: &DetectorDiagnostics, tempo: &TempoEstimator)
	{
		self.energy.store(diag.energy, Ordering::Relaxed);
		self.energy_ema.store(diag.energy_ema, Ordering::Relaxed);
		self.flux.store(diag.flux, Ordering::Relaxed);
		self.flux_ema.store(diag.flux_ema, Ordering::Relaxed);
		self.ratio.store(diag.ratio, Ordering::Relaxed);
		self.rise.store(diag.rise, Ordering::Relaxed);
		self.threshold.store(diag.threshold, Ordering::Relaxed);
		self.rise_threshold.store(diag.rise_threshold, Ordering::Relaxed);
		self.interval_ok.store(diag.interval_ok, Ordering::Relaxed);
		self.above.store(diag.above, Ordering::Relaxed);
		self.rising.store(diag.rising, Ordering::Relaxed);
		self.last_strength.store(diag.last_strength, Ordering::Relaxed);
		self.last_beat_interval_ms.store(tempo.last_interval_ms().unwrap_or(0), Ordering::Relaxed);
	}

	pub fn store_envelope(&self, event: &EnvelopeEvent)
	{
		self.envelope_attack_ms.store(event.attack_ms as u32, Ordering::Relaxed);
		self.envelope_release_ms.store(event.sustain_release_ms as u32, Ordering::Relaxed);
		self.envelope_events.fetch_add(1, Ordering::Relaxed);
	}

	pub fn snapshot(&self) -> AudioTelemetry
	{
		let f = |a: &AtomicF32| a.load(Ordering::Relaxed);
		let b = |a: &AtomicBool| a.load(Ordering::Relaxed);
		let u = |a: &AtomicU32| a.load(Ordering::Relaxed);

		AudioTelemetry {
			source_ok: b(&self.source_ok),
			fft_ready: b(&self.fft_ready),
			synthetic: b(&self.synthetic),
			detector: DetectorDiagnostics {
				energy: f(&self.energy),
				energy_ema: f(&self.energy_ema),
				flux: f(&self.flux),
				flux_ema: f(&self.flux_ema),
				ratio: f(&self.ratio),
				rise: f(&self.rise),
				threshold: f(&self.threshold),
				rise_threshold: f(&self.rise_threshold),
				interval_ok: b(&self.interval_ok),
				above: b(&self.above),
				rising: b(&self.rising),
				last_strength: f(&self.last_strength),
			},
			last_beat_interval_ms: u(&self.last_beat_interval_ms),
			sample_rate_hz: f(&self.sample_rate_hz),
			fft_samples: u(&self.fft_samples) as usize,
			bass_min_hz: config::BASS_MIN_HZ,
			bass_max_hz: config::BASS_MAX_HZ,
			bins: BinRange {
				min: u(&self.bin_min) as usize,
				max: u(&self.bin_max) as usize,
				width_hz: f(&self.bin_width_hz),
			},
			mic_mean: f(&self.mic_mean),
			mic_rms: f(&self.mic_rms),
			mic_peak: f(&self.mic_peak),
			envelope_events: u(&self.envelope_events),
			envelope_attack_ms: u(&self.envelope_attack_ms) as u16,
			envelope_release_ms: u(&self.envelope_release_ms) as u16,
		}
	}
}
