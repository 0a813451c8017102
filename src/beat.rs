// vim: noet

/*
 * Beat detection on the spectral flux of the bass band, plus tempo smoothing.
 *
 * A beat fires when all three guards hold:
 *   - the minimum interval since the last beat has passed
 *   - flux exceeds its running average by `flux_threshold`
 *   - flux rose by more than `flux_rise_factor` times the average since the last tick
 */

use rand::rngs::StdRng;
use rand::Rng;

use crate::clock::{elapsed_ms, Millis};
use crate::config::{self, RuntimeConfig};
use crate::ring::RingBuffer;

// averages below this are considered uninitialized and get seeded with the input
const EMA_SEED_LEVEL: f32 = 1e-4;

// synthetic beat source
const SYNTHETIC_MIN_GAP_MS:   Millis = 120;
const SYNTHETIC_PERCENT:      u32    = 6;
const SYNTHETIC_STRENGTH:     f32    = 0.7;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BeatEvent
{
	pub strength: f32,
	pub time_ms: Millis,
	/// produced by the fallback generator, not by detection
	pub synthetic: bool,
}

fn clamp01(x: f32) -> f32
{
	x.clamp(0.0, 1.0)
}

fn ema(avg: f32, x: f32, alpha: f32) -> f32
{
	(1.0 - alpha) * avg + alpha * x
}

/// Smoothed beat interval: median of the last few intervals, blended into an EMA.
#[derive(Clone, Debug)]
pub struct TempoEstimator
{
	history: RingBuffer<f32, { config::TEMPO_HISTORY_LEN }>,
	average_ms: f32,
	last_interval_ms: Option<Millis>,
}

impl TempoEstimator
{
	pub fn new() -> TempoEstimator
	{
		TempoEstimator {
			history: RingBuffer::new(),
			average_ms: config::STARTUP_BEAT_INTERVAL_MS,
			last_interval_ms: None,
		}
	}

	pub fn record(&mut self, interval_ms: Millis, min_ms: Millis, max_ms: Millis)
	{
		let clamped = interval_ms.clamp(min_ms.min(max_ms), max_ms.max(min_ms));

		self.history.push(clamped as f32);
		self.last_interval_ms = Some(interval_ms);

		if let Some(median) = self.history.median() {
			self.average_ms = ema(self.average_ms, median, config::TEMPO_EMA_ALPHA);
		}
	}

	pub fn average_ms(&self) -> f32
	{
		self.average_ms
	}

	pub fn bpm(&self) -> f32
	{
		if self.average_ms > 1.0 {
			60000.0 / self.average_ms
		} else {
			0.0
		}
	}

	/// False until at least one real interval has been recorded.
	pub fn has_interval(&self) -> bool
	{
		!self.history.is_empty()
	}

	pub fn last_interval_ms(&self) -> Option<Millis>
	{
		self.last_interval_ms
	}

	pub fn reset(&mut self)
	{
		*self = TempoEstimator::new();
	}
}

impl Default for TempoEstimator
{
	fn default() -> Self
	{
		TempoEstimator::new()
	}
}

/// Intermediate values of the last decision, for tuning.
#[derive(Copy, Clone, Debug, Default, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectorDiagnostics
{
	pub energy: f32,
	pub energy_ema: f32,
	pub flux: f32,
	pub flux_ema: f32,
	pub ratio: f32,
	pub rise: f32,
	pub threshold: f32,
	pub rise_threshold: f32,
	pub interval_ok: bool,
	pub above: bool,
	pub rising: bool,
	pub last_strength: f32,
}

pub struct BeatDetector
{
	energy_ema: f32,
	flux_ema: f32,
	prev_flux: f32,
	last_beat_ms: Option<Millis>,

	tempo: TempoEstimator,
	diag: DetectorDiagnostics,
}

impl BeatDetector
{
	pub fn new() -> BeatDetector
	{
		BeatDetector {
			energy_ema: 0.0,
			flux_ema: 0.0,
			prev_flux: 0.0,
			last_beat_ms: None,
			tempo: TempoEstimator::new(),
			diag: DetectorDiagnostics::default(),
		}
	}

	fn update_average(avg: &mut f32, x: f32, alpha: f32, rise_scale: f32)
	{
		if *avg <= EMA_SEED_LEVEL {
			*avg = x;
			return;
		}

		let alpha = if x > *avg { alpha * rise_scale } else { alpha };
		*avg = ema(*avg, x, alpha);
	}

	/// Feed one front-end tick. Returns a beat when all guards hold.
	pub fn process_tick(&mut self, energy: f32, flux: f32, now: Millis, cfg: &RuntimeConfig) -> Option<BeatEvent>
	{
		if self.flux_ema <= EMA_SEED_LEVEL {
			self.flux_ema = flux;
		}
		if self.energy_ema <= EMA_SEED_LEVEL {
			self.energy_ema = energy;
		}

		let flux_ema = self.flux_ema;
		let rise = flux - self.prev_flux;

		let threshold = flux_ema * cfg.flux_threshold;
		let rise_threshold = flux_ema * cfg.flux_rise_factor;

		let interval_ok = match self.last_beat_ms {
			Some(last) => elapsed_ms(now, last) >= cfg.min_beat_interval_ms,
			None => true,
		};
		let above = flux > threshold;
		let rising = rise > rise_threshold;

		let ratio = flux / flux_ema.max(f32::EPSILON);

		let mut beat = None;

		if interval_ok && above && rising {
			let strength = clamp01((ratio - cfg.flux_threshold) / cfg.flux_threshold);

			if let Some(last) = self.last_beat_ms {
				self.tempo.record(elapsed_ms(now, last), cfg.avg_beat_min_ms, cfg.avg_beat_max_ms);
			}
			self.last_beat_ms = Some(now);
			self.diag.last_strength = strength;

			beat = Some(BeatEvent {
				strength,
				time_ms: now,
				synthetic: false,
			});
		}

		BeatDetector::update_average(&mut self.energy_ema, energy, cfg.energy_ema_alpha, cfg.ema_rise_scale);
		BeatDetector::update_average(&mut self.flux_ema, flux, cfg.flux_ema_alpha, cfg.ema_rise_scale);
		self.prev_flux = flux;

		self.diag = DetectorDiagnostics {
			energy,
			energy_ema: self.energy_ema,
			flux,
			flux_ema: self.flux_ema,
			ratio,
			rise,
			threshold,
			rise_threshold,
			interval_ok,
			above,
			rising,
			last_strength: self.diag.last_strength,
		};

		beat
	}

	/// Register a beat that did not come from detection (fallback source).
	pub fn synthetic_beat(&mut self, now: Millis, cfg: &RuntimeConfig) -> BeatEvent
	{
		if let Some(last) = self.last_beat_ms {
			self.tempo.record(elapsed_ms(now, last), cfg.avg_beat_min_ms, cfg.avg_beat_max_ms);
		}
		self.last_beat_ms = Some(now);
		self.diag.last_strength = SYNTHETIC_STRENGTH;

		BeatEvent {
			strength: SYNTHETIC_STRENGTH,
			time_ms: now,
			synthetic: true,
		}
	}

	pub fn tempo(&self) -> &TempoEstimator
	{
		&self.tempo
	}

	pub fn last_beat_ms(&self) -> Option<Millis>
	{
		self.last_beat_ms
	}

	pub fn diagnostics(&self) -> DetectorDiagnostics
	{
		self.diag
	}
}

impl Default for BeatDetector
{
	fn default() -> Self
	{
		BeatDetector::new()
	}
}

/// Low-confidence random beats that keep the strip alive without a capture source.
pub struct SyntheticBeats
{
	rng: StdRng,
	last_kick_ms: Option<Millis>,
}

impl SyntheticBeats
{
	pub fn new(rng: StdRng) -> SyntheticBeats
	{
		SyntheticBeats {
			rng,
			last_kick_ms: None,
		}
	}

	pub fn poll(&mut self, detector: &mut BeatDetector, now: Millis, cfg: &RuntimeConfig) -> Option<BeatEvent>
	{
		let gap_ok = match self.last_kick_ms {
			Some(last) => elapsed_ms(now, last) > SYNTHETIC_MIN_GAP_MS,
			None => true,
		};

		if gap_ok && self.rng.gen_range(0..100) < SYNTHETIC_PERCENT {
			self.last_kick_ms = Some(now);
			Some(detector.synthetic_beat(now, cfg))
		} else {
			None
		}
	}
}

#[cfg(test)]
mod tests
{
	use super::*;
	use rand::SeedableRng;

	#[test]
	fn concrete_trigger_strength()
	{
		let cfg = RuntimeConfig {
			flux_threshold: 1.7,
			flux_rise_factor: 0.12,
			..RuntimeConfig::default()
		};

		let mut det = BeatDetector::new();
		det.energy_ema = 100.0;
		det.flux_ema = 100.0;
		det.prev_flux = 50.0;

		let beat = det.process_tick(100.0, 200.0, 1000, &cfg).expect("beat");
		assert!((beat.strength - 0.17647).abs() < 1e-3);
		assert!(!beat.synthetic);

		let diag = det.diagnostics();
		assert!(diag.interval_ok && diag.above && diag.rising);
		assert!((diag.threshold - 170.0).abs() < 1e-3);
	}

	#[test]
	fn no_beat_without_rise()
	{
		let cfg = RuntimeConfig::default();
		let mut det = BeatDetector::new();
		det.flux_ema = 100.0;
		det.prev_flux = 195.0;

		assert!(det.process_tick(0.0, 200.0, 1000, &cfg).is_none());
		assert!(!det.diagnostics().rising);
	}

	#[test]
	fn first_tick_only_seeds()
	{
		let cfg = RuntimeConfig::default();
		let mut det = BeatDetector::new();
		assert!(det.process_tick(50.0, 80.0, 0, &cfg).is_none());
		assert_eq!(det.diagnostics().flux_ema, 80.0);
	}

	fn impulse_train(det: &mut BeatDetector, cfg: &RuntimeConfig, times: &[Millis]) -> usize
	{
		let mut beats = 0;
		let mut t = 0;
		let mut next = times.iter().peekable();

		// 10 ms ticks with a quiet floor and single tick impulses
		while let Some(&&hit) = next.peek() {
			let flux = if t == hit {
				next.next();
				1000.0
			} else {
				10.0
			};
			if det.process_tick(flux, flux, t, cfg).is_some() {
				beats += 1;
			}
			t += 10;
		}
		beats
	}

	#[test]
	fn close_impulses_yield_one_beat()
	{
		let cfg = RuntimeConfig { min_beat_interval_ms: 200, ..RuntimeConfig::default() };
		let mut det = BeatDetector::new();

		// both impulses are preceded by a quiet tick so they pass the rise guard
		let beats = impulse_train(&mut det, &cfg, &[500, 600]);
		assert_eq!(beats, 1);
	}

	#[test]
	fn periodic_impulses_converge_tempo()
	{
		let cfg = RuntimeConfig::default();
		let mut det = BeatDetector::new();

		let period = 600;
		let times: Vec<Millis> = (1..=40).map(|n| 200 + n * period).collect();
		let beats = impulse_train(&mut det, &cfg, &times);

		assert_eq!(beats, times.len());
		assert!(det.tempo().has_interval());
		assert!((det.tempo().average_ms() - period as f32).abs() < 10.0);
		assert!((det.tempo().bpm() - 100.0).abs() < 2.0);
	}

	#[test]
	fn tempo_defaults_before_first_interval()
	{
		let tempo = TempoEstimator::new();
		assert!(!tempo.has_interval());
		assert_eq!(tempo.average_ms(), 500.0);
		assert_eq!(tempo.bpm(), 120.0);
	}

	#[test]
	fn tempo_clamps_into_band()
	{
		let mut tempo = TempoEstimator::new();
		for _ in 0..60 {
			tempo.record(5000, 430, 800);
		}
		assert!((tempo.average_ms() - 800.0).abs() < 1.0);
		assert_eq!(tempo.last_interval_ms(), Some(5000));
	}

	#[test]
	fn median_rejects_double_counted_beat()
	{
		let mut tempo = TempoEstimator::new();
		for _ in 0..30 {
			tempo.record(500, 180, 2000);
		}
		tempo.record(250, 180, 2000);
		assert!((tempo.average_ms() - 500.0).abs() < 0.5);
	}

	#[test]
	fn beat_interval_across_clock_wrap()
	{
		let cfg = RuntimeConfig::default();
		let mut det = BeatDetector::new();
		det.flux_ema = 10.0;
		det.prev_flux = 10.0;

		let t0 = u32::MAX - 200;
		assert!(det.process_tick(10.0, 1000.0, t0, &cfg).is_some());
		det.flux_ema = 10.0;
		det.prev_flux = 10.0;
		let t1 = t0.wrapping_add(500);
		assert!(det.process_tick(10.0, 1000.0, t1, &cfg).is_some());
		assert_eq!(det.tempo().last_interval_ms(), Some(500));
	}

	#[test]
	fn synthetic_beats_are_marked()
	{
		let cfg = RuntimeConfig::default();
		let mut det = BeatDetector::new();
		let mut synth = SyntheticBeats::new(StdRng::seed_from_u64(7));

		let mut events = Vec::new();
		for t in (0..20_000).step_by(15) {
			if let Some(ev) = synth.poll(&mut det, t, &cfg) {
				events.push(ev);
			}
		}

		assert!(!events.is_empty());
		assert!(events.iter().all(|e| e.synthetic && e.strength == 0.7));
		assert!(events.windows(2).all(|w| w[1].time_ms - w[0].time_ms > 120));
	}
}
