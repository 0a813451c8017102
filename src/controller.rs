// vim: noet

/*
 * The render domain. Once per render tick:
 *
 *   beat/tempo read -> brightness envelope -> animation selection -> wave advance -> spacing
 *   -> composite -> global pulse -> wave injection
 *
 * Audio ingestion happens in the audio domain and reaches this module only through the
 * BeatHandoff.
 */

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::animation::patterns::AnimationSelector;
use crate::animation::renderer;
use crate::animation::waves::{WaveEngine, WaveParams};
use crate::animation::Color;
use crate::beat::BeatEvent;
use crate::clock::{elapsed_ms, Millis};
use crate::config::{self, RuntimeConfig};
use crate::handoff::{AudioTelemetry, BeatHandoff};
use crate::telemetry::{self, AnimationInfo, BeatStats, Telemetry, WaveInfo};

const PULSE_BEAT_GAIN       : f32 = 0.9;
const PULSE_SYNTHETIC       : f32 = 1.6;

// beat waves
const BEAT_SPEED_SCALE      : f32 = 25.0;
const BEAT_SPEED_OFFSET     : i32 = 5;
const BEAT_NOSE_BASE        : f32 = 0.8;
const BEAT_NOSE_GAIN        : f32 = 2.5;
const BEAT_TAIL_BASE        : f32 = 1.5;
const BEAT_TAIL_GAIN        : f32 = 4.0;
const REVERSE_PERCENT       : u32 = 25;
const HUE_SWEEP_MAX_DEG     : i16 = 40;

// faster music, faster waves: one speed step per 100 ms of period difference
const TEMPO_BIAS_STEP_MS    : f32 = 100.0;
const TEMPO_BIAS_MAX        : i32 = 3;
// the tempo is stale if no beat came within this many periods
const TEMPO_STALE_PERIODS   : f32 = 2.0;

// fallback waves
const FALLBACK_NOSE         : f32 = 1.0;
const FALLBACK_TAIL         : f32 = 2.0;

/// Brightness envelope after a beat: 1 at the beat, 0 after one period, quadratic ease-out.
pub fn beat_envelope(since_beat_ms: Millis, period_ms: f32) -> f32
{
	if period_ms <= 0.0 || since_beat_ms as f32 >= period_ms {
		return 0.0;
	}

	let e = 1.0 - since_beat_ms as f32 / period_ms;
	(e * e).clamp(0.0, 1.0)
}

/// Speed control of a beat-triggered wave.
pub fn beat_speed_control(strength: f32, tempo_bias: i32) -> i8
{
	let ctl = (strength * BEAT_SPEED_SCALE).round() as i32 - BEAT_SPEED_OFFSET + tempo_bias;
	ctl.clamp(-10, 10) as i8
}

fn tempo_bias(tempo_ms: f32) -> i32
{
	let bias = ((config::STARTUP_BEAT_INTERVAL_MS - tempo_ms) / TEMPO_BIAS_STEP_MS).round() as i32;
	bias.clamp(-TEMPO_BIAS_MAX, TEMPO_BIAS_MAX)
}

pub struct Controller
{
	engine: WaveEngine,
	selector: AnimationSelector,
	leds: Vec<Color>,

	rng: StdRng,

	stats: BeatStats,
	last_beat_ms: Option<Millis>,
	last_wave_ms: Option<Millis>,
	start_ms: Option<Millis>,

	tempo_ms: f32,
	tempo_reliable: bool,
	brightness: i32,
	pulse: f32,
}

impl Controller
{
	pub fn new(num_leds: usize) -> Controller
	{
		Controller::with_rng(num_leds, StdRng::from_entropy())
	}

	pub fn with_rng(num_leds: usize, rng: StdRng) -> Controller
	{
		Controller::with_parts(num_leds, AnimationSelector::new(), rng)
	}

	pub fn with_parts(num_leds: usize, selector: AnimationSelector, rng: StdRng) -> Controller
	{
		Controller {
			engine: WaveEngine::new(),
			selector,
			leds: vec![Color::BLACK; num_leds],
			rng,
			stats: BeatStats::default(),
			last_beat_ms: None,
			last_wave_ms: None,
			start_ms: None,
			tempo_ms: config::STARTUP_BEAT_INTERVAL_MS,
			tempo_reliable: false,
			brightness: 0,
			pulse: 1.0,
		}
	}

	fn on_beat(&mut self, beat: &BeatEvent, now: Millis)
	{
		self.last_beat_ms = Some(now);
		// no fallback wave right after a beat
		self.last_wave_ms = Some(now);

		self.stats.beat_count = self.stats.beat_count.wrapping_add(1);
		self.stats.last_beat_ms = now;
		self.stats.last_beat_strength = beat.strength;
		self.stats.last_beat_synthetic = beat.synthetic;

		let pulse = if beat.synthetic { PULSE_SYNTHETIC } else { 1.0 + PULSE_BEAT_GAIN * beat.strength };
		self.pulse = self.pulse.max(pulse);

		log::debug!("beat: strength {:.2}{} tempo {:.0} ms",
			beat.strength, if beat.synthetic { " (synthetic)" } else { "" }, self.tempo_ms);
	}

	/// Tempo is only trusted while beats keep coming at a plausible rate.
	fn update_tempo(&mut self, handoff: &BeatHandoff, now: Millis, cfg: &RuntimeConfig)
	{
		self.tempo_ms = handoff.tempo_ms();

		let recent = match self.last_beat_ms {
			Some(last) => (elapsed_ms(now, last) as f32) < TEMPO_STALE_PERIODS * self.tempo_ms,
			None => false,
		};
		let in_band = self.tempo_ms >= cfg.avg_beat_min_ms as f32 && self.tempo_ms <= cfg.avg_beat_max_ms as f32;

		self.tempo_reliable = handoff.tempo_reliable() && recent && in_band;
	}

	fn frame_brightness(&self, now: Millis, cfg: &RuntimeConfig) -> i32
	{
		let period = self.tempo_ms.clamp(cfg.beat_decay_min_ms as f32, cfg.beat_decay_max_ms as f32);

		let env = match self.last_beat_ms {
			Some(last) => beat_envelope(elapsed_ms(now, last), period),
			None => 0.0,
		};

		let base = cfg.brightness;
		(base + ((255 - base) as f32 * env).round() as i32).clamp(0, 255)
	}

	fn spawn_beat_wave(&mut self, beat: &BeatEvent)
	{
		let bias = if self.tempo_reliable { tempo_bias(self.tempo_ms) } else { 0 };

		let params = WaveParams {
			hue: self.rng.gen(),
			speed_control: beat_speed_control(beat.strength, bias),
			nose_width: BEAT_NOSE_BASE + BEAT_NOSE_GAIN * beat.strength,
			tail_width: BEAT_TAIL_BASE + BEAT_TAIL_GAIN * beat.strength,
			reverse: self.rng.gen_range(0..100) < REVERSE_PERCENT,
			hue_start_deg: 0,
			hue_end_deg: self.rng.gen_range(-HUE_SWEEP_MAX_DEG..=HUE_SWEEP_MAX_DEG),
		};

		self.engine.spawn(&params);
	}

	fn fallback_due(&mut self, now: Millis, cfg: &RuntimeConfig) -> bool
	{
		if cfg.fallback_ms == 0 {
			return false;
		}

		let last_wave = *self.last_wave_ms.get_or_insert(now);
		let beat_idle = match self.last_beat_ms {
			Some(last) => elapsed_ms(now, last) >= cfg.fallback_ms,
			None => true,
		};

		beat_idle && elapsed_ms(now, last_wave) >= cfg.fallback_ms
	}

	/// One render tick. The LED buffer holds the finished frame afterwards.
	pub fn tick(&mut self, now: Millis, cfg: &RuntimeConfig, handoff: &BeatHandoff)
	{
		self.start_ms.get_or_insert(now);

		// beat and tempo
		let beat = handoff.consume();
		if let Some(b) = &beat {
			self.on_beat(b, now);
		}
		self.update_tempo(handoff, now, cfg);

		self.brightness = self.frame_brightness(now, cfg);

		// animation table
		let reliable_tempo = if self.tempo_reliable { Some(self.tempo_ms) } else { None };
		self.selector.update(now, cfg, reliable_tempo);

		self.engine.set_frame_count(self.selector.frames().len());
		self.engine.set_speed_base_fps(cfg.wave_speed_base_fps);
		self.engine.set_capacity(cfg.max_active_waves as usize);

		// motion
		if self.engine.advance(now) && self.engine.len() > 1 {
			self.engine.apply_spacing(cfg.spacing_mix, cfg.spacing_min_nose, cfg.spacing_max_nose);
		}

		// composite
		self.leds.iter_mut().for_each(|c| *c = Color::BLACK);
		for wave in self.engine.waves() {
			renderer::render_wave(self.selector.frames(), wave, self.brightness, &mut self.leds);
		}

		renderer::apply_pulse(&mut self.leds, self.pulse);
		self.pulse = 1.0 + (self.pulse - 1.0) * cfg.pulse_decay;
		if self.pulse - 1.0 < 1e-3 {
			self.pulse = 1.0;
		}

		// injection
		if let Some(b) = &beat {
			self.spawn_beat_wave(b);
		}

		if self.fallback_due(now, cfg) {
			self.engine.spawn(&WaveParams {
				hue: self.rng.gen(),
				speed_control: 0,
				nose_width: FALLBACK_NOSE,
				tail_width: FALLBACK_TAIL,
				..WaveParams::default()
			});
			self.last_wave_ms = Some(now);
		}
	}

	pub fn leds(&self) -> &[Color]
	{
		&self.leds
	}

	pub fn frame_bytes(&self) -> Vec<u8>
	{
		telemetry::frame_bytes(&self.leds)
	}

	pub fn engine(&self) -> &WaveEngine
	{
		&self.engine
	}

	pub fn selector(&self) -> &AnimationSelector
	{
		&self.selector
	}

	pub fn beat_stats(&self) -> BeatStats
	{
		self.stats
	}

	pub fn pulse(&self) -> f32
	{
		self.pulse
	}

	pub fn telemetry(&self, now: Millis, cfg: &RuntimeConfig, audio: AudioTelemetry) -> Telemetry
	{
		let uptime_ms = self.start_ms.map(|s| elapsed_ms(now, s)).unwrap_or(0);
		let last_beat_age_ms = self.last_beat_ms.map(|t| elapsed_ms(now, t)).unwrap_or(0);

		let next_fallback_in_ms = if cfg.fallback_ms == 0 {
			None
		} else {
			let since_wave = self.last_wave_ms.map(|t| elapsed_ms(now, t)).unwrap_or(0);
			let since_beat = self.last_beat_ms.map(|t| elapsed_ms(now, t)).unwrap_or(Millis::MAX);
			Some(cfg.fallback_ms.saturating_sub(since_wave.min(since_beat)))
		};

		Telemetry {
			uptime_ms,
			beats: self.stats,
			last_beat_age_ms,
			avg_beat_interval_ms: self.tempo_ms,
			bpm: if self.tempo_ms > 1.0 { 60000.0 / self.tempo_ms } else { 0.0 },
			tempo_reliable: self.tempo_reliable,
			led_count: self.leds.len(),
			frame_bytes: 3 * self.leds.len(),
			brightness: self.brightness,
			pulse: self.pulse,
			animation: AnimationInfo {
				index: self.selector.index(),
				name: self.selector.name(),
				auto: self.selector.is_auto(),
			},
			waves: WaveInfo {
				active: self.engine.len(),
				last_wave_ms: self.last_wave_ms,
				last_wave_age_ms: self.last_wave_ms.map(|t| elapsed_ms(now, t)),
				next_fallback_in_ms,
			},
			audio,
		}
	}
}
