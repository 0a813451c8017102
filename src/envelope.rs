// vim: noet

/*
 * Bass envelope detector, independent of the FFT path.
 *
 * Raw samples are band-passed to the kick drum range, rectified and averaged over short windows.
 * The resulting envelope (fast attack, slow release) is compared against an adaptive baseline
 * with hysteresis:
 *
 *   IDLE    --env > thr_on, refractory over-->  ATTACK
 *   ATTACK  --first falling sample----------->  RELEASE
 *   RELEASE --env <= thr_off or cap reached-->  IDLE (emits the event)
 */

use std::f32::consts::PI;

use crate::clock::{elapsed_ms, Millis};
use crate::config;

const BAND_LOW_HZ:  f32 =  55.0;
const BAND_HIGH_HZ: f32 = 160.0;

// 24 bit samples in a 32 bit container
const FULL_SCALE: f32 = 8388608.0;

// baseline only follows the envelope while it stays this close above it
const BASELINE_TRACK_RATIO: f32 = 1.1;
const EVENT_MAX_MS: f32 = 10000.0;
// the internal clock resyncs when the caller's time jumps further ahead than this
const RESYNC_MS: Millis = 1000;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EnvelopeConfig
{
	pub sample_rate_hz: u32,
	pub update_ms: u16,

	pub attack_alpha: f32,
	pub release_alpha: f32,
	pub baseline_alpha: f32,

	pub thr_on_mul: f32,
	pub thr_off_mul: f32,

	pub refractory_ms: u16,
	pub release_cap_ms: u16,
}

impl Default for EnvelopeConfig
{
	fn default() -> Self
	{
		EnvelopeConfig {
			sample_rate_hz: config::SAMP_RATE as u32,
			update_ms: 10,
			attack_alpha: 0.55,
			release_alpha: 0.08,
			baseline_alpha: 0.004,
			thr_on_mul: 2.0,
			thr_off_mul: 1.4,
			refractory_ms: 260,
			release_cap_ms: 800,
		}
	}
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvelopeEvent
{
	pub attack_ms: u16,
	pub sustain_release_ms: u16,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EnvelopeState
{
	Idle,
	Attack,
	Release,
}

#[derive(Copy, Clone, Debug, Default)]
struct Biquad
{
	b0: f32,
	b1: f32,
	b2: f32,
	a1: f32,
	a2: f32,
	z1: f32,
	z2: f32,
}

impl Biquad
{
	/// RBJ band-pass with constant skirt gain.
	fn bandpass(f_low: f32, f_high: f32, samp_rate: f32) -> Biquad
	{
		let fc = (f_low * f_high).sqrt();
		let q = fc / (f_high - f_low);

		let w0 = 2.0 * PI * (fc / samp_rate);
		let alpha = w0.sin() / (2.0 * q);

		let a0 = 1.0 + alpha;

		Biquad {
			b0: alpha / a0,
			b1: 0.0,
			b2: -alpha / a0,
			a1: -2.0 * w0.cos() / a0,
			a2: (1.0 - alpha) / a0,
			z1: 0.0,
			z2: 0.0,
		}
	}

	fn process(&mut self, x: f32) -> f32
	{
		let y = self.b0 * x + self.z1;
		self.z1 = self.b1 * x + self.z2 - self.a1 * y;
		self.z2 = self.b2 * x - self.a2 * y;
		y
	}
}

pub struct BassEnvelope
{
	cfg: EnvelopeConfig,
	bandpass: Biquad,

	window_samples: u32,
	samples_until_update: u32,
	rect_sum: f32,

	env: f32,
	baseline: f32,
	prev_env: f32,

	state: EnvelopeState,
	attack_start_ms: Millis,
	peak_ms: Millis,
	peak_env: f32,
	last_event_ms: Option<Millis>,

	time_ms: Option<Millis>,
}

impl BassEnvelope
{
	pub fn new(cfg: EnvelopeConfig) -> BassEnvelope
	{
		let mut e = BassEnvelope {
			cfg,
			bandpass: Biquad::default(),
			window_samples: 1,
			samples_until_update: 1,
			rect_sum: 0.0,
			env: 0.0,
			baseline: 0.0,
			prev_env: 0.0,
			state: EnvelopeState::Idle,
			attack_start_ms: 0,
			peak_ms: 0,
			peak_env: 0.0,
			last_event_ms: None,
			time_ms: None,
		};
		e.reset();
		e
	}

	pub fn reset(&mut self)
	{
		let samp_rate = self.cfg.sample_rate_hz.max(1) as f32;
		// keep the upper band edge below Nyquist for low sample rates
		let high = BAND_HIGH_HZ.min(0.45 * samp_rate);
		let low = BAND_LOW_HZ.min(0.5 * high);
		self.bandpass = Biquad::bandpass(low, high, samp_rate);

		self.window_samples = ((self.cfg.sample_rate_hz as u64 * self.cfg.update_ms as u64) / 1000).max(1) as u32;
		self.samples_until_update = self.window_samples;
		self.rect_sum = 0.0;

		self.env = 0.0;
		self.baseline = 0.0;
		self.prev_env = 0.0;
		self.state = EnvelopeState::Idle;
		self.attack_start_ms = 0;
		self.peak_ms = 0;
		self.peak_env = 0.0;
		self.last_event_ms = None;
		self.time_ms = None;
	}

	pub fn set_config(&mut self, cfg: EnvelopeConfig)
	{
		self.cfg = cfg;
		self.reset();
	}

	pub fn config(&self) -> &EnvelopeConfig
	{
		&self.cfg
	}

	pub fn state(&self) -> EnvelopeState
	{
		self.state
	}

	pub fn envelope(&self) -> f32
	{
		self.env
	}

	pub fn baseline(&self) -> f32
	{
		self.baseline
	}

	/// Feed raw mono samples captured at `now`. Returns the last event emitted in this block.
	pub fn process_samples(&mut self, samples: &[i32], now: Millis) -> Option<EnvelopeEvent>
	{
		if samples.is_empty() {
			return None;
		}

		// only a forward jump resyncs, a caller lagging behind the sample count keeps the window clock
		let mut time = match self.time_ms {
			Some(t) if (now.wrapping_sub(t) as i32) <= RESYNC_MS as i32 => t,
			_ => now,
		};

		let mut fired = None;

		for &s in samples {
			let x = s as f32 / FULL_SCALE;
			self.rect_sum += self.bandpass.process(x).abs();

			self.samples_until_update -= 1;
			if self.samples_until_update == 0 {
				self.samples_until_update = self.window_samples;

				let rectified = self.rect_sum / self.window_samples as f32;
				self.rect_sum = 0.0;

				if let Some(event) = self.update(rectified, time) {
					fired = Some(event);
				}
				time = time.wrapping_add(self.cfg.update_ms as Millis);
			}
		}

		self.time_ms = Some(time);
		fired
	}

	/// Advance the state machine by one rectified envelope sample.
	pub fn update(&mut self, rectified: f32, now: Millis) -> Option<EnvelopeEvent>
	{
		// dual EMA: fast attack, slow release
		let alpha = if rectified > self.env { self.cfg.attack_alpha } else { self.cfg.release_alpha };
		self.env = (1.0 - alpha) * self.env + alpha * rectified;

		if self.baseline <= 1e-6 {
			self.baseline = self.env;
		} else if self.env < self.baseline * BASELINE_TRACK_RATIO {
			self.baseline = (1.0 - self.cfg.baseline_alpha) * self.baseline + self.cfg.baseline_alpha * self.env;
		}

		let thr_on = self.baseline * self.cfg.thr_on_mul;
		let thr_off = self.baseline * self.cfg.thr_off_mul;

		let refractory_ok = match self.last_event_ms {
			Some(last) => elapsed_ms(now, last) >= self.cfg.refractory_ms as Millis,
			None => true,
		};

		let mut fired = None;

		match self.state {
			EnvelopeState::Idle => {
				if refractory_ok && self.env > thr_on {
					self.state = EnvelopeState::Attack;
					self.attack_start_ms = now;
					self.peak_ms = now;
					self.peak_env = self.env;
				}
			},
			EnvelopeState::Attack => {
				if self.env >= self.peak_env {
					self.peak_env = self.env;
					self.peak_ms = now;
				}
				if self.env < self.prev_env {
					self.state = EnvelopeState::Release;
				}
			},
			EnvelopeState::Release => {
				let sustain_release = elapsed_ms(now, self.peak_ms);
				if self.env <= thr_off || sustain_release >= self.cfg.release_cap_ms as Millis {
					let attack = elapsed_ms(self.peak_ms, self.attack_start_ms);

					fired = Some(EnvelopeEvent {
						attack_ms: (attack as f32).clamp(0.0, EVENT_MAX_MS) as u16,
						sustain_release_ms: (sustain_release as f32).clamp(0.0, EVENT_MAX_MS) as u16,
					});

					self.last_event_ms = Some(now);
					self.state = EnvelopeState::Idle;
				}
			},
		}

		self.prev_env = self.env;
		fired
	}
}

impl Default for BassEnvelope
{
	fn default() -> Self
	{
		BassEnvelope::new(EnvelopeConfig::default())
	}
}
