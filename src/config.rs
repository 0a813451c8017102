// vim: noet

use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// definitions for the FFT
pub const BLOCK_LEN: usize = 512;
pub const SAMP_RATE: f32   = 32000.0;

// raw capture format: interleaved stereo, one 32 bit word per slot
pub const CAPTURE_CHANNELS:   usize = 2;
pub const CAPTURE_WORD_BYTES: usize = 4;
pub const CAPTURE_RAW_SHIFT:  u32   = 8;

// frequency range used for bass energy and spectral flux
pub const BASS_MIN_HZ: f32 =  40.0;
pub const BASS_MAX_HZ: f32 = 180.0;

// LED configuration
pub const NUM_STRIPS:         usize =  8;
pub const NUM_LEDS_PER_STRIP: usize = 15;

pub const NUM_LEDS_TOTAL: usize = NUM_STRIPS * NUM_LEDS_PER_STRIP;

// timing of the two domains
pub const RENDER_INTERVAL_MS: u32 = 10;
pub const AUDIO_INTERVAL_MS:  u32 = 15;
pub const FPS_ANIMATION:      f32 = 1000.0 / RENDER_INTERVAL_MS as f32;

// tempo estimation
pub const STARTUP_BEAT_INTERVAL_MS: f32   = 500.0;
pub const TEMPO_HISTORY_LEN:        usize = 6;
pub const TEMPO_EMA_ALPHA:          f32   = 0.15;

// outer limits for the plausible tempo band. Earlier tunings accepted the full
// 180..2000 ms range, later ones narrowed the default band to 75..140 BPM.
pub const AVG_BEAT_FLOOR_MS: u32 = 180;
pub const AVG_BEAT_CEIL_MS:  u32 = 2000;

// waves
pub const MIN_WAVE_WIDTH: f32 = 0.25;

// minimum gap between two rendered frame snapshots
pub const FRAME_MIN_INTERVAL_MS: u32 = 12;

// network configuration
pub const UDP_SERVER_ADDR: &str = "192.168.23.118:21324";

/// The tunable parameter set shared by the audio and the render domain.
///
/// Values coming from outside are never rejected. [`RuntimeConfig::normalize`] clamps every field
/// into its valid range, so a stored out-of-range value heals on the next pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig
{
	pub brightness: i32,

	pub beat_decay_min_ms: u32,
	pub beat_decay_max_ms: u32,

	/// idle time after which a wave is injected without a beat, 0 disables
	pub fallback_ms: u32,
	pub max_active_waves: u32,

	pub energy_ema_alpha: f32,
	pub flux_ema_alpha: f32,
	/// scales the EMA coefficients while the input is above the average, 1.0 is symmetric
	pub ema_rise_scale: f32,
	pub flux_threshold: f32,
	pub flux_rise_factor: f32,
	pub min_beat_interval_ms: u32,

	pub avg_beat_min_ms: u32,
	pub avg_beat_max_ms: u32,

	pub animation_auto: bool,
	pub animation_index: u32,
	pub auto_switch_ms: u32,
	/// relative tempo change that triggers an early animation switch, 0 disables
	pub tempo_switch_ratio: f32,

	pub spacing_mix: f32,
	pub spacing_min_nose: f32,
	pub spacing_max_nose: f32,
	pub wave_speed_base_fps: f32,

	/// per render tick decay of the global brightness pulse towards 1.0
	pub pulse_decay: f32,
}

impl Default for RuntimeConfig
{
	fn default() -> Self
	{
		RuntimeConfig {
			brightness:           80,
			beat_decay_min_ms:    160,
			beat_decay_max_ms:    1500,
			fallback_ms:          800,
			max_active_waves:     20,
			energy_ema_alpha:     0.08,
			flux_ema_alpha:       0.10,
			ema_rise_scale:       1.0,
			flux_threshold:       1.7,
			flux_rise_factor:     0.12,
			min_beat_interval_ms: 120,
			avg_beat_min_ms:      430,
			avg_beat_max_ms:      800,
			animation_auto:       true,
			animation_index:      0,
			auto_switch_ms:       10000,
			tempo_switch_ratio:   0.25,
			spacing_mix:          0.2,
			spacing_min_nose:     0.6,
			spacing_max_nose:     4.0,
			wave_speed_base_fps:  FPS_ANIMATION,
			pulse_decay:          0.92,
		}
	}
}

fn clamp_f32(value: f32, min: f32, max: f32) -> f32
{
	// NaN degrades to the lower bound instead of poisoning every consumer
	if value.is_nan() {
		min
	} else {
		value.clamp(min, max)
	}
}

fn ordered<T: PartialOrd>(a: &mut T, b: &mut T)
{
	if *a > *b {
		std::mem::swap(a, b);
	}
}

impl RuntimeConfig
{
	pub fn load(path: &Path) -> Result<RuntimeConfig, ConfigError>
	{
		let content = std::fs::read_to_string(path)
			.map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;

		let cfg: RuntimeConfig = toml::from_str(&content)
			.map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;

		Ok(cfg)
	}

	/// Clamp every field into its valid range. Idempotent.
	pub fn normalize(&mut self, animation_count: usize)
	{
		self.brightness = self.brightness.clamp(0, 255);

		self.beat_decay_min_ms = self.beat_decay_min_ms.clamp(50, 5000);
		self.beat_decay_max_ms = self.beat_decay_max_ms.clamp(50, 10000);
		ordered(&mut self.beat_decay_min_ms, &mut self.beat_decay_max_ms);

		self.fallback_ms = self.fallback_ms.min(10000);
		self.max_active_waves = self.max_active_waves.clamp(1, 100);

		self.energy_ema_alpha = clamp_f32(self.energy_ema_alpha, 0.01, 0.5);
		self.flux_ema_alpha   = clamp_f32(self.flux_ema_alpha,   0.01, 0.6);
		self.ema_rise_scale   = clamp_f32(self.ema_rise_scale,   0.05, 1.0);
		self.flux_threshold   = clamp_f32(self.flux_threshold,   1.1,  4.0);
		self.flux_rise_factor = clamp_f32(self.flux_rise_factor, 0.02, 0.6);
		self.min_beat_interval_ms = self.min_beat_interval_ms.clamp(80, 1000);

		self.avg_beat_min_ms = self.avg_beat_min_ms.clamp(AVG_BEAT_FLOOR_MS, AVG_BEAT_CEIL_MS);
		self.avg_beat_max_ms = self.avg_beat_max_ms.clamp(AVG_BEAT_FLOOR_MS, AVG_BEAT_CEIL_MS);
		ordered(&mut self.avg_beat_min_ms, &mut self.avg_beat_max_ms);

		let max_index = animation_count.saturating_sub(1) as u32;
		self.animation_index = self.animation_index.min(max_index);
		self.auto_switch_ms = self.auto_switch_ms.clamp(1000, 600_000);
		self.tempo_switch_ratio = clamp_f32(self.tempo_switch_ratio, 0.0, 1.0);

		self.spacing_mix      = clamp_f32(self.spacing_mix,      0.0,            1.0);
		self.spacing_min_nose = clamp_f32(self.spacing_min_nose, MIN_WAVE_WIDTH,  8.0);
		self.spacing_max_nose = clamp_f32(self.spacing_max_nose, MIN_WAVE_WIDTH, 16.0);
		ordered(&mut self.spacing_min_nose, &mut self.spacing_max_nose);

		self.wave_speed_base_fps = clamp_f32(self.wave_speed_base_fps, 1.0, 1000.0);
		self.pulse_decay = clamp_f32(self.pulse_decay, 0.5, 0.999);
	}

	pub fn normalized(mut self, animation_count: usize) -> RuntimeConfig
	{
		self.normalize(animation_count);
		self
	}
}

/// Shared, atomically swapped configuration.
///
/// Readers take a snapshot once per tick, so a concurrent update never becomes visible halfway
/// through a tick.
#[derive(Clone)]
pub struct ConfigHandle
{
	current: Arc<ArcSwap<RuntimeConfig>>,
	animation_count: usize,
}

impl ConfigHandle
{
	pub fn new(cfg: RuntimeConfig, animation_count: usize) -> ConfigHandle
	{
		ConfigHandle {
			current: Arc::new(ArcSwap::from_pointee(cfg.normalized(animation_count))),
			animation_count,
		}
	}

	pub fn load(&self) -> Arc<RuntimeConfig>
	{
		self.current.load_full()
	}

	pub fn store(&self, cfg: RuntimeConfig)
	{
		self.current.store(Arc::new(cfg.normalized(self.animation_count)));
	}
}
