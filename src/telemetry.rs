// vim: noet

use std::fmt::Write;

use serde::Serialize;

use crate::animation::Color;
use crate::clock::{elapsed_ms, Millis};
use crate::handoff::AudioTelemetry;

/// Beat timing as seen by the render domain.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeatStats
{
	pub beat_count: u32,
	pub last_beat_ms: Millis,
	pub last_beat_strength: f32,
	pub last_beat_synthetic: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationInfo
{
	pub index: usize,
	pub name: &'static str,
	pub auto: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaveInfo
{
	pub active: usize,
	pub last_wave_ms: Option<Millis>,
	pub last_wave_age_ms: Option<Millis>,
	/// time until a fallback wave is due, absent when fallback waves are disabled
	pub next_fallback_in_ms: Option<Millis>,
}

/// Status document, a pure projection of the controller and audio state.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Telemetry
{
	pub uptime_ms: Millis,

	#[serde(flatten)]
	pub beats: BeatStats,
	pub last_beat_age_ms: Millis,
	pub avg_beat_interval_ms: f32,
	pub bpm: f32,
	pub tempo_reliable: bool,

	pub led_count: usize,
	pub frame_bytes: usize,
	pub brightness: i32,
	pub pulse: f32,

	pub animation: AnimationInfo,
	pub waves: WaveInfo,
	pub audio: AudioTelemetry,
}

impl Telemetry
{
	pub fn to_json(&self) -> Result<String, serde_json::Error>
	{
		serde_json::to_string(self)
	}
}

/// Rate limited access to the rendered LED buffer.
pub struct FrameTap
{
	min_interval_ms: Millis,
	last_ms: Option<Millis>,
}

impl FrameTap
{
	pub fn new(min_interval_ms: Millis) -> FrameTap
	{
		FrameTap {
			min_interval_ms,
			last_ms: None,
		}
	}

	/// R, G, B bytes per LED, or `None` if the previous snapshot is too recent.
	pub fn snapshot(&mut self, now: Millis, leds: &[Color]) -> Option<Vec<u8>>
	{
		if let Some(last) = self.last_ms {
			if self.min_interval_ms > 0 && elapsed_ms(now, last) < self.min_interval_ms {
				return None;
			}
		}

		self.last_ms = Some(now);
		Some(frame_bytes(leds))
	}
}

pub fn frame_bytes(leds: &[Color]) -> Vec<u8>
{
	leds.iter().flat_map(|c| [c.r, c.g, c.b]).collect()
}

/// One line of true color blocks for a terminal preview.
pub fn ansi_preview(frame: &[u8]) -> String
{
	let mut line = String::with_capacity(frame.len() * 7);

	for rgb in frame.chunks_exact(3) {
		let _ = write!(line, "\x1b[38;2;{};{};{}m\u{2588}", rgb[0], rgb[1], rgb[2]);
	}
	line.push_str("\x1b[0m");

	line
}
