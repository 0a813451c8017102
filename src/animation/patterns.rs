// vim: noet

/*
 * Frame table providers and the selector that picks the active one.
 *
 * The strips are mounted as spokes around a common hub, every strip starting at the hub. They
 * are daisy-chained in a serpentine, so every second strip is wired from the outside in.
 */

use crate::animation::{Frame, FrameTable};
use crate::clock::{elapsed_ms, Millis};
use crate::config::{self, RuntimeConfig};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Pattern
{
	/// rings expanding from the hub
	Circles,
	/// one spoke after the other
	Lines,
	CirclesReversed,
	LinesReversed,
}

impl Pattern
{
	pub const ALL: [Pattern; 4] = [
		Pattern::Circles,
		Pattern::Lines,
		Pattern::CirclesReversed,
		Pattern::LinesReversed,
	];

	pub fn name(&self) -> &'static str
	{
		match self {
			Pattern::Circles         => "circles",
			Pattern::Lines           => "lines",
			Pattern::CirclesReversed => "circles-reversed",
			Pattern::LinesReversed   => "lines-reversed",
		}
	}

	pub fn from_name(name: &str) -> Option<Pattern>
	{
		Pattern::ALL.iter().copied().find(|p| p.name() == name)
	}

	pub fn frames(&self, num_strips: usize, leds_per_strip: usize) -> FrameTable
	{
		match self {
			Pattern::Circles => circles(num_strips, leds_per_strip),
			Pattern::CirclesReversed => {
				let mut frames = circles(num_strips, leds_per_strip);
				frames.reverse();
				frames
			},
			Pattern::LinesReversed => lines_reversed(num_strips, leds_per_strip),
			Pattern::Lines => {
				let mut frames = lines_reversed(num_strips, leds_per_strip);
				frames.reverse();
				frames
			},
		}
	}
}

/// Physical LED index of the `led`-th LED (counted from the hub) on `strip`.
fn led_index(strip: usize, led: usize, leds_per_strip: usize) -> i32
{
	let offset = if strip % 2 == 1 { leds_per_strip - led - 1 } else { led };
	(strip * leds_per_strip + offset) as i32
}

fn circles(num_strips: usize, leds_per_strip: usize) -> FrameTable
{
	(0..leds_per_strip)
		.map(|led| (0..num_strips).map(|strip| led_index(strip, led, leds_per_strip)).collect::<Frame>())
		.collect()
}

fn lines_reversed(num_strips: usize, leds_per_strip: usize) -> FrameTable
{
	(0..num_strips)
		.rev()
		.map(|strip| (0..leds_per_strip).map(|led| led_index(strip, led, leds_per_strip)).collect::<Frame>())
		.collect()
}

/// Chooses the active frame table, either fixed or rotating.
pub struct AnimationSelector
{
	patterns: Vec<Pattern>,
	tables: Vec<FrameTable>,

	current: usize,
	fixed: usize,
	auto: bool,

	last_switch_ms: Option<Millis>,
	tempo_at_switch: Option<f32>,
}

impl AnimationSelector
{
	pub fn new() -> AnimationSelector
	{
		AnimationSelector::with_geometry(config::NUM_STRIPS, config::NUM_LEDS_PER_STRIP)
	}

	/// Generate and cache the tables of all patterns for the given strip layout.
	pub fn with_geometry(num_strips: usize, leds_per_strip: usize) -> AnimationSelector
	{
		let patterns = Pattern::ALL.to_vec();
		let tables = patterns.iter().map(|p| p.frames(num_strips, leds_per_strip)).collect();

		AnimationSelector {
			patterns,
			tables,
			current: 0,
			fixed: 0,
			auto: true,
			last_switch_ms: None,
			tempo_at_switch: None,
		}
	}

	pub fn count(&self) -> usize
	{
		self.patterns.len()
	}

	pub fn name_by_index(&self, index: usize) -> &'static str
	{
		self.patterns.get(index).map(|p| p.name()).unwrap_or("unknown")
	}

	pub fn is_auto(&self) -> bool
	{
		self.auto
	}

	fn switch_to(&mut self, index: usize)
	{
		if index != self.current {
			log::info!("animation: {} -> {}", self.name_by_index(self.current), self.name_by_index(index));
			self.current = index;
		}
	}

	/// Once per render tick. `tempo_ms` is the beat period if the tempo estimate is trustworthy.
	///
	/// The mode and the fixed index are taken from `cfg`, the runtime config is the only way to
	/// steer the selection. Returns true if the active animation changed (including the initial
	/// selection).
	pub fn update(&mut self, now: Millis, cfg: &RuntimeConfig, tempo_ms: Option<f32>) -> bool
	{
		self.auto = cfg.animation_auto;
		self.fixed = (cfg.animation_index as usize).min(self.count() - 1);

		let last_switch = match self.last_switch_ms {
			Some(t) => t,
			None => {
				self.current = if self.auto { 0 } else { self.fixed };
				self.last_switch_ms = Some(now);
				self.tempo_at_switch = tempo_ms;
				return true;
			}
		};

		if !self.auto {
			let before = self.current;
			self.switch_to(self.fixed);
			return before != self.current;
		}

		let timed_out = elapsed_ms(now, last_switch) >= cfg.auto_switch_ms;

		let tempo_changed = match (self.tempo_at_switch, tempo_ms) {
			(Some(reference), Some(tempo)) if cfg.tempo_switch_ratio > 0.0 && reference > 1.0 => {
				((tempo - reference) / reference).abs() > cfg.tempo_switch_ratio
			},
			(None, Some(tempo)) => {
				// first trustworthy tempo becomes the reference
				self.tempo_at_switch = Some(tempo);
				false
			},
			_ => false,
		};

		if timed_out || tempo_changed {
			if tempo_changed {
				log::debug!("tempo changed since last switch, rotating early");
			}

			self.switch_to((self.current + 1) % self.count());
			self.last_switch_ms = Some(now);
			self.tempo_at_switch = tempo_ms;
			return true;
		}

		false
	}

	pub fn frames(&self) -> &[Frame]
	{
		&self.tables[self.current]
	}

	pub fn index(&self) -> usize
	{
		self.current
	}

	pub fn name(&self) -> &'static str
	{
		self.name_by_index(self.current)
	}
}

impl Default for AnimationSelector
{
	fn default() -> Self
	{
		AnimationSelector::new()
	}
}
