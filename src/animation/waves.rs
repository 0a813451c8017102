// vim: noet

/*
 * A wave is a point of light that travels along the frame index space of the current animation.
 *
 * Its brightness profile is asymmetric: the nose (in the direction of travel) and the tail have
 * their own widths. Waves enter just outside one end of the range and are retired once they have
 * left the other end, including their tail.
 */

use crate::clock::{elapsed_ms, Millis};
use crate::config;

const DEFAULT_FRAME_COUNT : usize = 10;
const DEFAULT_CAPACITY    : usize = 20;

const SPEED_CONTROL_MIN   : i8  = -10;
const SPEED_CONTROL_MAX   : i8  =  10;
const SPEED_MIN           : f32 = 0.1;  // fraction of the base frame rate
const SPEED_MAX           : f32 = 0.6;
const SPEED_DEFAULT       : f32 = 0.2;
const SPEED_CONTROL_SCALE : f32 = 25.0;

const HUE_UNITS_PER_DEGREE: f32 = 65536.0 / 360.0;

const MIN_TRAVEL: f32 = 1e-3;

fn wrap_hue(hue: i32) -> u16
{
	hue.rem_euclid(65536) as u16
}

/// Parameters of a newly spawned wave.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct WaveParams
{
	pub hue: u16,
	/// -10 (slow) ..= 10 (fast), 0 is the default speed
	pub speed_control: i8,
	pub nose_width: f32,
	pub tail_width: f32,
	pub reverse: bool,
	/// hue offset in degrees when entering
	pub hue_start_deg: i16,
	/// hue offset in degrees when leaving
	pub hue_end_deg: i16,
}

impl Default for WaveParams
{
	fn default() -> Self
	{
		WaveParams {
			hue: 0,
			speed_control: 0,
			nose_width: 1.0,
			tail_width: 3.0,
			reverse: false,
			hue_start_deg: 0,
			hue_end_deg: 0,
		}
	}
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Wave
{
	pub id: u32,

	pub center: f32,
	/// frame indices per second, negative for reverse waves
	pub speed: f32,

	pub hue: u16,
	pub base_hue: u16,
	pub hue_start_offset: i32,
	pub hue_end_offset: i32,

	pub start_center: f32,
	pub nose_width: f32,
	pub tail_width: f32,
	pub reverse: bool,
}

impl Wave
{
	/// Center position at which the wave has fully left the range.
	fn exit_center(&self, max_index: f32) -> f32
	{
		if self.reverse {
			-self.tail_width
		} else {
			max_index + self.tail_width
		}
	}

	fn is_gone(&self, max_index: f32) -> bool
	{
		if self.reverse {
			self.center < self.exit_center(max_index)
		} else {
			self.center > self.exit_center(max_index)
		}
	}

	/// Fraction of the full traversal already covered, in [0, 1].
	pub fn progress(&self, max_index: f32) -> f32
	{
		let travel = (self.exit_center(max_index) - self.start_center).abs();
		if travel < MIN_TRAVEL {
			return 0.0;
		}

		((self.center - self.start_center).abs() / travel).clamp(0.0, 1.0)
	}

	fn update_hue(&mut self, max_index: f32)
	{
		let p = self.progress(max_index);
		let offset = self.hue_start_offset as f32 + (self.hue_end_offset - self.hue_start_offset) as f32 * p;

		self.hue = wrap_hue(self.base_hue as i32 + offset.round() as i32);
	}
}

pub struct WaveEngine
{
	waves: Vec<Wave>,

	frame_count: usize,
	speed_base_fps: f32,
	capacity: usize,

	last_update_ms: Option<Millis>,
	next_id: u32,
}

impl WaveEngine
{
	pub fn new() -> WaveEngine
	{
		WaveEngine {
			waves: Vec::with_capacity(DEFAULT_CAPACITY),
			frame_count: DEFAULT_FRAME_COUNT,
			speed_base_fps: config::FPS_ANIMATION,
			capacity: DEFAULT_CAPACITY,
			last_update_ms: None,
			next_id: 0,
		}
	}

	/// Frame count of the active animation. Zero is ignored.
	pub fn set_frame_count(&mut self, frame_count: usize)
	{
		if frame_count > 0 {
			self.frame_count = frame_count;
		}
	}

	pub fn frame_count(&self) -> usize
	{
		self.frame_count
	}

	pub fn set_speed_base_fps(&mut self, fps: f32)
	{
		if fps.is_finite() && fps > 0.0 {
			self.speed_base_fps = fps;
		}
	}

	pub fn set_capacity(&mut self, capacity: usize)
	{
		self.capacity = capacity.max(1);
		while self.waves.len() > self.capacity {
			self.drop_oldest();
		}
	}

	pub fn capacity(&self) -> usize
	{
		self.capacity
	}

	fn max_index(&self) -> f32
	{
		self.frame_count.saturating_sub(1) as f32
	}

	pub fn reset(&mut self)
	{
		self.waves.clear();
		self.last_update_ms = None;
	}

	/// Speed in frame indices per second for a speed control value.
	pub fn speed_for_control(&self, speed_control: i8) -> f32
	{
		let ctl = speed_control.clamp(SPEED_CONTROL_MIN, SPEED_CONTROL_MAX) as f32;
		(SPEED_DEFAULT + ctl / SPEED_CONTROL_SCALE).clamp(SPEED_MIN, SPEED_MAX) * self.speed_base_fps
	}

	/// Add a wave, dropping the oldest one first when the engine is full. Returns the new wave's id.
	pub fn spawn(&mut self, params: &WaveParams) -> u32
	{
		while self.waves.len() >= self.capacity {
			self.drop_oldest();
		}

		if self.waves.is_empty() {
			// nothing is moving, the next advance starts a fresh clock
			self.last_update_ms = None;
		}

		let nose = params.nose_width.max(config::MIN_WAVE_WIDTH);
		let tail = params.tail_width.max(config::MIN_WAVE_WIDTH);
		let speed = self.speed_for_control(params.speed_control);

		let center = if params.reverse { self.max_index() + nose } else { -tail };

		let id = self.next_id;
		self.next_id = self.next_id.wrapping_add(1);

		let mut wave = Wave {
			id,
			center,
			speed: if params.reverse { -speed } else { speed },
			hue: params.hue,
			base_hue: params.hue,
			hue_start_offset: (params.hue_start_deg as f32 * HUE_UNITS_PER_DEGREE).round() as i32,
			hue_end_offset: (params.hue_end_deg as f32 * HUE_UNITS_PER_DEGREE).round() as i32,
			start_center: center,
			nose_width: nose,
			tail_width: tail,
			reverse: params.reverse,
		};
		wave.update_hue(self.max_index());

		self.waves.push(wave);

		id
	}

	/// Move all waves by the wall clock time since the previous call and retire the ones that left.
	///
	/// Returns false if nothing moved (first call after a reset, or no time elapsed).
	pub fn advance(&mut self, now: Millis) -> bool
	{
		let last = match self.last_update_ms {
			Some(t) => t,
			None => {
				self.last_update_ms = Some(now);
				return false;
			}
		};

		let dt_ms = elapsed_ms(now, last);
		if dt_ms == 0 {
			return false;
		}
		self.last_update_ms = Some(now);

		let dt = dt_ms as f32 / 1000.0;
		let max_index = self.max_index();

		for wave in self.waves.iter_mut() {
			wave.center += wave.speed * dt;
			wave.update_hue(max_index);
		}

		self.waves.retain(|w| !w.is_gone(max_index));

		true
	}

	/*
	 * Waves travelling in the same direction must not run into each other. Each follower's nose
	 * relaxes towards the free space behind its leader's tail.
	 */
	pub fn apply_spacing(&mut self, mix: f32, min_nose: f32, max_nose: f32)
	{
		let mix = if mix.is_finite() { mix.clamp(0.0, 1.0) } else { 0.0 };
		let min_nose = min_nose.max(config::MIN_WAVE_WIDTH);
		let max_nose = max_nose.max(min_nose);

		for reverse in [false, true] {
			let mut group: Vec<usize> = (0..self.waves.len())
				.filter(|&i| self.waves[i].reverse == reverse)
				.collect();

			if group.len() < 2 {
				continue;
			}

			// leading wave first
			if reverse {
				group.sort_by(|&a, &b| self.waves[a].center.total_cmp(&self.waves[b].center));
			} else {
				group.sort_by(|&a, &b| self.waves[b].center.total_cmp(&self.waves[a].center));
			}

			for pair in group.windows(2) {
				let leader = self.waves[pair[0]];
				let follower = &mut self.waves[pair[1]];

				let gap = (leader.center - follower.center).abs();
				let target = gap - leader.tail_width;

				let nose = follower.nose_width + mix * (target - follower.nose_width);
				follower.nose_width = nose.clamp(min_nose, max_nose);
			}
		}
	}

	pub fn drop_oldest(&mut self)
	{
		if !self.waves.is_empty() {
			self.waves.remove(0);
		}
	}

	pub fn waves(&self) -> &[Wave]
	{
		&self.waves
	}

	pub fn len(&self) -> usize
	{
		self.waves.len()
	}

	pub fn is_empty(&self) -> bool
	{
		self.waves.is_empty()
	}
}

impl Default for WaveEngine
{
	fn default() -> Self
	{
		WaveEngine::new()
	}
}

#[cfg(test)]
mod tests
{
	use super::*;

	fn forward(hue: u16) -> WaveParams
	{
		WaveParams { hue, nose_width: 1.0, tail_width: 2.0, ..WaveParams::default() }
	}

	#[test]
	fn speed_control_mapping()
	{
		let mut engine = WaveEngine::new();
		engine.set_speed_base_fps(100.0);

		assert!((engine.speed_for_control(0) - 20.0).abs() < 1e-4);
		assert!((engine.speed_for_control(10) - 60.0).abs() < 1e-4);
		assert!((engine.speed_for_control(-10) - 10.0).abs() < 1e-4);
		assert!((engine.speed_for_control(5) - 40.0).abs() < 1e-4);
		// out of range controls are clamped
		assert!((engine.speed_for_control(100) - 60.0).abs() < 1e-4);
	}

	#[test]
	fn forward_wave_crosses_the_range()
	{
		let mut engine = WaveEngine::new();
		engine.set_frame_count(10);
		engine.set_speed_base_fps(100.0);
		engine.spawn(&forward(0));

		assert_eq!(engine.waves()[0].center, -2.0);

		// 9 + 2 frame indices at 20 per second
		assert!(!engine.advance(1000));
		assert!(engine.advance(1550));

		let w = engine.waves()[0];
		assert!((w.center - 9.0).abs() < 1e-3, "center {}", w.center);
	}

	#[test]
	fn reverse_wave_enters_from_the_far_end()
	{
		let mut engine = WaveEngine::new();
		engine.set_frame_count(10);
		engine.set_speed_base_fps(100.0);
		engine.spawn(&WaveParams { reverse: true, ..forward(0) });

		let w = engine.waves()[0];
		assert_eq!(w.center, 10.0);
		assert!(w.speed < 0.0);

		engine.advance(0);
		engine.advance(500);
		assert!((engine.waves()[0].center - 0.0).abs() < 1e-3);

		// retired once the tail has left index 0
		engine.advance(590);
		assert_eq!(engine.len(), 1);
		engine.advance(700);
		assert!(engine.is_empty());
	}

	#[test]
	fn waves_retire_after_tail_leaves()
	{
		let mut engine = WaveEngine::new();
		engine.set_frame_count(10);
		engine.set_speed_base_fps(100.0);
		engine.spawn(&forward(0));

		engine.advance(0);
		// center at 10.8, the tail still reaches index 9
		engine.advance(640);
		assert_eq!(engine.len(), 1);

		engine.advance(700);
		assert!(engine.is_empty());
	}

	#[test]
	fn capacity_drops_oldest()
	{
		let mut engine = WaveEngine::new();
		engine.set_capacity(1);

		let first = engine.spawn(&forward(100));
		let second = engine.spawn(&forward(200));

		assert_ne!(first, second);
		assert_eq!(engine.len(), 1);
		assert_eq!(engine.waves()[0].id, second);
		assert_eq!(engine.waves()[0].base_hue, 200);
	}

	#[test]
	fn hue_sweeps_with_progress()
	{
		let mut engine = WaveEngine::new();
		engine.set_frame_count(10);
		engine.set_speed_base_fps(100.0);
		engine.spawn(&WaveParams { hue: 1000, hue_start_deg: 0, hue_end_deg: 36, ..forward(0) });

		assert_eq!(engine.waves()[0].hue, 1000);

		// half of the 13 frame indices of travel
		engine.advance(0);
		engine.advance(325);

		let expected = 1000.0 + 0.5 * 36.0 * HUE_UNITS_PER_DEGREE;
		assert!((engine.waves()[0].hue as f32 - expected).abs() <= 2.0);
	}

	#[test]
	fn negative_hue_offsets_wrap()
	{
		let mut engine = WaveEngine::new();
		engine.spawn(&WaveParams { hue: 10, hue_start_deg: -1, ..forward(0) });

		assert_eq!(engine.waves()[0].hue, wrap_hue(10 - 182));
		assert!(engine.waves()[0].hue > 65000);
	}

	#[test]
	fn widths_have_a_floor()
	{
		let mut engine = WaveEngine::new();
		engine.spawn(&WaveParams { nose_width: 0.0, tail_width: -3.0, ..WaveParams::default() });

		let w = engine.waves()[0];
		assert_eq!(w.nose_width, config::MIN_WAVE_WIDTH);
		assert_eq!(w.tail_width, config::MIN_WAVE_WIDTH);
	}

	#[test]
	fn advance_across_clock_wrap()
	{
		let mut engine = WaveEngine::new();
		engine.set_frame_count(100);
		engine.set_speed_base_fps(100.0);
		engine.spawn(&forward(0));

		engine.advance(u32::MAX - 49);
		assert!(engine.advance(50));

		// 100 ms at 20 per second
		assert!((engine.waves()[0].center - 0.0).abs() < 1e-3);
	}

	#[test]
	fn zero_elapsed_does_not_move()
	{
		let mut engine = WaveEngine::new();
		engine.spawn(&forward(0));
		engine.advance(10);
		assert!(!engine.advance(10));
	}

	#[test]
	fn spacing_relaxes_follower_nose()
	{
		let mut engine = WaveEngine::new();
		engine.set_frame_count(100);
		engine.set_speed_base_fps(100.0);

		engine.spawn(&forward(0));
		engine.advance(0);
		engine.advance(500);
		engine.spawn(&forward(1));

		// leader at 8.0 with tail 2.0, follower at -2.0: free space is 8.0
		engine.apply_spacing(0.5, 0.5, 10.0);
		assert!((engine.waves()[1].nose_width - 4.5).abs() < 1e-4);
		// the leader is not touched
		assert_eq!(engine.waves()[0].nose_width, 1.0);

		engine.apply_spacing(0.5, 0.5, 10.0);
		assert!((engine.waves()[1].nose_width - 6.25).abs() < 1e-4);

		engine.apply_spacing(0.5, 0.5, 4.0);
		assert_eq!(engine.waves()[1].nose_width, 4.0);
	}

	#[test]
	fn spacing_settles()
	{
		let mut engine = WaveEngine::new();
		engine.set_frame_count(60);
		engine.set_speed_base_fps(100.0);

		for i in 0..4 {
			engine.spawn(&WaveParams { reverse: i % 2 == 1, ..forward(i as u16) });
			engine.advance(i * 200);
		}

		for _ in 0..200 {
			engine.apply_spacing(0.2, 0.6, 4.0);
		}
		let settled: Vec<f32> = engine.waves().iter().map(|w| w.nose_width).collect();

		engine.apply_spacing(0.2, 0.6, 4.0);
		for (w, before) in engine.waves().iter().zip(settled.iter()) {
			assert!((w.nose_width - before).abs() < 1e-3);
			assert!(w.nose_width >= 0.6 && w.nose_width <= 4.0);
		}
	}

	#[test]
	fn spacing_groups_by_direction()
	{
		let mut engine = WaveEngine::new();
		engine.set_frame_count(20);

		engine.spawn(&forward(0));
		engine.spawn(&WaveParams { reverse: true, ..forward(1) });

		// one wave per direction, nothing to negotiate
		engine.apply_spacing(1.0, 0.5, 4.0);
		assert_eq!(engine.waves()[0].nose_width, 1.0);
		assert_eq!(engine.waves()[1].nose_width, 1.0);
	}
}
