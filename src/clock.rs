// vim: noet

/*
 * Millisecond time base shared by the audio and the render domain.
 *
 * Timestamps are u32 counters that wrap after ~49 days. Durations are always computed by wrapping
 * subtraction, which stays correct across the overflow as long as the real duration fits into
 * u32.
 */

use std::time::Instant;

pub type Millis = u32;

/// Time elapsed from `then` to `now`, correct across counter wraparound.
#[inline]
pub fn elapsed_ms(now: Millis, then: Millis) -> Millis
{
	now.wrapping_sub(then)
}

#[derive(Copy, Clone, Debug)]
pub struct Clock
{
	origin: Instant,
	offset: Millis,
}

impl Clock
{
	pub fn new() -> Clock
	{
		Clock::with_offset(0)
	}

	/// Start the counter at `offset` instead of zero.
	pub fn with_offset(offset: Millis) -> Clock
	{
		Clock {
			origin: Instant::now(),
			offset,
		}
	}

	pub fn now_ms(&self) -> Millis
	{
		// truncation to u32 is the intended wraparound
		let ms = self.origin.elapsed().as_millis() as u64;
		(ms as u32).wrapping_add(self.offset)
	}
}

impl Default for Clock
{
	fn default() -> Self
	{
		Clock::new()
	}
}

// input lagging further behind the wall clock than this is re-anchored, not replayed in a burst
const MAX_LAG_MS: Millis = 1000;

/// Audio-domain timestamps derived from the number of blocks consumed.
///
/// Buffered input (a file, a pipe from a file) hands out blocks much faster than they were
/// recorded. Stamping each block by its sample position and holding it back until that position
/// is due replays the input at capture speed. A live source is never held back because its blocks
/// only arrive once they have been recorded.
#[derive(Clone, Debug)]
pub struct BlockClock
{
	block_ms: f64,
	anchor_ms: Option<Millis>,
	blocks: u64,
}

impl BlockClock
{
	pub fn new(block_len: usize, sample_rate: f32) -> BlockClock
	{
		BlockClock {
			block_ms: block_len as f64 * 1000.0 / (sample_rate as f64).max(1.0),
			anchor_ms: None,
			blocks: 0,
		}
	}

	pub fn block_ms(&self) -> f64
	{
		self.block_ms
	}

	fn due_ms(&self, anchor: Millis) -> Millis
	{
		// truncation to u32 is the intended wraparound
		anchor.wrapping_add((self.blocks as f64 * self.block_ms) as u64 as u32)
	}

	/// Time to wait at `now` before the next block is due. Zero before the first block and when late.
	pub fn wait_ms(&self, now: Millis) -> Millis
	{
		match self.anchor_ms {
			Some(anchor) => (self.due_ms(anchor).wrapping_sub(now) as i32).max(0) as Millis,
			None => 0,
		}
	}

	/// Timestamp of the next block, consumed at `now`.
	pub fn stamp(&mut self, now: Millis) -> Millis
	{
		let due = match self.anchor_ms {
			Some(anchor) if (now.wrapping_sub(self.due_ms(anchor)) as i32) <= MAX_LAG_MS as i32 => {
				self.due_ms(anchor)
			},
			_ => {
				self.anchor_ms = Some(now);
				self.blocks = 0;
				now
			},
		};

		self.blocks += 1;
		due
	}
}

#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn elapsed_across_overflow()
	{
		let then = u32::MAX - 4;
		let now = then.wrapping_add(15);
		assert_eq!(now, 10);
		assert_eq!(elapsed_ms(now, then), 15);
	}

	#[test]
	fn elapsed_plain()
	{
		assert_eq!(elapsed_ms(1500, 1000), 500);
		assert_eq!(elapsed_ms(7, 7), 0);
	}

	#[test]
	fn clock_offset_wraps()
	{
		let clock = Clock::with_offset(u32::MAX);
		let now = clock.now_ms();
		// at most a few ms passed, so the counter is either at MAX or just wrapped
		assert!(elapsed_ms(now, u32::MAX) < 1000);
	}

	#[test]
	fn buffered_blocks_are_spread_over_their_duration()
	{
		let mut bc = BlockClock::new(512, 32000.0);
		assert_eq!(bc.wait_ms(100), 0);
		assert_eq!(bc.stamp(100), 100);

		// the whole input is available at once, the wall clock did not move
		assert_eq!(bc.wait_ms(100), 16);
		assert_eq!(bc.wait_ms(110), 6);
		assert_eq!(bc.stamp(116), 116);

		// a late block is stamped with its own position, not delayed further
		assert_eq!(bc.wait_ms(140), 0);
		assert_eq!(bc.stamp(140), 132);
	}

	#[test]
	fn fractional_block_length_does_not_drift()
	{
		// 480 samples at 44.1 kHz are 10.884 ms
		let mut bc = BlockClock::new(480, 44100.0);
		let mut last = 0;
		for _ in 0..=1000 {
			last = bc.stamp(0);
		}
		assert_eq!(last, 10884);
	}

	#[test]
	fn stalled_source_re_anchors()
	{
		let mut bc = BlockClock::new(512, 32000.0);
		bc.stamp(0);
		bc.stamp(16);

		assert_eq!(bc.stamp(5032), 5032);
		assert_eq!(bc.wait_ms(5032), 16);
	}

	#[test]
	fn block_clock_across_overflow()
	{
		let mut bc = BlockClock::new(512, 32000.0);
		assert_eq!(bc.stamp(u32::MAX - 9), u32::MAX - 9);
		assert_eq!(bc.wait_ms(u32::MAX - 9), 16);
		assert_eq!(bc.stamp(6), 6);
	}
}
