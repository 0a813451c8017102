// vim: noet

/*
 * Fixed capacity ring buffer (array + head + count). Pushing into a full buffer overwrites the
 * oldest entry. No allocation after construction.
 */

#[derive(Clone, Debug)]
pub struct RingBuffer<T: Copy + Default, const N: usize>
{
	buf: [T; N],
	head: usize, // next write position
	count: usize,
}

impl<T: Copy + Default, const N: usize> RingBuffer<T, N>
{
	pub fn new() -> Self
	{
		RingBuffer {
			buf: [T::default(); N],
			head: 0,
			count: 0,
		}
	}

	pub fn push(&mut self, value: T)
	{
		if N == 0 {
			return;
		}

		self.buf[self.head] = value;
		self.head = (self.head + 1) % N;
		if self.count < N {
			self.count += 1;
		}
	}

	pub fn len(&self) -> usize
	{
		self.count
	}

	pub fn is_empty(&self) -> bool
	{
		self.count == 0
	}

	pub fn is_full(&self) -> bool
	{
		self.count == N
	}

	pub fn clear(&mut self)
	{
		self.head = 0;
		self.count = 0;
	}

	/// Iterate from the oldest to the newest entry.
	pub fn iter(&self) -> impl Iterator<Item = T> + '_
	{
		let start = (self.head + N - self.count) % N.max(1);
		(0..self.count).map(move |i| self.buf[(start + i) % N])
	}

	pub fn newest(&self) -> Option<T>
	{
		if self.count == 0 {
			None
		} else {
			Some(self.buf[(self.head + N - 1) % N])
		}
	}
}

impl<T: Copy + Default, const N: usize> Default for RingBuffer<T, N>
{
	fn default() -> Self
	{
		RingBuffer::new()
	}
}

impl<const N: usize> RingBuffer<f32, N>
{
	/// Median of the stored values, `None` when empty. Even counts average the two middle
	/// values.
	pub fn median(&self) -> Option<f32>
	{
		if self.count == 0 {
			return None;
		}

		// insertion sort on a stack copy, N is tiny
		let mut sorted = [0.0f32; N];
		for (n, value) in self.iter().enumerate() {
			let mut j = n;
			while j > 0 && sorted[j - 1] > value {
				sorted[j] = sorted[j - 1];
				j -= 1;
			}
			sorted[j] = value;
		}

		let mid = self.count / 2;
		if self.count % 2 == 0 {
			Some(0.5 * (sorted[mid - 1] + sorted[mid]))
		} else {
			Some(sorted[mid])
		}
	}
}

#[cfg(test)]
mod tests
{
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn overwrites_oldest_when_full()
	{
		let mut ring: RingBuffer<u32, 3> = RingBuffer::new();
		for v in 1..=5 {
			ring.push(v);
		}
		assert!(ring.is_full());
		assert_eq!(ring.iter().collect::<Vec<_>>(), vec![3, 4, 5]);
		assert_eq!(ring.newest(), Some(5));
	}

	#[test]
	fn median_odd_and_even()
	{
		let mut ring: RingBuffer<f32, 6> = RingBuffer::new();
		assert_eq!(ring.median(), None);

		ring.push(500.0);
		ring.push(100.0);
		ring.push(900.0);
		assert_eq!(ring.median(), Some(500.0));

		ring.push(510.0);
		assert_eq!(ring.median(), Some(505.0));
	}

	#[test]
	fn median_rejects_single_outlier()
	{
		let mut ring: RingBuffer<f32, 6> = RingBuffer::new();
		for v in [500.0, 502.0, 1800.0, 498.0, 501.0] {
			ring.push(v);
		}
		assert_eq!(ring.median(), Some(501.0));
	}

	proptest! {
		#[test]
		fn median_within_bounds(values in proptest::collection::vec(0.0f32..5000.0, 1..20)) {
			let mut ring: RingBuffer<f32, 6> = RingBuffer::new();
			for v in &values {
				ring.push(*v);
			}
			let kept: Vec<f32> = ring.iter().collect();
			let lo = kept.iter().cloned().fold(f32::INFINITY, f32::min);
			let hi = kept.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
			let median = ring.median().unwrap();
			prop_assert!(median >= lo && median <= hi);
			prop_assert_eq!(ring.len(), values.len().min(6));
		}
	}
}
