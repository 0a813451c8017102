// vim: noet

/*
 * Audio ingestion: raw interleaved capture bytes in, fixed size mono blocks out.
 *
 * The microphone delivers 32 bit words per channel slot (24 bit data left aligned), so the mono
 * signal is obtained by picking one slot per frame and shifting the padding bits out.
 */

use std::io::Read;

use byteorder::{ByteOrder, LittleEndian};

use crate::config;
use crate::error::CaptureError;

/// One block of mono samples, consumed by the spectral front-end in the same tick.
#[derive(Clone, Debug)]
pub struct AudioFrame
{
	pub samples: Vec<i32>,
	pub sample_rate: f32,
}

/// A non-blocking producer of raw capture bytes.
pub trait CaptureSource: Send
{
	/// Copy whatever is available into `buf`. `Ok(0)` means "not enough data yet".
	fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, CaptureError>;

	/// True once the source will never deliver data again.
	fn is_finished(&self) -> bool
	{
		false
	}
}

/// Capture from any byte stream, e.g. stdin fed by `arecord -f S32_LE -c 2`.
pub struct ReaderSource<R: Read + Send>
{
	reader: R,
	finished: bool,
}

impl<R: Read + Send> ReaderSource<R>
{
	pub fn new(reader: R) -> ReaderSource<R>
	{
		ReaderSource {
			reader,
			finished: false,
		}
	}
}

impl<R: Read + Send> CaptureSource for ReaderSource<R>
{
	fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, CaptureError>
	{
		if self.finished || buf.is_empty() {
			return Ok(0);
		}

		match self.reader.read(buf) {
			Ok(0) => {
				self.finished = true;
				Ok(0)
			},
			Ok(n) => Ok(n),
			Err(e) if e.kind() == std::io::ErrorKind::Interrupted
			       || e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
			Err(e) => Err(CaptureError::Read(e)),
		}
	}

	fn is_finished(&self) -> bool
	{
		self.finished
	}
}

/// Open the capture source named on the command line. `-` is stdin.
pub fn open_source(name: &str) -> Result<Box<dyn CaptureSource>, CaptureError>
{
	if name == "-" {
		return Ok(Box::new(ReaderSource::new(std::io::stdin())));
	}

	let file = std::fs::File::open(name)
		.map_err(|e| CaptureError::Open(name.to_string(), e))?;

	Ok(Box::new(ReaderSource::new(std::io::BufReader::new(file))))
}

/// Collects partial reads until a full block is available.
pub struct SampleAccumulator
{
	pending: Vec<u8>,
	scratch: Vec<u8>,

	block_len: usize,
	channels: usize,
	channel: usize,
	raw_shift: u32,
	sample_rate: f32,
}

impl SampleAccumulator
{
	pub fn new(block_len: usize, channels: usize, channel: usize, raw_shift: u32, sample_rate: f32) -> Result<SampleAccumulator, CaptureError>
	{
		if channels == 0 || channel >= channels {
			return Err(CaptureError::Channel { channel, channels });
		}

		let block_bytes = block_len * channels * config::CAPTURE_WORD_BYTES;

		Ok(SampleAccumulator {
			pending: Vec::with_capacity(2 * block_bytes),
			scratch: vec![0; block_bytes],
			block_len,
			channels,
			channel,
			raw_shift: raw_shift.min(31),
			sample_rate,
		})
	}

	pub fn block_bytes(&self) -> usize
	{
		self.block_len * self.channels * config::CAPTURE_WORD_BYTES
	}

	pub fn block_len(&self) -> usize
	{
		self.block_len
	}

	pub fn sample_rate(&self) -> f32
	{
		self.sample_rate
	}

	pub fn pending_bytes(&self) -> usize
	{
		self.pending.len()
	}

	pub fn push_bytes(&mut self, data: &[u8])
	{
		self.pending.extend_from_slice(data);
	}

	/// Poll the source once for at most the bytes missing to the next full block.
	pub fn fill_from(&mut self, source: &mut dyn CaptureSource) -> Result<usize, CaptureError>
	{
		let missing = self.block_bytes().saturating_sub(self.pending.len());
		if missing == 0 {
			return Ok(0);
		}

		let n = source.read_available(&mut self.scratch[..missing])?;
		self.pending.extend_from_slice(&self.scratch[..n]);

		Ok(n)
	}

	/// Extract the next full block, keeping any surplus bytes for later.
	pub fn next_frame(&mut self) -> Option<AudioFrame>
	{
		let block_bytes = self.block_bytes();
		if self.pending.len() < block_bytes {
			return None;
		}

		let frame_bytes = self.channels * config::CAPTURE_WORD_BYTES;
		let offset = self.channel * config::CAPTURE_WORD_BYTES;
		let shift = self.raw_shift;

		let samples = self.pending[..block_bytes]
			.chunks_exact(frame_bytes)
			.map(|slots| LittleEndian::read_i32(&slots[offset .. offset + config::CAPTURE_WORD_BYTES]) >> shift)
			.collect();

		self.pending.drain(..block_bytes);

		Some(AudioFrame {
			samples,
			sample_rate: self.sample_rate,
		})
	}
}

#[cfg(test)]
mod tests
{
	use super::*;

	fn interleave(left: &[i32], right: &[i32]) -> Vec<u8>
	{
		let mut out = Vec::new();
		for (l, r) in left.iter().zip(right.iter()) {
			out.extend_from_slice(&l.to_le_bytes());
			out.extend_from_slice(&r.to_le_bytes());
		}
		out
	}

	#[test]
	fn selects_channel_and_shifts()
	{
		let mut acc = SampleAccumulator::new(2, 2, 1, 8, 32000.0).unwrap();
		acc.push_bytes(&interleave(&[0x100, 0x200], &[0x1200, -0x400]));

		let frame = acc.next_frame().unwrap();
		assert_eq!(frame.samples, vec![0x12, -0x4]);
		assert_eq!(acc.pending_bytes(), 0);
	}

	#[test]
	fn partial_reads_are_retained()
	{
		let mut acc = SampleAccumulator::new(2, 2, 0, 0, 32000.0).unwrap();
		let bytes = interleave(&[1, 2, 3], &[0, 0, 0]);

		acc.push_bytes(&bytes[..10]);
		assert!(acc.next_frame().is_none());

		acc.push_bytes(&bytes[10..]);
		assert_eq!(acc.next_frame().unwrap().samples, vec![1, 2]);
		assert_eq!(acc.pending_bytes(), 8);
		assert!(acc.next_frame().is_none());
	}

	#[test]
	fn fill_from_reader_stops_at_block_boundary()
	{
		let bytes = interleave(&[5, 6, 7, 8], &[0, 0, 0, 0]);
		let mut source = ReaderSource::new(std::io::Cursor::new(bytes));
		let mut acc = SampleAccumulator::new(2, 2, 0, 0, 32000.0).unwrap();

		while acc.next_frame().map(|f| assert_eq!(f.samples, vec![5, 6])).is_none() {
			acc.fill_from(&mut source).unwrap();
		}

		acc.fill_from(&mut source).unwrap();
		assert_eq!(acc.next_frame().unwrap().samples, vec![7, 8]);

		acc.fill_from(&mut source).unwrap();
		assert!(source.is_finished());
	}

	#[test]
	fn rejects_missing_channel()
	{
		assert!(SampleAccumulator::new(16, 2, 2, 8, 32000.0).is_err());
	}
}
