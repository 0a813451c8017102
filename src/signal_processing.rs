// vim: noet

/*
 * Spectral front-end: one mono block in, bass energy and spectral flux out.
 */

use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::error::SpectrumError;

// 24 bit samples in a 32 bit container
const FULL_SCALE: f32 = 8388608.0;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Window
{
	Hann,
	Hamming,
}

impl Window
{
	fn coefficients(self, block_size: usize) -> Vec<f32>
	{
		let n = block_size as f32;

		(0..block_size)
			.map(|i| {
				let i = i as f32;
				match self {
					Window::Hann    => (PI * i / n).sin().powi(2),
					Window::Hamming => 0.54 - 0.46 * (2.0 * PI * i / (n - 1.0).max(1.0)).cos(),
				}
			})
			.collect()
	}
}

/// Turns a windowed real block into `block_len/2 + 1` magnitudes.
///
/// Backends are created on the thread that runs the front-end and never leave it.
pub trait SpectrumBackend
{
	fn magnitudes(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), SpectrumError>;
}

pub type BackendFactory = fn(usize) -> Result<Box<dyn SpectrumBackend>, SpectrumError>;

pub struct RustFftBackend
{
	fft: Arc<dyn Fft<f32>>,
	buffer: Vec<Complex<f32>>,
	scratch: Vec<Complex<f32>>,
}

impl RustFftBackend
{
	pub fn new(block_size: usize) -> Result<RustFftBackend, SpectrumError>
	{
		if block_size < 4 || !block_size.is_power_of_two() {
			return Err(SpectrumError::Init(format!("block size {} is not a power of two >= 4", block_size)));
		}

		let fft = FftPlanner::<f32>::new().plan_fft_forward(block_size);
		let scratch_len = fft.get_inplace_scratch_len();

		Ok(RustFftBackend {
			fft,
			buffer: vec![Complex::new(0.0, 0.0); block_size],
			scratch: vec![Complex::new(0.0, 0.0); scratch_len],
		})
	}
}

impl SpectrumBackend for RustFftBackend
{
	fn magnitudes(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), SpectrumError>
	{
		if input.len() != self.buffer.len() {
			return Err(SpectrumError::BlockLength { expected: self.buffer.len(), got: input.len() });
		}

		self.buffer.iter_mut()
		           .zip(input.iter())
		           .for_each(|(c, &s)| *c = Complex::new(s, 0.0));

		self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

		output.iter_mut()
		      .zip(self.buffer.iter())
		      .for_each(|(m, c)| *m = c.norm());

		Ok(())
	}
}

#[cfg(feature = "fftw")]
pub struct FftwBackend
{
	fft_input: fftw::array::AlignedVec<f32>,
	fft_output: fftw::array::AlignedVec<fftw::types::c32>,
	fft_plan: fftw::plan::R2CPlan32,
}

#[cfg(feature = "fftw")]
impl FftwBackend
{
	pub fn new(block_size: usize) -> Result<FftwBackend, SpectrumError>
	{
		use fftw::plan::R2CPlan;

		let plan = fftw::plan::R2CPlan32::aligned(&[block_size], fftw::types::Flag::MEASURE)
			.map_err(|e| SpectrumError::Init(format!("{:?}", e)))?;

		Ok(FftwBackend {
			fft_input:  fftw::array::AlignedVec::new(block_size),
			fft_output: fftw::array::AlignedVec::new(block_size/2 + 1),
			fft_plan:   plan,
		})
	}
}

#[cfg(feature = "fftw")]
impl SpectrumBackend for FftwBackend
{
	fn magnitudes(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), SpectrumError>
	{
		use fftw::plan::R2CPlan;

		if input.len() != self.fft_input.len() {
			return Err(SpectrumError::BlockLength { expected: self.fft_input.len(), got: input.len() });
		}

		self.fft_input.copy_from_slice(input);
		self.fft_plan.r2c(&mut self.fft_input, &mut self.fft_output)
			.map_err(|e| SpectrumError::Transform(format!("{:?}", e)))?;

		for (m, c) in output.iter_mut().zip(self.fft_output.iter()) {
			*m = c.norm();
		}

		Ok(())
	}
}

pub fn default_backend(block_size: usize) -> Result<Box<dyn SpectrumBackend>, SpectrumError>
{
	#[cfg(feature = "fftw")]
	{
		Ok(Box::new(FftwBackend::new(block_size)?))
	}

	#[cfg(not(feature = "fftw"))]
	{
		Ok(Box::new(RustFftBackend::new(block_size)?))
	}
}

/// Inclusive range of FFT bins summed for the bass band.
#[derive(Copy, Clone, Debug, Default, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BinRange
{
	pub min: usize,
	pub max: usize,
	pub width_hz: f32,
}

impl BinRange
{
	/// Map a frequency band onto bins. Bin 0 (DC) and bin N/2 (Nyquist) are never included.
	pub fn for_band(freq_min: f32, freq_max: f32, block_size: usize, samp_rate: f32) -> BinRange
	{
		let freq_to_idx = |freq: f32| (freq * block_size as f32 / samp_rate).round().max(0.0) as usize;

		let highest = (block_size / 2).saturating_sub(1).max(1);
		let min = freq_to_idx(freq_min).clamp(1, highest);
		let max = freq_to_idx(freq_max).clamp(min, highest);

		BinRange {
			min,
			max,
			width_hz: samp_rate / block_size as f32,
		}
	}

	pub fn len(&self) -> usize
	{
		self.max - self.min + 1
	}
}

/// Per-tick scalar outputs of the front-end.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SpectralSnapshot
{
	pub energy: f32,
	pub flux: f32,
	pub bins: BinRange,
	pub mic_mean: f32,
	pub mic_rms: f32,
	pub mic_peak: f32,
}

pub struct SignalProcessing
{
	samp_rate: f32,
	block_size: usize,

	fft_window: Vec<f32>,
	fft_input: Vec<f32>,
	fft_absolute: Vec<f32>,
	prev_absolute: Vec<f32>,

	backend: Option<Box<dyn SpectrumBackend>>,
	factory: BackendFactory,
	init_failures: u32,

	bins: BinRange,
}

impl SignalProcessing
{
	pub fn new(block_size: usize, samp_rate: f32, band: (f32, f32), window: Window) -> SignalProcessing
	{
		SignalProcessing::with_backend_factory(block_size, samp_rate, band, window, default_backend)
	}

	pub fn with_backend_factory(block_size: usize, samp_rate: f32, band: (f32, f32), window: Window, factory: BackendFactory) -> SignalProcessing
	{
		let freq_domain_size = block_size/2 + 1;

		let mut s = SignalProcessing {
			samp_rate,
			block_size,
			fft_window: window.coefficients(block_size),
			fft_input: vec![0.0; block_size],
			fft_absolute: vec![0.0; freq_domain_size],
			prev_absolute: vec![0.0; freq_domain_size],
			backend: None,
			factory,
			init_failures: 0,
			bins: BinRange::for_band(band.0, band.1, block_size, samp_rate),
		};

		s.ensure_backend();
		s
	}

	/// Try to (re-)create the FFT backend. Returns whether it is available.
	fn ensure_backend(&mut self) -> bool
	{
		if self.backend.is_some() {
			return true;
		}

		match (self.factory)(self.block_size) {
			Ok(backend) => {
				if self.init_failures > 0 {
					log::info!("FFT backend ready after {} failed attempts", self.init_failures);
				}
				self.backend = Some(backend);
				true
			},
			Err(e) => {
				if self.init_failures == 0 {
					log::warn!("{}; retrying on every audio tick", e);
				}
				self.init_failures = self.init_failures.saturating_add(1);
				false
			},
		}
	}

	pub fn is_ready(&self) -> bool
	{
		self.backend.is_some()
	}

	pub fn bin_range(&self) -> BinRange
	{
		self.bins
	}

	pub fn samp_rate(&self) -> f32
	{
		self.samp_rate
	}

	pub fn block_size(&self) -> usize
	{
		self.block_size
	}

	/// Load a mono block, remove its DC offset and apply the window. Returns (mean, rms, peak)
	/// of the DC free signal in full-scale units.
	fn import_i32_mono(&mut self, data: &[i32]) -> Result<(f32, f32, f32), SpectrumError>
	{
		if data.len() != self.block_size {
			return Err(SpectrumError::BlockLength { expected: self.block_size, got: data.len() });
		}

		let mean = data.iter().map(|&s| s as f64).sum::<f64>() / data.len().max(1) as f64;

		let mut sum_sq = 0.0f32;
		let mut peak = 0.0f32;

		for ((t, &s), w) in self.fft_input.iter_mut().zip(data.iter()).zip(self.fft_window.iter()) {
			let x = ((s as f64 - mean) as f32) / FULL_SCALE;
			sum_sq += x * x;
			peak = peak.max(x.abs());
			*t = x * w;
		}

		let rms = (sum_sq / self.block_size.max(1) as f32).sqrt();

		Ok(((mean as f32) / FULL_SCALE, rms, peak))
	}

	/// Run one front-end tick.
	///
	/// `Ok(None)` means the FFT backend is not available yet; the tick is skipped and the
	/// backend creation is retried on the next call.
	pub fn process(&mut self, data: &[i32]) -> Result<Option<SpectralSnapshot>, SpectrumError>
	{
		if !self.ensure_backend() {
			return Ok(None);
		}

		let (mic_mean, mic_rms, mic_peak) = self.import_i32_mono(data)?;

		if let Some(backend) = self.backend.as_mut() {
			backend.magnitudes(&self.fft_input, &mut self.fft_absolute)?;
		}

		let range = self.bins.min ..= self.bins.max;

		let energy: f32 = self.fft_absolute[range.clone()].iter().sum();

		let flux: f32 = self.fft_absolute[range.clone()].iter()
			.zip(self.prev_absolute[range].iter())
			.map(|(cur, prev)| (cur - prev).max(0.0))
			.sum();

		self.prev_absolute.copy_from_slice(&self.fft_absolute);

		Ok(Some(SpectralSnapshot {
			energy,
			flux,
			bins: self.bins,
			mic_mean,
			mic_rms,
			mic_peak,
		}))
	}
}
