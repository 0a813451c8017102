// vim: noet

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config;
use crate::signal_processing::Window;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum WindowArg
{
	Hann,
	Hamming,
}

impl From<WindowArg> for Window
{
	fn from(w: WindowArg) -> Window
	{
		match w {
			WindowArg::Hann    => Window::Hann,
			WindowArg::Hamming => Window::Hamming,
		}
	}
}

#[derive(Parser, Debug)]
#[command(name = "beatlight", about = "Beat synchronized LED wave controller")]
pub struct Cli
{
	/// Raw capture stream (interleaved little endian 32 bit words), "-" for stdin
	#[arg(default_value = "-")]
	pub input: String,

	/// TOML file with runtime tunables, reloaded when it changes
	#[arg(short, long)]
	pub config: Option<PathBuf>,

	/// WLED realtime UDP target
	#[arg(short, long, default_value = config::UDP_SERVER_ADDR)]
	pub target: String,

	/// Render without sending UDP packets
	#[arg(long)]
	pub dry_run: bool,

	/// Capture slot holding the microphone
	#[arg(long, default_value_t = 0)]
	pub channel: usize,

	/// Channel slots per capture frame
	#[arg(long, default_value_t = config::CAPTURE_CHANNELS)]
	pub channels: usize,

	/// Right shift applied to every raw capture word
	#[arg(long, default_value_t = config::CAPTURE_RAW_SHIFT)]
	pub raw_shift: u32,

	/// Capture sample rate in Hz
	#[arg(long, default_value_t = config::SAMP_RATE)]
	pub sample_rate: f32,

	/// Ignore the capture source and generate random beats
	#[arg(long)]
	pub synthetic: bool,

	/// Analysis window
	#[arg(long, value_enum, default_value_t = WindowArg::Hamming)]
	pub window: WindowArg,

	/// Seconds between status log lines, 0 disables
	#[arg(long, default_value_t = 5)]
	pub status_interval: u64,

	/// Print the rendered strip as colored blocks
	#[arg(long)]
	pub preview: bool,
}
