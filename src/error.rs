// vim: noet

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError
{
	#[error("cannot read config file {0}: {1}")]
	Read(PathBuf, #[source] std::io::Error),
	#[error("cannot parse config file {0}: {1}")]
	Parse(PathBuf, #[source] toml::de::Error),
}

#[derive(Debug, Error)]
pub enum CaptureError
{
	#[error("cannot open capture source {0}: {1}")]
	Open(String, #[source] std::io::Error),
	#[error("capture read failed: {0}")]
	Read(#[from] std::io::Error),
	#[error("channel {channel} is not available in a {channels} channel stream")]
	Channel { channel: usize, channels: usize },
}

#[derive(Debug, Error)]
pub enum SpectrumError
{
	#[error("FFT backend initialization failed: {0}")]
	Init(String),
	#[error("FFT execution failed: {0}")]
	Transform(String),
	#[error("block length {got} does not match the FFT length {expected}")]
	BlockLength { expected: usize, got: usize },
}

#[derive(Debug, Error)]
pub enum OutputError
{
	#[error("LED index {0} out of range")]
	LedIndex(usize),
	#[error("UDP output failed: {0}")]
	Io(#[from] std::io::Error),
}
