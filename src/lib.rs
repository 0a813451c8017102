// vim: noet

//! Beat synchronized LED waves: audio capture, beat detection and a wave renderer for WLED strips.

pub mod animation;
pub mod audio;
pub mod beat;
pub mod capture;
pub mod cli;
pub mod clock;
pub mod config;
pub mod controller;
pub mod envelope;
pub mod error;
pub mod handoff;
pub mod ring;
pub mod signal_processing;
pub mod telemetry;
pub mod udpproto;
