// vim: noet

use std::net::UdpSocket;
use std::net::SocketAddrV4;
use std::net::Ipv4Addr;

use crate::animation::Color;
use crate::error::OutputError;

const HEADER_LEN: usize = 2;
const TIMEOUT_SEC: u8 = 3;
const WLED_MODE_DRGB: u8 = 2;

/// Builds WLED realtime packets, one RGB triple per LED.
pub struct Packet
{
	data: Vec<u8>,
}

impl Packet
{
	pub fn new(num_leds_total: usize) -> Packet
	{
		let mut data = vec![0; HEADER_LEN + 3*num_leds_total];

		data[0] = WLED_MODE_DRGB;
		data[1] = TIMEOUT_SEC;

		Packet { data }
	}

	pub fn set_color(&mut self, led: usize, color: Color) -> Result<(), OutputError>
	{
		let offset = HEADER_LEN + 3*led;
		if offset + 3 > self.data.len() {
			return Err(OutputError::LedIndex(led));
		}

		self.data[offset + 0] = color.r;
		self.data[offset + 1] = color.g;
		self.data[offset + 2] = color.b;

		Ok(())
	}

	pub fn set_all(&mut self, leds: &[Color]) -> Result<(), OutputError>
	{
		for (i, c) in leds.iter().enumerate() {
			self.set_color(i, *c)?;
		}
		Ok(())
	}

	pub fn as_bytes(&self) -> &[u8]
	{
		&self.data
	}
}

pub struct UdpProto
{
	socket: UdpSocket,
	packet: Packet,
}

impl UdpProto
{
	pub fn new(target_address: &str, num_leds_total: usize) -> Result<UdpProto, OutputError>
	{
		let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))?;
		socket.connect(target_address)?;

		Ok(UdpProto {
			socket,
			packet: Packet::new(num_leds_total),
		})
	}

	pub fn set_color(&mut self, led: usize, color: Color) -> Result<(), OutputError>
	{
		self.packet.set_color(led, color)
	}

	pub fn set_all(&mut self, leds: &[Color]) -> Result<(), OutputError>
	{
		self.packet.set_all(leds)
	}

	pub fn commit(&mut self) -> Result<(), OutputError>
	{
		self.socket.send(self.packet.as_bytes())?;
		Ok(())
	}
}
