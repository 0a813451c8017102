// vim: noet

pub mod waveform;
pub mod waves;
pub mod renderer;
pub mod patterns;

/////////// Frame tables ////////////

/// LED indices lit by one animation frame. Negative entries are placeholders for "no LED".
pub type Frame = Vec<i32>;

/// Ordered frames of one animation, indexed by the wave engine's frame index.
pub type FrameTable = Vec<Frame>;

/////////// Helper Structs ////////////

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Color
{
	pub r: u8,
	pub g: u8,
	pub b: u8,
}

impl Color
{
	pub const BLACK: Color = Color{r: 0, g: 0, b: 0};

	pub fn new(r: u8, g: u8, b: u8) -> Color
	{
		Color{r, g, b}
	}

	/*
	 * HSV to RGB on the 16 bit hue circle (0 and 65536 are red) used by the NeoPixel family of
	 * LED drivers, so hues and sweeps behave identically on the host and on the strip firmware.
	 */
	pub fn from_hsv(hue: u16, sat: u8, val: u8) -> Color
	{
		let hue = ((hue as u32) * 1530 + 32768) / 65536;

		let (r, g, b): (u32, u32, u32) = if hue < 510 {
			// red to green
			if hue < 255 { (255, hue, 0) } else { (510 - hue, 255, 0) }
		} else if hue < 1020 {
			// green to blue
			if hue < 765 { (0, 255, hue - 510) } else { (0, 1020 - hue, 255) }
		} else if hue < 1530 {
			// blue to red
			if hue < 1275 { (hue - 1020, 0, 255) } else { (255, 0, 1530 - hue) }
		} else {
			(255, 0, 0)
		};

		let s1 = 1 + sat as u32;
		let s2 = 255 - sat as u32;
		let v1 = 1 + val as u32;

		let channel = |c: u32| -> u8 { (((((c * s1) >> 8) + s2) * v1) >> 8) as u8 };

		Color {
			r: channel(r),
			g: channel(g),
			b: channel(b),
		}
	}

	/// Multiply all components, saturating at full brightness.
	pub fn scale(&mut self, factor: f32)
	{
		let f = factor.max(0.0);
		let scale_component = |c: u8| -> u8 { (c as f32 * f).round().min(255.0) as u8 };

		self.r = scale_component(self.r);
		self.g = scale_component(self.g);
		self.b = scale_component(self.b);
	}

	pub fn is_black(&self) -> bool
	{
		*self == Color::BLACK
	}
}
