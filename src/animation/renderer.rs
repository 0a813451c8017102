// vim: noet

use crate::animation::waveform::intensity;
use crate::animation::waves::Wave;
use crate::animation::{Color, Frame};

// frames dimmer than this are not worth touching
const MIN_INTENSITY: f32 = 0.005;

/// Draw one wave into `leds`.
///
/// Every frame of the table is lit with the wave's hue at full saturation, its value following
/// the wave's brightness profile. Later waves overwrite earlier ones on shared LEDs. LED indices
/// outside `leds` and negative placeholders are skipped.
pub fn render_wave(frames: &[Frame], wave: &Wave, brightness: i32, leds: &mut [Color])
{
	// intensity() takes (behind, ahead) in index direction; a reverse wave travels towards 0, so
	// its nose is the side behind it
	let (width_behind, width_ahead) = if wave.reverse {
		(wave.nose_width, wave.tail_width)
	} else {
		(wave.tail_width, wave.nose_width)
	};

	for (i, frame) in frames.iter().enumerate() {
		let level = intensity(i as f32, wave.center, width_behind, width_ahead);
		if level < MIN_INTENSITY {
			continue;
		}

		let value = (brightness as f32 * level).round().clamp(0.0, 255.0) as u8;
		let color = Color::from_hsv(wave.hue, 255, value);

		for &led in frame {
			if led < 0 {
				continue;
			}

			if let Some(slot) = leds.get_mut(led as usize) {
				*slot = color;
			}
		}
	}
}

/// Global post-processing: multiply the whole buffer by the beat pulse.
pub fn apply_pulse(leds: &mut [Color], pulse: f32)
{
	if (pulse - 1.0).abs() < 1e-4 {
		return;
	}

	for c in leds.iter_mut() {
		c.scale(pulse);
	}
}
