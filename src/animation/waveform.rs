// vim: noet

const MIN_WIDTH: f32 = 1e-4;

/// Brightness of a wave at `frame_index`, in [0, 1].
///
/// Frames behind the center fall off over `width_behind`, frames ahead of it over `width_ahead`.
/// The falloff is a smoothstep, so the edges have zero slope and show no visible seam.
pub fn intensity(frame_index: f32, center: f32, width_behind: f32, width_ahead: f32) -> f32
{
	let d = frame_index - center;
	let w = if d < 0.0 { width_behind } else { width_ahead };

	// also catches NaN widths
	if !(w > MIN_WIDTH) {
		return 0.0;
	}

	let x = d.abs() / w;
	if !(x < 1.0) {
		return 0.0;
	}

	let t = 1.0 - x;
	t * t * (3.0 - 2.0 * t)
}
