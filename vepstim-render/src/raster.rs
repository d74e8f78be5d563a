use anyhow::{anyhow, Result};
use tiny_skia::{Color, FillRule, Paint, PathBuilder, Pixmap, PremultipliedColorU8, Transform};
use vepstim_core::StimulusKind;

/// Rasterizes a stimulus for a window `height_px` pixels tall. The returned
/// pixmap is meant to be centered on the window; pixels outside the stimulus
/// are transparent.
pub fn render_stimulus(kind: &StimulusKind, height_px: u32) -> Result<Pixmap> {
    match kind {
        StimulusKind::Grating {
            size,
            spatial_freq,
            phase,
            orientation,
            contrast,
        } => render_grating(
            (size.0 * height_px as f32, size.1 * height_px as f32),
            *spatial_freq / height_px as f32,
            *phase,
            *orientation,
            *contrast,
        ),
        StimulusKind::Fixation { size, color } => {
            render_dot(size * height_px as f32, *color)
        }
    }
}

/// Sinusoidal grating on a mid-gray mean. `cycles_per_px` along the grating
/// axis, `orientation` in degrees clockwise, `phase` in cycles.
pub fn render_grating(
    size_px: (f32, f32),
    cycles_per_px: f32,
    phase: f32,
    orientation: f32,
    contrast: f32,
) -> Result<Pixmap> {
    let (w, h) = size_px;
    if !(w >= 1.0 && h >= 1.0) {
        return Err(anyhow!("grating of {w}x{h} px is too small to draw"));
    }
    let theta = orientation.to_radians();
    let (sin, cos) = theta.sin_cos();

    // bounding box of the rotated rectangle
    let bw = (w * cos.abs() + h * sin.abs()).ceil().max(1.0) as u32;
    let bh = (w * sin.abs() + h * cos.abs()).ceil().max(1.0) as u32;
    let mut pm = Pixmap::new(bw, bh).ok_or_else(|| anyhow!("cannot allocate {bw}x{bh} pixmap"))?;

    let (cx, cy) = (bw as f32 * 0.5, bh as f32 * 0.5);
    let contrast = contrast.clamp(0.0, 1.0);
    let two_pi = std::f32::consts::TAU;
    let stride = bw as usize;
    let pixels = pm.pixels_mut();

    for y in 0..bh {
        for x in 0..bw {
            let dx = x as f32 + 0.5 - cx;
            let dy = y as f32 + 0.5 - cy;
            // rotate back into the grating's own frame
            let u = dx * cos + dy * sin;
            let v = -dx * sin + dy * cos;
            if u.abs() > w * 0.5 || v.abs() > h * 0.5 {
                continue;
            }
            let s = (two_pi * (cycles_per_px * u + phase)).sin();
            let level = ((1.0 + contrast * s) * 0.5 * 255.0).round().clamp(0.0, 255.0) as u8;
            if let Some(c) = PremultipliedColorU8::from_rgba(level, level, level, 255) {
                pixels[y as usize * stride + x as usize] = c;
            }
        }
    }
    Ok(pm)
}

/// Filled anti-aliased disc of `diameter_px`.
pub fn render_dot(diameter_px: f32, color: [u8; 4]) -> Result<Pixmap> {
    let d = diameter_px.max(1.0);
    let side = d.ceil() as u32 + 2;
    let mut pm = Pixmap::new(side, side).ok_or_else(|| anyhow!("cannot allocate dot pixmap"))?;

    let mut paint = Paint::default();
    paint.anti_alias = true;
    paint.set_color(Color::from_rgba8(color[0], color[1], color[2], color[3]));

    let c = side as f32 * 0.5;
    let mut pb = PathBuilder::new();
    pb.push_circle(c, c, d * 0.5);
    let path = pb.finish().ok_or_else(|| anyhow!("empty dot path"))?;
    pm.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
    Ok(pm)
}
