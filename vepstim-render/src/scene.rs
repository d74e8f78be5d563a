use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tiny_skia::{Color, Pixmap, PixmapPaint, Transform};
use vepstim_core::{StimulusId, StimulusKind};

/// Rasterized stimuli, shared between components that look identical.
struct StimulusCache {
    height_px: u32,
    entries: Vec<(StimulusKind, Arc<Pixmap>)>,
}

impl StimulusCache {
    fn new(height_px: u32) -> Self {
        Self {
            height_px,
            entries: Vec::new(),
        }
    }

    fn get_or_render(&mut self, kind: &StimulusKind) -> Result<Arc<Pixmap>> {
        if let Some((_, pm)) = self.entries.iter().find(|(k, _)| k == kind) {
            return Ok(Arc::clone(pm));
        }
        let pm = Arc::new(crate::raster::render_stimulus(kind, self.height_px)?);
        self.entries.push((kind.clone(), Arc::clone(&pm)));
        Ok(pm)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Off-screen canvas holding every registered stimulus; composes the drawn
/// subset over the background, in registration order.
pub struct Scene {
    canvas: Pixmap,
    background: Color,
    cache: StimulusCache,
    layers: Vec<Arc<Pixmap>>,
    drawn: BTreeSet<StimulusId>,
}

impl Scene {
    pub fn new(width: u32, height: u32, background: [u8; 4]) -> Result<Self> {
        let canvas = Pixmap::new(width, height)
            .ok_or_else(|| anyhow!("cannot allocate {width}x{height} canvas"))?;
        let [r, g, b, _] = background;
        let mut scene = Self {
            canvas,
            // the canvas stays opaque so it can be copied to the surface as is
            background: Color::from_rgba8(r, g, b, 255),
            cache: StimulusCache::new(height),
            layers: Vec::new(),
            drawn: BTreeSet::new(),
        };
        scene.compose();
        Ok(scene)
    }

    pub fn width(&self) -> u32 {
        self.canvas.width()
    }

    pub fn height(&self) -> u32 {
        self.canvas.height()
    }

    pub fn add(&mut self, kind: &StimulusKind) -> Result<StimulusId> {
        let pm = self.cache.get_or_render(kind)?;
        self.layers.push(pm);
        Ok(StimulusId(self.layers.len() - 1))
    }

    /// Distinct rasters held; equal stimuli share one.
    pub fn cached_rasters(&self) -> usize {
        self.cache.len()
    }

    pub fn set_drawn(&mut self, id: StimulusId, drawn: bool) {
        if id.0 >= self.layers.len() {
            return;
        }
        if drawn {
            self.drawn.insert(id);
        } else {
            self.drawn.remove(&id);
        }
    }

    pub fn is_drawn(&self, id: StimulusId) -> bool {
        self.drawn.contains(&id)
    }

    pub fn compose(&mut self) {
        self.canvas.fill(self.background);
        let (cw, ch) = (self.canvas.width() as f32, self.canvas.height() as f32);
        for id in &self.drawn {
            let layer: &Pixmap = &self.layers[id.0];
            let x = ((cw - layer.width() as f32) * 0.5).floor() as i32;
            let y = ((ch - layer.height() as f32) * 0.5).floor() as i32;
            self.canvas.draw_pixmap(
                x,
                y,
                layer.as_ref(),
                &PixmapPaint::default(),
                Transform::identity(),
                None,
            );
        }
    }

    /// RGBA bytes of the last composed frame.
    pub fn data(&self) -> &[u8] {
        self.canvas.data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn center(scene: &Scene) -> [u8; 4] {
        let i = ((scene.height() / 2 * scene.width() + scene.width() / 2) * 4) as usize;
        scene.data()[i..i + 4].try_into().unwrap()
    }

    #[test]
    fn blank_scene_is_background() {
        let scene = Scene::new(64, 48, [128, 128, 128, 255]).unwrap();
        assert!(scene.data().chunks(4).all(|p| p == [128, 128, 128, 255]));
    }

    #[test]
    fn fixation_is_drawn_over_grating() {
        let mut scene = Scene::new(1024, 768, [128, 128, 128, 255]).unwrap();
        let grating = scene.add(&StimulusKind::grating(0.0)).unwrap();
        let dot = scene.add(&StimulusKind::fixation()).unwrap();
        scene.set_drawn(grating, true);
        scene.set_drawn(dot, true);
        scene.compose();
        assert_eq!(center(&scene), [255, 0, 0, 255]);

        scene.set_drawn(dot, false);
        scene.compose();
        let c = center(&scene);
        assert_eq!(c[0], c[1]);
        assert_eq!(c[3], 255);
    }

    #[test]
    fn identical_stimuli_share_a_raster() {
        let mut scene = Scene::new(64, 48, [0, 0, 0, 255]).unwrap();
        let a = scene.add(&StimulusKind::fixation()).unwrap();
        let b = scene.add(&StimulusKind::fixation()).unwrap();
        scene.add(&StimulusKind::grating(0.5)).unwrap();
        assert_ne!(a, b);
        assert_eq!(scene.cached_rasters(), 2);
    }

    #[test]
    fn unknown_id_is_ignored() {
        let mut scene = Scene::new(8, 8, [0, 0, 0, 255]).unwrap();
        scene.set_drawn(StimulusId(3), true);
        assert!(!scene.is_drawn(StimulusId(3)));
    }
}
