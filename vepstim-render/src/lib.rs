pub mod raster;
pub mod scene;
pub mod window;

pub use raster::{render_dot, render_grating, render_stimulus};
pub use scene::Scene;
pub use window::{next_refresh, WindowDisplay};
