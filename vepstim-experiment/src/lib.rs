pub mod config;
pub mod display;
pub mod driver;
pub mod recorder;
pub mod session;
pub mod simulated;
pub mod trials;

pub use config::{ConfigError, DisplayConfig, ExperimentConfig, TrialOrder, TriggerConfig};
pub use display::{
    CancelFlag, CancellationSource, DisplayError, DisplaySurface, RefreshPredictionUnavailable,
};
pub use driver::{FrameLoopDriver, RoutineOutcome, Stage};
pub use recorder::{DataRecorder, ExperimentData};
pub use session::{open_trigger, Session, SessionError, SessionOutcome, SessionShutdown};
pub use simulated::{FlipRecord, SimulatedDisplay};
pub use trials::{Order, TrialIterator};
