pub mod component;
pub mod routine;
pub mod stimulus;
pub mod trial;

pub use component::{ComponentSpec, FrameTime, StimulusComponent, Transition};
pub use routine::{Routine, RoutineSpec};
pub use stimulus::{Schedulable, Status, StimulusId, StimulusKind};
pub use trial::{ConditionValue, Conditions, TrialInfo};
