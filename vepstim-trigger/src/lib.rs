pub mod channel;
pub mod error;

pub use channel::{NullTrigger, RecordingTrigger, SentCode, SerialTrigger, TriggerChannel, TriggerLog};
pub use error::TriggerError;
