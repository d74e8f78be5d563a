use thiserror::Error;

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("trigger device {device} unavailable: {source}")]
    DeviceUnavailable {
        device: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write trigger code {code}: {source}")]
    Write {
        code: u8,
        #[source]
        source: std::io::Error,
    },

    #[error("trigger channel already closed")]
    Closed,
}
