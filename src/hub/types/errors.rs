use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessageLoadError {
    #[error("malformed control message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid value of C2SMessage.type: must be subscribe, unsubscribe or ping, got {0:?}")]
    BadType(String),
    #[error("{0} requires a non-empty formId")]
    MissingFormId(&'static str),
}

/// Reasons a client session stops. All of them are fatal to the session only.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("stream closed")]
    StreamClosed,
    #[error("outbound writer stopped")]
    WriterStopped,
    #[error("no liveness acknowledgment within {0:?}")]
    ReadTimeout(Duration),
    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),
    #[error("frame of {0} bytes exceeds the {1} bytes limit")]
    FrameTooLarge(usize, usize),
    #[error("transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Hub(#[from] HubError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum HubError {
    #[error("hub dispatcher is not running")]
    Closed,
    #[error("session limit of {0} reached")]
    SessionLimit(usize),
}

#[cfg(test)]
#[test]
fn error_display() {
    use MessageLoadError::*;
    assert_eq!(
        BadType("dance".into()).to_string(),
        "invalid value of C2SMessage.type: must be subscribe, unsubscribe or ping, got \"dance\""
    );
    assert_eq!(
        MissingFormId("subscribe").to_string(),
        "subscribe requires a non-empty formId"
    );
    assert_eq!(
        SessionError::FrameTooLarge(600, 512).to_string(),
        "frame of 600 bytes exceeds the 512 bytes limit"
    );
    assert_eq!(
        SessionError::ReadTimeout(Duration::from_secs(60)).to_string(),
        "no liveness acknowledgment within 60s"
    );
    assert_eq!(SessionError::WriterStopped.to_string(), "outbound writer stopped");
    assert_eq!(
        SessionError::from(HubError::SessionLimit(3)).to_string(),
        "session limit of 3 reached"
    );
}
