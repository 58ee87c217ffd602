use thiserror::Error;

/// Why an inbound event was rejected. None of these are fatal: the
/// dispatcher logs the error and drops the event, and the connection stays
/// in whatever state it was in.
#[derive(Debug, Error, PartialEq)]
pub enum EventError {
    #[error("malformed event: {0}")]
    Malformed(String),

    #[error("empty message text")]
    EmptyMessage,

    #[error("connection has not joined a room")]
    NotJoined,

    #[error("event references room {referenced:?} but connection is in {current:?}")]
    RoomMismatch { referenced: String, current: String },
}
