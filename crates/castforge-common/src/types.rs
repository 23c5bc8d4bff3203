//! Core type definitions for conversion requests and task lifecycle.
//!
//! All enums serialize in lowercase, matching the values the upload form and
//! the status endpoints exchange with clients.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Requested media format of the produced output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    /// Segmented playlist with transport-stream segments.
    Hls,
    /// XML manifest with fragmented-MP4 segments.
    Dash,
    /// Plain re-encoded stream (used for live RTSP publishing).
    Raw,
}

impl MediaFormat {
    /// Whether this format can be delivered over the given protocol.
    ///
    /// Only three pairings exist: hls/hls, dash/dash and raw/rtsp.
    pub fn pairs_with(self, protocol: StreamingProtocol) -> bool {
        matches!(
            (self, protocol),
            (Self::Hls, StreamingProtocol::Hls)
                | (Self::Dash, StreamingProtocol::Dash)
                | (Self::Raw, StreamingProtocol::Rtsp)
        )
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hls => write!(f, "hls"),
            Self::Dash => write!(f, "dash"),
            Self::Raw => write!(f, "raw"),
        }
    }
}

impl FromStr for MediaFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hls" => Ok(Self::Hls),
            "dash" => Ok(Self::Dash),
            "raw" => Ok(Self::Raw),
            "" => Err(Error::invalid_spec("media format cannot be empty")),
            other => Err(Error::invalid_spec(format!("unknown media format: {other}"))),
        }
    }
}

/// Delivery protocol for the converted media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamingProtocol {
    /// HTTP Live Streaming.
    Hls,
    /// Dynamic Adaptive Streaming over HTTP.
    Dash,
    /// Continuously looping live feed published to an RTSP endpoint.
    Rtsp,
}

impl StreamingProtocol {
    /// Live protocols never finish on their own and are owned by the
    /// process supervisor.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Rtsp)
    }
}

impl fmt::Display for StreamingProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hls => write!(f, "hls"),
            Self::Dash => write!(f, "dash"),
            Self::Rtsp => write!(f, "rtsp"),
        }
    }
}

impl FromStr for StreamingProtocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hls" => Ok(Self::Hls),
            "dash" => Ok(Self::Dash),
            "rtsp" => Ok(Self::Rtsp),
            "" => Err(Error::invalid_spec("streaming protocol cannot be empty")),
            other => Err(Error::invalid_spec(format!(
                "unknown streaming protocol: {other}"
            ))),
        }
    }
}

/// Which HLS rendition set to encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Renditions {
    /// One rung: the first entry of the configured ladder.
    #[default]
    Single,
    /// Every configured rung, published behind a master playlist.
    Ladder,
}

/// Lifecycle state of a conversion task.
///
/// `Pending -> Processing -> {Completed, Failed}`; the terminal states are
/// final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created, waiting for a dispatch slot.
    Pending,
    /// Picked up by the dispatcher.
    Processing,
    /// Output produced (or live stream started).
    Completed,
    /// Conversion failed; the task carries an error.
    Failed,
}

impl TaskStatus {
    /// Whether no further transition is allowed.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `self -> next` is an edge of the task state machine.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_pairings() {
        assert!(MediaFormat::Hls.pairs_with(StreamingProtocol::Hls));
        assert!(MediaFormat::Dash.pairs_with(StreamingProtocol::Dash));
        assert!(MediaFormat::Raw.pairs_with(StreamingProtocol::Rtsp));

        assert!(!MediaFormat::Dash.pairs_with(StreamingProtocol::Rtsp));
        assert!(!MediaFormat::Hls.pairs_with(StreamingProtocol::Dash));
        assert!(!MediaFormat::Raw.pairs_with(StreamingProtocol::Hls));
    }

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!("HLS".parse::<MediaFormat>().unwrap(), MediaFormat::Hls);
        assert_eq!(" rtsp ".parse::<StreamingProtocol>().unwrap(), StreamingProtocol::Rtsp);
    }

    #[test]
    fn test_parse_rejects_unknown_and_empty() {
        let err = "webm".parse::<MediaFormat>().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidSpec);
        assert!("".parse::<StreamingProtocol>().is_err());
    }

    #[test]
    fn test_state_machine_edges() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Processing));
        assert!(!Processing.can_transition_to(Pending));
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&TaskStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
        let parsed: Renditions = serde_json::from_str("\"ladder\"").unwrap();
        assert_eq!(parsed, Renditions::Ladder);
    }
}
