//! Session descriptions exchanged during WHIP negotiation.
//!
//! Descriptions are carried as raw SDP text. The text is only parsed to
//! validate it; rewrites (see [`codec_filter`]) operate line by line so that
//! everything they do not touch stays byte-identical.

pub mod codec_filter;

use std::fmt;
use std::io::Cursor;

use thiserror::Error;

pub use codec_filter::force_codecs;

/// Errors raised while handling SDP text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SdpError {
    #[error("empty session description")]
    Empty,

    #[error("unknown SDP type: {0}")]
    UnknownType(String),

    #[error("failed to parse session description: {0}")]
    Parse(String),
}

/// Role of a description in the offer/answer exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpType {
    Offer,
    PrAnswer,
    Answer,
    Rollback,
}

impl SdpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::PrAnswer => "pranswer",
            SdpType::Answer => "answer",
            SdpType::Rollback => "rollback",
        }
    }
}

impl std::str::FromStr for SdpType {
    type Err = SdpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offer" => Ok(SdpType::Offer),
            "pranswer" => Ok(SdpType::PrAnswer),
            "answer" => Ok(SdpType::Answer),
            "rollback" => Ok(SdpType::Rollback),
            other => Err(SdpError::UnknownType(other.to_string())),
        }
    }
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed SDP document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    /// Wrap text without validating it (locally generated descriptions)
    pub fn new(sdp_type: SdpType, sdp: impl Into<String>) -> Self {
        Self {
            sdp_type,
            sdp: sdp.into(),
        }
    }

    /// Parse an offer received from a remote party.
    pub fn offer(sdp: impl Into<String>) -> Result<Self, SdpError> {
        Self::parse(SdpType::Offer, sdp.into())
    }

    /// Parse an answer, e.g. the body of a WHIP POST response.
    pub fn answer(sdp: impl Into<String>) -> Result<Self, SdpError> {
        Self::parse(SdpType::Answer, sdp.into())
    }

    fn parse(sdp_type: SdpType, sdp: String) -> Result<Self, SdpError> {
        if sdp.trim().is_empty() {
            return Err(SdpError::Empty);
        }

        let mut reader = Cursor::new(sdp.as_bytes());
        webrtc::sdp::SessionDescription::unmarshal(&mut reader)
            .map_err(|e| SdpError::Parse(e.to_string()))?;

        Ok(Self { sdp_type, sdp })
    }

    /// Number of `m=` sections in the description
    pub fn media_count(&self) -> usize {
        self.sdp.lines().filter(|l| l.starts_with("m=")).count()
    }
}

impl fmt::Display for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sdp)
    }
}
