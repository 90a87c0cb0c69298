//! Transfer tokens exchanged between two transfer jobs.
//!
//! Tokens are UTF-8 text: a four-letter tag followed by `^^`-separated
//! fields.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Separator between token fields.
pub const FIELD_SEPARATOR: &str = "^^";

pub const TAG_HEADER: &str = "SWHD";
pub const TAG_DATA: &str = "SWFD";
pub const TAG_ACK: &str = "SWAK";
pub const TAG_DONE: &str = "SWDD";
pub const TAG_QUEUE_BEGIN: &str = "SWQS";
pub const TAG_QUEUE_END: &str = "SWQE";

/// A parsed transfer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferToken {
    /// Announces a file: relative destination path, job ID and byte length.
    Header { path: String, id: String, length: u64 },
    /// One base64-encoded chunk of file content.
    Data { id: String, chunk: String },
    /// Acknowledges the last chunk.
    Ack { id: String },
    /// End of file, carrying the number of chunks sent.
    Done { id: String, chunks: u64 },
    /// The peer paused the job.
    QueueBegin { id: String },
    /// The peer resumed the job.
    QueueEnd { id: String },
}

impl TransferToken {
    /// Builds a data token from raw chunk bytes.
    pub fn data(id: impl Into<String>, bytes: &[u8]) -> Self {
        Self::Data {
            id: id.into(),
            chunk: STANDARD.encode(bytes),
        }
    }

    /// Parses a token. Wrong field counts, unknown tags and non-numeric
    /// number fields yield `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let fields: Vec<&str> = text.trim().split(FIELD_SEPARATOR).collect();
        let id = |i: usize| fields[i].trim().to_string();

        let token = match (fields[0], fields.len()) {
            (TAG_HEADER, 4) => Self::Header {
                path: fields[1].to_string(),
                id: id(2),
                length: fields[3].trim().parse().ok()?,
            },
            (TAG_DATA, 3) => Self::Data {
                id: id(1),
                chunk: fields[2].to_string(),
            },
            (TAG_ACK, 2) => Self::Ack { id: id(1) },
            (TAG_DONE, 3) => Self::Done {
                id: id(1),
                chunks: fields[2].trim().parse().ok()?,
            },
            (TAG_QUEUE_BEGIN, 2) => Self::QueueBegin { id: id(1) },
            (TAG_QUEUE_END, 2) => Self::QueueEnd { id: id(1) },
            _ => return None,
        };
        Some(token)
    }

    /// The job ID the token is addressed to.
    pub fn id(&self) -> &str {
        match self {
            Self::Header { id, .. }
            | Self::Data { id, .. }
            | Self::Ack { id }
            | Self::Done { id, .. }
            | Self::QueueBegin { id }
            | Self::QueueEnd { id } => id,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Header { .. } => TAG_HEADER,
            Self::Data { .. } => TAG_DATA,
            Self::Ack { .. } => TAG_ACK,
            Self::Done { .. } => TAG_DONE,
            Self::QueueBegin { .. } => TAG_QUEUE_BEGIN,
            Self::QueueEnd { .. } => TAG_QUEUE_END,
        }
    }
}

/// Decodes the base64 payload of a data token.
pub fn decode_chunk(chunk: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(chunk.trim())
}

impl fmt::Display for TransferToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = FIELD_SEPARATOR;
        let tag = self.tag();
        match self {
            Self::Header { path, id, length } => write!(f, "{tag}{sep}{path}{sep}{id}{sep}{length}"),
            Self::Data { id, chunk } => write!(f, "{tag}{sep}{id}{sep}{chunk}"),
            Self::Done { id, chunks } => write!(f, "{tag}{sep}{id}{sep}{chunks}"),
            Self::Ack { id } | Self::QueueBegin { id } | Self::QueueEnd { id } => {
                write!(f, "{tag}{sep}{id}")
            }
        }
    }
}
