//! Wire protocol for SwiftLink server/client communication.
//!
//! # Wire format
//!
//! ```text
//! FRAME:    [4 bytes: 0x04 0x03 0x05 0x02][body]
//! BODY:     deflate(payload)                       (no shared secret)
//!           [16 bytes: IV][aes-256-cbc(deflate(payload))]  (shared secret)
//! ```
//!
//! Frames carry no length field; the marker is the only delimiter. See
//! [`codec`] for encoding and [`FrameBuffer`] for reassembling frames out of
//! a byte stream.
//!
//! Payloads are UTF-8 text: either a control [`Command`]
//! (`SWIFTCMD-<type>|<message>`) or a [`TransferToken`] (`TAG^^field^^…`).

pub mod codec;
pub mod command;
pub mod frame;
pub mod id;
pub mod key;
pub mod token;

pub use codec::{CodecError, decode, decode_frame, encode};
pub use command::{Command, CommandType};
pub use frame::FrameBuffer;
pub use id::{IdError, generate_id, generate_unique_id};
pub use key::SharedKey;
pub use token::{TransferToken, decode_chunk};

/// Frame marker prepended to every encoded packet.
pub const FRAME_MARKER: [u8; 4] = [0x04, 0x03, 0x05, 0x02];

/// AES-CBC initialization vector length.
pub const IV_LEN: usize = 16;

/// Upper bound on a single decompressed payload (16 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Upper bound on bytes held by a [`FrameBuffer`] waiting for a frame to
/// complete (64 MiB).
pub const MAX_BUFFERED_BYTES: usize = 64 * 1024 * 1024;
