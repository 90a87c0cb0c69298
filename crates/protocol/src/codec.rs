//! Packet codec: deflate → optional AES-256-CBC → frame marker.
//!
//! Pure functions, no I/O. Decoding never panics on malformed input;
//! [`decode`] drops bad segments and [`decode_frame`] reports why.

use std::io::Write;

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use flate2::write::DeflateEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use rand::RngCore;
use tracing::debug;

use crate::key::SharedKey;
use crate::{FRAME_MARKER, IV_LEN, MAX_PAYLOAD_SIZE};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES block size.
const BLOCK_LEN: usize = 16;

/// Errors produced while encoding or decoding a single frame.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("deflate failed: {0}")]
    Deflate(#[from] std::io::Error),

    #[error("inflate failed: {0}")]
    Inflate(String),

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("decryption failed: {0}")]
    Decrypt(String),

    #[error("frame too short: {0} bytes")]
    TooShort(usize),

    #[error("payload exceeds {MAX_PAYLOAD_SIZE} bytes")]
    TooLarge,
}

/// Encodes `payload` into one wire frame.
pub fn encode(payload: &[u8], key: Option<&SharedKey>) -> Result<Vec<u8>, CodecError> {
    let compressed = deflate(payload)?;
    let body = match key {
        Some(key) => encrypt(&compressed, key)?,
        None => compressed,
    };

    let mut frame = Vec::with_capacity(FRAME_MARKER.len() + body.len());
    frame.extend_from_slice(&FRAME_MARKER);
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decodes every frame in `buffer`, in order.
///
/// Segments are independent: a corrupt one is dropped without affecting its
/// siblings. Bytes before the first marker are ignored.
pub fn decode(buffer: &[u8], key: Option<&SharedKey>) -> Vec<Vec<u8>> {
    split_frames(buffer)
        .into_iter()
        .filter(|segment| !segment.is_empty())
        .filter_map(|segment| match decode_frame(segment, key) {
            Ok(payload) => Some(payload),
            Err(e) => {
                debug!(len = segment.len(), "dropping undecodable frame: {e}");
                None
            }
        })
        .collect()
}

/// Decodes a single frame body (the bytes between two markers).
pub fn decode_frame(segment: &[u8], key: Option<&SharedKey>) -> Result<Vec<u8>, CodecError> {
    match key {
        Some(key) => {
            let compressed = decrypt(segment, key)?;
            inflate(&compressed)
        }
        None => inflate(segment),
    }
}

/// Splits `buffer` on every marker occurrence.
///
/// The segment before the first marker is discarded; the returned segments
/// exclude the markers themselves and may be empty.
pub fn split_frames(buffer: &[u8]) -> Vec<&[u8]> {
    let mut segments = Vec::new();
    let Some(mut start) = find_marker(buffer, 0) else {
        return segments;
    };
    start += FRAME_MARKER.len();

    while let Some(next) = find_marker(buffer, start) {
        segments.push(&buffer[start..next]);
        start = next + FRAME_MARKER.len();
    }
    segments.push(&buffer[start..]);
    segments
}

/// Returns the index of the first marker at or after `from`.
pub(crate) fn find_marker(buffer: &[u8], from: usize) -> Option<usize> {
    if from >= buffer.len() {
        return None;
    }
    buffer[from..]
        .windows(FRAME_MARKER.len())
        .position(|w| w == FRAME_MARKER)
        .map(|pos| pos + from)
}

// ---------------------------------------------------------------------------
// Compression
// ---------------------------------------------------------------------------

fn deflate(payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = DeflateEncoder::new(
        Vec::with_capacity(payload.len() / 2 + 16),
        Compression::default(),
    );
    encoder.write_all(payload)?;
    Ok(encoder.finish()?)
}

/// Inflates a complete raw deflate stream.
///
/// A stream that ends before its final block is an error, which is what lets
/// [`FrameBuffer`](crate::FrameBuffer) tell a partial frame from a whole one.
fn inflate(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut inflater = Decompress::new(false);
    let mut out = Vec::with_capacity(data.len().saturating_mul(2).clamp(64, MAX_PAYLOAD_SIZE));

    loop {
        let consumed = inflater.total_in() as usize;
        let status = inflater
            .decompress_vec(&data[consumed..], &mut out, FlushDecompress::None)
            .map_err(|e| CodecError::Inflate(e.to_string()))?;

        match status {
            Status::StreamEnd if inflater.total_in() as usize == data.len() => return Ok(out),
            Status::StreamEnd => {
                return Err(CodecError::Inflate("trailing bytes after deflate stream".into()));
            }
            Status::Ok | Status::BufError => {
                if out.len() < out.capacity() {
                    // Output space left over means the input ran out first.
                    return Err(CodecError::Inflate("truncated deflate stream".into()));
                }
                if out.len() >= MAX_PAYLOAD_SIZE {
                    return Err(CodecError::TooLarge);
                }
                let grow = out.capacity().min(MAX_PAYLOAD_SIZE - out.len());
                out.reserve_exact(grow);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Encryption
// ---------------------------------------------------------------------------

fn encrypt(plaintext: &[u8], key: &SharedKey) -> Result<Vec<u8>, CodecError> {
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng()
        .try_fill_bytes(&mut iv)
        .map_err(|e| CodecError::Encrypt(e.to_string()))?;

    let cipher = Aes256CbcEnc::new_from_slices(key.as_bytes(), &iv)
        .map_err(|e| CodecError::Encrypt(e.to_string()))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn decrypt(body: &[u8], key: &SharedKey) -> Result<Vec<u8>, CodecError> {
    if body.len() < IV_LEN + BLOCK_LEN {
        return Err(CodecError::TooShort(body.len()));
    }
    let (iv, ciphertext) = body.split_at(IV_LEN);
    if ciphertext.len() % BLOCK_LEN != 0 {
        return Err(CodecError::Decrypt(format!(
            "ciphertext length {} is not a multiple of {BLOCK_LEN}",
            ciphertext.len()
        )));
    }

    let cipher = Aes256CbcDec::new_from_slices(key.as_bytes(), iv)
        .map_err(|e| CodecError::Decrypt(e.to_string()))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CodecError::Decrypt("bad padding".into()))
}
