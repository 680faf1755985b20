//! Length-prefixed JSON frames.
//!
//! Each frame is a 4-byte big-endian length followed by one serde_json document.
//! The same framing carries envelopes out and raw values in.

use std::io;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Largest frame either side will accept. Payloads are opaque JSON and may
/// carry whole documents, so this sits well above the codec's 8 MiB default.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Frames larger than this are logged at info level.
const LARGE_FRAME_BYTES: usize = 100_000;

/// Typed view over [`framing`]: `T` goes out as JSON, `T` comes back from JSON.
pub struct JsonCodec<T> {
    frames: LengthDelimitedCodec,
    _item: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            frames: framing(),
            _item: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn framing() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_BYTES)
        .new_codec()
}

fn invalid_data(e: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

impl<T: DeserializeOwned> Decoder for JsonCodec<T> {
    type Item = T;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<T>> {
        self.frames
            .decode(src)?
            .map(|frame| serde_json::from_slice(&frame).map_err(invalid_data))
            .transpose()
    }
}

impl<T: Serialize> Encoder<T> for JsonCodec<T> {
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> io::Result<()> {
        let body = Bytes::from(serde_json::to_vec(&item).map_err(invalid_data)?);
        if body.len() > LARGE_FRAME_BYTES {
            tracing::info!(frame_bytes = body.len(), "Encoding large frame");
        } else {
            tracing::trace!(frame_bytes = body.len(), "Encoding frame");
        }
        self.frames.encode(body, dst)
    }
}
