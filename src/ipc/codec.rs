//! Length-prefixed MessagePack framing for tokio I/O.
//!
//! Framing: `[4 bytes: payload length, big-endian u32][N bytes: MessagePack payload]`
//!
//! The same framing carries both directions, so the typed codec is
//! generic over what it decodes and what it encodes: the client uses
//! `Codec<Response, Request>`, test harnesses the same. The broker
//! side decodes raw frames ([`FrameCodec`]) and runs a two-phase
//! decode ([`decode_request`]) so unknown verbs can be answered
//! instead of killing the connection.

use std::marker::PhantomData;

use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::codec::{Decoder, Encoder};

use super::protocol::{MAX_PAYLOAD_SIZE, RawEnvelope, Request, Response};

/// Codec error type.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("payload too large: {0} bytes (max {MAX_PAYLOAD_SIZE})")]
    PayloadTooLarge(usize),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("MessagePack encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("MessagePack decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

fn read_frame(
    pending_len: &mut Option<usize>,
    src: &mut BytesMut,
) -> Result<Option<BytesMut>, CodecError> {
    let payload_len = match *pending_len {
        Some(len) => len,
        None => {
            if src.len() < 4 {
                return Ok(None); // Need more data for the header.
            }
            let len = src.get_u32() as usize;
            if len > MAX_PAYLOAD_SIZE {
                return Err(CodecError::PayloadTooLarge(len));
            }
            *pending_len = Some(len);
            len
        }
    };

    if src.len() < payload_len {
        // Reserve the remaining bytes up front to avoid repeated
        // small allocations.
        src.reserve(payload_len - src.len());
        return Ok(None);
    }

    let payload = src.split_to(payload_len);
    *pending_len = None;
    Ok(Some(payload))
}

fn write_frame<T: Serialize>(item: &T, dst: &mut BytesMut) -> Result<(), CodecError> {
    let payload = rmp_serde::to_vec_named(item)?;
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(CodecError::PayloadTooLarge(payload.len()));
    }
    dst.reserve(4 + payload.len());
    dst.put_u32(payload.len() as u32);
    dst.extend_from_slice(&payload);
    Ok(())
}

/// Typed codec: decodes frames into `In`, encodes `Out` into frames.
#[derive(Debug)]
pub struct Codec<In, Out> {
    /// Length of the current frame, once the header has been consumed.
    pending_len: Option<usize>,
    _direction: PhantomData<fn(Out) -> In>,
}

impl<In, Out> Codec<In, Out> {
    pub fn new() -> Self {
        Self {
            pending_len: None,
            _direction: PhantomData,
        }
    }
}

impl<In, Out> Default for Codec<In, Out> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In: DeserializeOwned, Out> Decoder for Codec<In, Out> {
    type Item = In;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match read_frame(&mut self.pending_len, src)? {
            Some(payload) => Ok(Some(rmp_serde::from_slice(&payload)?)),
            None => Ok(None),
        }
    }
}

impl<In, Out: Serialize> Encoder<Out> for Codec<In, Out> {
    type Error = CodecError;

    fn encode(&mut self, item: Out, dst: &mut BytesMut) -> Result<(), Self::Error> {
        write_frame(&item, dst)
    }
}

/// Broker-side codec: raw frames in, [`Response`] out.
///
/// Decoding stops at the framing layer so the connection task can run
/// the two-phase [`decode_request`] with an unknown-verb fallback.
#[derive(Debug, Default)]
pub struct FrameCodec {
    pending_len: Option<usize>,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self { pending_len: None }
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        read_frame(&mut self.pending_len, src)
    }
}

impl Encoder<Response> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Response, dst: &mut BytesMut) -> Result<(), Self::Error> {
        write_frame(&item, dst)
    }
}

/// Result of attempting to decode a raw frame into a request.
#[derive(Debug)]
pub enum DecodeResult {
    /// A known request verb.
    Ok(Request),
    /// Unknown verb — envelope retained for logging.
    UnknownVerb(RawEnvelope),
    /// Could not even extract a `type` field.
    Malformed(rmp_serde::decode::Error),
}

/// Two-phase decode: try [`Request`], then fall back to
/// [`RawEnvelope`] for unknown-verb error responses.
pub fn decode_request(payload: &[u8]) -> DecodeResult {
    match rmp_serde::from_slice::<Request>(payload) {
        Ok(req) => DecodeResult::Ok(req),
        Err(_) => match rmp_serde::from_slice::<RawEnvelope>(payload) {
            Ok(envelope) => DecodeResult::UnknownVerb(envelope),
            Err(e) => DecodeResult::Malformed(e),
        },
    }
}
