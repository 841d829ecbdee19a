//! Framed codec for the worker event protocol.
//!
//! Uses LengthDelimitedCodec for framing + serde_json for serialization.
//! Works over any AsyncRead/AsyncWrite, which is all the handler ever
//! assumes about the worker's pipes.

use std::io;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Upper bound on a single frame. A worker emitting anything larger is
/// misbehaving; the read fails instead of buffering without limit.
pub const DEFAULT_MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

/// Codec that frames messages with a 4-byte length prefix and serializes
/// payloads with JSON.
pub struct EventCodec<T> {
    inner: LengthDelimitedCodec,
    _phantom: PhantomData<T>,
}

impl<T> EventCodec<T> {
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .max_frame_length(max_frame_len)
                .new_codec(),
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for EventCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Decoder for EventCodec<T> {
    type Item = T;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src)? {
            Some(bytes) => {
                let item = serde_json::from_slice(&bytes)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }
}

impl<T: Serialize> Encoder<T> for EventCodec<T> {
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json =
            serde_json::to_vec(&item).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        tracing::trace!(json_size_bytes = json.len(), "encoding frame");
        self.inner.encode(Bytes::from(json), dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::{BootstrapRecord, EventChannel, WorkerCommand, WorkerEvent};

    #[test]
    fn codec_roundtrip_event() {
        let mut codec = EventCodec::<WorkerEvent>::new();
        let mut buf = BytesMut::new();

        let event = WorkerEvent::Bootstrap(BootstrapRecord {
            event_channel: EventChannel::UsesStdout,
            charset: "UTF-8".to_string(),
        });
        codec.encode(event.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();

        assert_eq!(decoded, event);
        assert!(buf.is_empty());
    }

    #[test]
    fn codec_roundtrip_command() {
        let mut codec = EventCodec::<WorkerCommand>::new();
        let mut buf = BytesMut::new();

        let command = WorkerCommand::Run {
            suite: "com.example.CoreTest".to_string(),
        };
        codec.encode(command.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();

        assert_eq!(decoded, command);
    }

    #[test]
    fn partial_frame_decodes_to_none() {
        let mut codec = EventCodec::<WorkerEvent>::new();
        let mut buf = BytesMut::new();
        codec.encode(WorkerEvent::Idle, &mut buf).unwrap();

        let cut = buf.len() - 2;
        let mut partial = buf.split_to(cut);
        let mut partial_codec = EventCodec::<WorkerEvent>::new();

        assert!(partial_codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn malformed_payload_is_invalid_data() {
        let mut codec = EventCodec::<WorkerEvent>::new();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&4u32.to_be_bytes());
        buf.extend_from_slice(b"!!!!");

        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut small = EventCodec::<WorkerEvent>::with_max_frame_len(8);
        let mut buf = BytesMut::new();

        let mut big = EventCodec::<WorkerEvent>::new();
        big.encode(
            WorkerEvent::SuiteStarted {
                suite: "a-suite-name-longer-than-eight-bytes".to_string(),
            },
            &mut buf,
        )
        .unwrap();

        assert!(small.decode(&mut buf).is_err());
    }
}
