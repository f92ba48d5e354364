use bytes::BytesMut;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// Longest accepted frame. Read-job results carry whole row sets.
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Framing error: {0}")]
    Framing(#[from] LinesCodecError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Newline-delimited JSON. Decodes `D`, encodes `E`.
///
/// A line that is not valid JSON for `D` is logged and skipped so one bad
/// frame cannot tear down the link.
pub struct JsonLinesCodec<D, E> {
    lines: LinesCodec,
    _marker: PhantomData<fn(E) -> D>,
}

impl<D, E> JsonLinesCodec<D, E> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_FRAME_LENGTH)
    }

    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
            _marker: PhantomData,
        }
    }
}

impl<D, E> Default for JsonLinesCodec<D, E> {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_line<D: DeserializeOwned>(line: &str) -> Option<D> {
    if line.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(item) => Some(item),
        Err(e) => {
            tracing::warn!(error = %e, len = line.len(), "Dropping malformed IPC frame");
            None
        }
    }
}

impl<D: DeserializeOwned, E> Decoder for JsonLinesCodec<D, E> {
    type Item = D;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<D>, CodecError> {
        while let Some(line) = self.lines.decode(src)? {
            if let Some(item) = parse_line(&line) {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<D>, CodecError> {
        while let Some(line) = self.lines.decode_eof(src)? {
            if let Some(item) = parse_line(&line) {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }
}

impl<D, E: Serialize> Encoder<E> for JsonLinesCodec<D, E> {
    type Error = CodecError;

    fn encode(&mut self, item: E, dst: &mut BytesMut) -> Result<(), CodecError> {
        let line = serde_json::to_string(&item)?;
        self.lines.encode(line, dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::protocol::{CoordinatorMessage, WorkerMessage};

    #[test]
    fn test_decode_skips_garbage_lines() {
        let mut codec: JsonLinesCodec<WorkerMessage, CoordinatorMessage> = JsonLinesCodec::new();
        let mut buf = BytesMut::from(
            "not json\n\n{\"cmd\":\"get_jwt_secret\"}\n{\"cmd\":\"restart_ser",
        );

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(WorkerMessage::GetJwtSecret));
        // incomplete frame stays buffered
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(!buf.is_empty());
    }

    #[test]
    fn test_encode_one_line_per_message() {
        let mut codec: JsonLinesCodec<WorkerMessage, CoordinatorMessage> = JsonLinesCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(CoordinatorMessage::LiveStreamWorkerStatsRequest, &mut buf)
            .unwrap();
        codec
            .encode(
                CoordinatorMessage::GetJwtSecretResponse {
                    jwt_secret: "line\nbreak".to_string(),
                },
                &mut buf,
            )
            .unwrap();

        let text = String::from_utf8(buf.to_vec()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.ends_with('\n'));
    }
}
