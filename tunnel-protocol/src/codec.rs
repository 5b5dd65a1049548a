use thiserror::Error;

use crate::Frame;

/// Errors the frame codec can raise. `MalformedFrame` is the only variant
/// spec.md names; it covers both "not valid JSON" and "valid JSON, wrong shape".
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

/// Encodes one frame as a self-delimited message: a single JSON value
/// followed by `\n`, no leading whitespace.
pub fn encode(frame: &Frame) -> Result<Vec<u8>, ProtocolError> {
    let mut bytes =
        serde_json::to_vec(frame).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Decodes exactly one frame from a line of bytes (without the trailing
/// newline — callers read up to `\n` with their own buffered reader).
pub fn decode(line: &[u8]) -> Result<Frame, ProtocolError> {
    serde_json::from_slice(line).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
}
