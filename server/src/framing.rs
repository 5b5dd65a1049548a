//! Newline-delimited frame I/O shared by the handshake, dispatcher, and
//! keepalive tasks — all three read/write `tunnel_protocol::Frame`s over a
//! `MuxStream` the same way, so the byte-level loop lives in one place.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tunnel_protocol::Frame;

use crate::transport::MuxStream;

pub async fn read_frame(stream: &mut MuxStream) -> anyhow::Result<Frame> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            anyhow::bail!("stream closed before a full frame was read");
        }
        if byte[0] == b'\n' {
            break;
        }
        buf.push(byte[0]);
    }
    buf.push(b'\n');
    Ok(tunnel_protocol::decode(&buf)?)
}

pub async fn write_frame(stream: &mut MuxStream, frame: &Frame) -> anyhow::Result<()> {
    let bytes = tunnel_protocol::encode(frame)?;
    stream.write_all(&bytes).await?;
    stream.flush().await?;
    Ok(())
}
