//! Length-prefixed framing shared by the command and stream channels.
//!
//! Every message on the wire is a 4-byte big-endian length followed by
//! that many payload bytes. A zero-length message, or the peer closing the
//! connection before a header, is an end-of-stream signal rather than an
//! error.

use crate::error::ProtocolError;
use std::io::{ErrorKind, Read, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const HEADER_SIZE: usize = 4;

/// Largest payload a header can announce.
pub const MAX_FRAME_SIZE: usize = i32::MAX as usize;

fn encode_header(len: usize) -> Result<[u8; HEADER_SIZE], ProtocolError> {
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    Ok((len as u32).to_be_bytes())
}

/// Write one framed message.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let header = encode_header(payload.len())?;
    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// First half of a two-phase read: waits for the header only.
///
/// Returns `None` when the peer closed cleanly before sending any header
/// byte. A header cut short by the peer is an error.
pub async fn read_header<R>(reader: &mut R) -> Result<Option<u32>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    let mut filled = 0;
    while filled < HEADER_SIZE {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            return if filled == 0 {
                Ok(None)
            } else {
                Err(ProtocolError::TruncatedHeader(filled))
            };
        }
        filled += n;
    }
    Ok(Some(u32::from_be_bytes(header)))
}

/// Second half of a two-phase read: the payload size is already known.
pub async fn read_payload<R>(reader: &mut R, size: u32) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let expected = checked_size(size)?;
    let mut payload = vec![0u8; expected];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| truncated_or_io(e, expected))?;
    Ok(payload)
}

/// Read one framed message. `None` signals end of stream.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    match read_header(reader).await? {
        None | Some(0) => Ok(None),
        Some(size) => read_payload(reader, size).await.map(Some),
    }
}

/// Blocking counterpart of [`write_frame`].
pub fn write_frame_blocking<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), ProtocolError> {
    let header = encode_header(payload.len())?;
    writer.write_all(&header)?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Blocking counterpart of [`read_frame`].
pub fn read_frame_blocking<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>, ProtocolError> {
    let mut header = [0u8; HEADER_SIZE];
    let mut filled = 0;
    while filled < HEADER_SIZE {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(ProtocolError::TruncatedHeader(filled)),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    let expected = checked_size(u32::from_be_bytes(header))?;
    if expected == 0 {
        return Ok(None);
    }
    let mut payload = vec![0u8; expected];
    reader
        .read_exact(&mut payload)
        .map_err(|e| truncated_or_io(e, expected))?;
    Ok(Some(payload))
}

/// Announced payload size, rejected before anything is allocated for it.
fn checked_size(size: u32) -> Result<usize, ProtocolError> {
    let size = size as usize;
    if size > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(size));
    }
    Ok(size)
}

fn truncated_or_io(err: std::io::Error, expected: usize) -> ProtocolError {
    if err.kind() == ErrorKind::UnexpectedEof {
        ProtocolError::TruncatedPayload { expected }
    } else {
        ProtocolError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_round_trip_preserves_payload() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let payloads: Vec<Vec<u8>> = vec![b"a".to_vec(), vec![7u8; 1000], (0..=255).collect()];

        for payload in &payloads {
            write_frame(&mut client, payload).await.unwrap();
        }
        for payload in &payloads {
            let got = read_frame(&mut server).await.unwrap();
            assert_eq!(got.as_deref(), Some(payload.as_slice()));
        }
    }

    #[tokio::test]
    async fn test_zero_length_frame_is_end_of_stream() {
        let (mut client, mut server) = tokio::io::duplex(64);
        write_frame(&mut client, b"").await.unwrap();
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clean_close_before_header_is_end_of_stream() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_header_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0, 0]).await.unwrap();
        drop(client);

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, ProtocolError::TruncatedHeader(2)));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&10u32.to_be_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, ProtocolError::TruncatedPayload { expected: 10 }));
    }

    #[tokio::test]
    async fn test_two_phase_read_reports_size_first() {
        let (mut client, mut server) = tokio::io::duplex(64);
        write_frame(&mut client, b"hello").await.unwrap();

        let size = read_header(&mut server).await.unwrap();
        assert_eq!(size, Some(5));
        let payload = read_payload(&mut server, 5).await.unwrap();
        assert_eq!(payload, b"hello");
    }

    #[tokio::test]
    async fn test_oversized_header_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&u32::MAX.to_be_bytes()).await.unwrap();

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge(_)));

        let mut wire = Cursor::new((MAX_FRAME_SIZE as u32 + 1).to_be_bytes().to_vec());
        let err = read_frame_blocking(&mut wire).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge(_)));
    }

    #[test]
    fn test_blocking_framing_matches_wire_layout() {
        let mut wire = Vec::new();
        write_frame_blocking(&mut wire, b"jpg1").unwrap();
        assert_eq!(&wire[..4], &[0, 0, 0, 4]);

        let mut cursor = Cursor::new(wire);
        assert_eq!(
            read_frame_blocking(&mut cursor).unwrap().as_deref(),
            Some(&b"jpg1"[..])
        );
        assert!(read_frame_blocking(&mut cursor).unwrap().is_none());
    }
}
