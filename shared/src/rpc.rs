//! Length-prefixed bincode frames for the coordinator RPC over TCP.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single RPC frame body.
pub const MAX_FRAME_SIZE: u32 = 64 * 1024;

pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = bincode::serialize(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if body.len() > MAX_FRAME_SIZE as usize {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"));
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await
}

pub async fn read_frame<R, T>(reader: &mut R) -> io::Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = reader.read_u32().await?;
    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    bincode::deserialize(&body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ServerRequest, ServerResponse};
    use tokio_test::io::Builder;

    fn frame_bytes<T: Serialize>(value: &T) -> Vec<u8> {
        let body = bincode::serialize(value).unwrap();
        let mut bytes = (body.len() as u32).to_be_bytes().to_vec();
        bytes.extend_from_slice(&body);
        bytes
    }

    #[test]
    fn test_write_frame_layout() {
        let request = ServerRequest::Heartbeat {
            public_key: vec![1, 2, 3],
        };
        let mut mock = Builder::new().write(&frame_bytes(&request)).build();
        tokio_test::block_on(write_frame(&mut mock, &request)).unwrap();
    }

    #[test]
    fn test_read_frame() {
        let response = ServerResponse::HeartbeatAck;
        let mut mock = Builder::new().read(&frame_bytes(&response)).build();
        let decoded: ServerResponse = tokio_test::block_on(read_frame(&mut mock)).unwrap();
        assert_eq!(decoded, ServerResponse::HeartbeatAck);
    }

    #[test]
    fn test_read_frame_rejects_oversized_length() {
        let mut mock = Builder::new().read(&(MAX_FRAME_SIZE + 1).to_be_bytes()).build();
        let result: io::Result<ServerResponse> = tokio_test::block_on(read_frame(&mut mock));
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_read_frame_truncated_body() {
        let bytes = frame_bytes(&ServerRequest::GetNodes {
            public_key: vec![0; 32],
        });
        let mut mock = Builder::new().read(&bytes[..bytes.len() - 4]).build();
        let result: io::Result<ServerRequest> = tokio_test::block_on(read_frame(&mut mock));
        assert!(result.is_err());
    }
}
