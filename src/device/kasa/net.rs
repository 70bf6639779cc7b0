use super::codec;
use crate::device::error::DeviceError;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const READ_TIMEOUT: Duration = Duration::from_secs(2);
const READ_CHUNK_BYTES: usize = 2048;

/// One TCP connection to a Kasa device, opened per poll and dropped at the
/// end of it.
pub(crate) struct DeviceConnection {
    stream: TcpStream,
}

impl DeviceConnection {
    pub(crate) async fn open(ip: &str, port: u16) -> Result<Self, DeviceError> {
        let address = format!("{ip}:{port}");
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&address))
            .await
            .map_err(|_| DeviceError::Timeout)?
            .map_err(DeviceError::Connect)?;
        Ok(Self { stream })
    }

    /// Scramble and send one request, then read and unscramble the reply.
    pub(crate) async fn query(&mut self, request: &str) -> Result<Vec<u8>, DeviceError> {
        let framed = codec::scramble(request.as_bytes());
        tokio::time::timeout(WRITE_TIMEOUT, self.stream.write_all(&framed))
            .await
            .map_err(|_| DeviceError::Timeout)??;
        let frame = self.read_frame().await?;
        codec::unscramble(&frame)
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>, DeviceError> {
        let mut buffer = Vec::with_capacity(READ_CHUNK_BYTES);
        let mut chunk = [0u8; READ_CHUNK_BYTES];
        loop {
            let read = tokio::time::timeout(READ_TIMEOUT, self.stream.read(&mut chunk))
                .await
                .map_err(|_| DeviceError::Timeout)??;
            if read == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..read]);
            if let Some(declared) = codec::declared_body_len(&buffer) {
                if buffer.len() >= declared + codec::HEADER_LEN
                    || buffer.len() > codec::MAX_BODY_BYTES
                {
                    break;
                }
            }
        }
        Ok(buffer)
    }
}
