//! Trait abstraction for serial port operations to enable testing

use async_trait::async_trait;
use bytes::BytesMut;
use std::io;

/// Trait for serial port I/O operations
#[async_trait]
pub trait SerialPortIO: Send {
    /// Write all data to the port
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    async fn flush(&mut self) -> io::Result<()>;

    /// Read whatever is available into `buf`, returning the byte count
    async fn read_buf(&mut self, buf: &mut BytesMut) -> io::Result<usize>;
}

/// Wrapper around tokio_serial::SerialStream that implements SerialPortIO
pub struct TokioSerialPort {
    port: tokio_serial::SerialStream,
}

impl TokioSerialPort {
    pub fn new(port: tokio_serial::SerialStream) -> Self {
        Self { port }
    }
}

#[async_trait]
impl SerialPortIO for TokioSerialPort {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.port.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.port.flush().await
    }

    async fn read_buf(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        use tokio::io::AsyncReadExt;
        self.port.read_buf(buf).await
    }
}
