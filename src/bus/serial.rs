use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_serial::SerialPortBuilderExt;
use tracing::debug;

/// Anything that behaves like an open UART
pub trait SerialLink: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialLink for T {}

/// Serial port wrapper for async communication
pub struct SerialBus {
    port: Box<dyn SerialLink>,
    /// Port path, used in log and error messages
    path: String,
}

impl SerialBus {
    /// Open a serial port at 9600 baud, the rate the breakout UART modules ship with
    pub fn new(path: &str) -> io::Result<Self> {
        Self::new_with_baud(path, 9600)
    }

    /// Create a new serial bus connection with custom baud rate
    pub fn new_with_baud(path: &str, baud_rate: u32) -> io::Result<Self> {
        let port = tokio_serial::new(path, baud_rate).open_native_async()?;
        Ok(Self::from_link(Box::new(port), path))
    }

    /// Wrap an already open stream
    pub fn from_link(port: Box<dyn SerialLink>, path: &str) -> Self {
        Self {
            port,
            path: path.to_string(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data).await?;
        self.port.flush().await
    }

    /// Collect bytes until `max` have arrived or the line stays quiet for
    /// `idle`. The idle timer restarts on every received byte.
    pub async fn read_until_idle(&mut self, max: usize, idle: Duration) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(max);
        let mut byte = [0u8; 1];
        while out.len() < max {
            match tokio::time::timeout(idle, self.port.read(&mut byte)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(_)) => out.push(byte[0]),
                Ok(Err(e)) => return Err(e),
                Err(_) => break,
            }
        }
        debug!("[{}] received {} byte(s)", self.path, out.len());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn read_stops_when_line_goes_quiet() {
        let (local, mut remote) = tokio::io::duplex(64);
        let mut bus = SerialBus::from_link(Box::new(local), "duplex");
        remote.write_all(b"#hello").await.unwrap();

        let got = bus.read_until_idle(32, Duration::from_millis(100)).await.unwrap();
        assert_eq!(got, b"#hello");
    }

    #[tokio::test]
    async fn read_stops_at_max() {
        let (local, mut remote) = tokio::io::duplex(64);
        let mut bus = SerialBus::from_link(Box::new(local), "duplex");
        remote.write_all(b"abcdef").await.unwrap();

        let got = bus.read_until_idle(4, Duration::from_millis(100)).await.unwrap();
        assert_eq!(got, b"abcd");
    }
}
