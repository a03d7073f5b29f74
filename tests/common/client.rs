//! Minimal line-based test client.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A connected test client speaking newline-delimited frames.
pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read, write) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer: write,
        })
    }

    /// Send one request frame.
    pub async fn send(&mut self, line: &str) -> anyhow::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Receive one response frame; errors on timeout or closed connection.
    pub async fn recv(&mut self) -> anyhow::Result<String> {
        let mut line = String::new();
        let n = tokio::time::timeout(RECV_TIMEOUT, self.reader.read_line(&mut line)).await??;
        if n == 0 {
            anyhow::bail!("connection closed by server");
        }
        Ok(line.trim_end_matches('\n').to_string())
    }

    /// Send a request and wait for its response.
    pub async fn request(&mut self, line: &str) -> anyhow::Result<String> {
        self.send(line).await?;
        self.recv().await
    }

    /// Wait for the server to close the connection; true on clean EOF.
    pub async fn expect_closed(&mut self) -> bool {
        let mut line = String::new();
        matches!(
            tokio::time::timeout(RECV_TIMEOUT, self.reader.read_line(&mut line)).await,
            Ok(Ok(0))
        )
    }
}
