//! Line-oriented G-code request/response transport.
//!
//! Protocol Overview:
//! - Format: ASCII command terminated by `\n`, ASCII response lines
//! - Baud: 115200, 8N1, no flow control
//! - Every command is acknowledged by a line starting with `ok`; any number of
//!   informational lines (`echo:`, temperature reports, position reports) may
//!   precede it
//!
//! Every read is bounded by a timeout. The timeout measures silence: it is
//! re-armed each time a line arrives, so firmware keepalives
//! (`echo:busy: processing`, temperature reports during `M190`) keep a long
//! operation alive while a dead link still fails with
//! [`ScopeError::Timeout`].

use scope_core::serial::{discard_pending, wrap_buffered, BufferedPort, DynSerial};
use scope_core::{ScopeError, ScopeResult};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tracing::{debug, instrument, trace};

/// Acknowledgment prefix sent by the firmware after each command.
pub const ACK_PREFIX: &str = "ok";

/// Default silence timeout for ordinary commands.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Quiet period used when flushing stale input.
const FLUSH_QUIET_MS: u64 = 20;

/// Serial G-code transport.
///
/// Owns the port outright; the stage controller owns the transport.
pub struct GcodeTransport {
    port: BufferedPort,
    timeout: Duration,
}

impl GcodeTransport {
    /// Wrap an already-open port.
    pub fn new(port: DynSerial, timeout: Duration) -> Self {
        Self {
            port: wrap_buffered(port),
            timeout,
        }
    }

    /// Open a serial port and wrap it.
    pub async fn open(port_path: &str, baud_rate: u32, timeout: Duration) -> ScopeResult<Self> {
        let port = scope_core::serial::open_serial_async(port_path, baud_rate).await?;
        tracing::info!(port = %port_path, baud_rate, "Opened G-code serial link");
        Ok(Self::new(Box::new(port), timeout))
    }

    /// Configured silence timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `code` and read its response with the default timeout.
    ///
    /// With `await_ack = false` exactly one line is read and returned.
    /// With `await_ack = true` lines are read until one starts with `ok`;
    /// the first line that was not an ack is returned if there was one,
    /// otherwise the ack line itself.
    pub async fn send_command(&mut self, code: &str, await_ack: bool) -> ScopeResult<String> {
        let timeout = self.timeout;
        self.send_command_with_timeout(code, await_ack, timeout)
            .await
    }

    /// [`send_command`](Self::send_command) with an explicit silence timeout.
    #[instrument(skip(self), fields(command = %code), err)]
    pub async fn send_command_with_timeout(
        &mut self,
        code: &str,
        await_ack: bool,
        timeout: Duration,
    ) -> ScopeResult<String> {
        self.write_line(code).await?;

        let first = self.read_line_within(code, timeout).await?;
        if !await_ack || first.starts_with(ACK_PREFIX) {
            return Ok(first);
        }

        loop {
            let line = self.read_line_within(code, timeout).await?;
            if line.starts_with(ACK_PREFIX) {
                return Ok(first);
            }
            trace!(command = %code, discarded = %line, "Discarding non-ack line");
        }
    }

    /// Read one response line with the default timeout.
    pub async fn read_line(&mut self, command: &str) -> ScopeResult<String> {
        let timeout = self.timeout;
        self.read_line_within(command, timeout).await
    }

    /// Discard stale buffered input. Returns the number of bytes dropped.
    pub async fn flush_input_buffer(&mut self) -> usize {
        let dropped = discard_pending(&mut self.port, FLUSH_QUIET_MS).await;
        if dropped > 0 {
            debug!(bytes = dropped, "Flushed stale serial input");
        }
        dropped
    }

    async fn write_line(&mut self, code: &str) -> ScopeResult<()> {
        debug!(command = %code, "Sending G-code");
        let writer = self.port.get_mut();
        writer.write_all(format!("{code}\n").as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn read_line_within(&mut self, command: &str, timeout: Duration) -> ScopeResult<String> {
        let mut line = String::new();
        let read = tokio::time::timeout(timeout, self.port.read_line(&mut line))
            .await
            .map_err(|_| ScopeError::Timeout {
                command: command.to_string(),
                waited: timeout,
            })??;

        if read == 0 {
            return Err(ScopeError::Disconnected(command.to_string()));
        }

        let line = line.trim_end_matches(['\r', '\n']).to_string();
        trace!(command = %command, response = %line, "Received line");
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn await_ack_returns_first_non_ack_line() {
        let (host, device) = tokio::io::duplex(256);
        let mut transport = GcodeTransport::new(Box::new(device), DEFAULT_TIMEOUT);

        let firmware = tokio::spawn(async move {
            let mut host = BufReader::new(host);
            let mut cmd = String::new();
            host.read_line(&mut cmd).await.unwrap();
            host.get_mut()
                .write_all(b"echo:first\necho:second\nok\n")
                .await
                .unwrap();
            cmd
        });

        let reply = transport.send_command("G90", true).await.unwrap();
        assert_eq!(reply, "echo:first");
        assert_eq!(firmware.await.unwrap(), "G90\n");
    }

    #[tokio::test]
    async fn bare_ack_is_returned_when_nothing_precedes_it() {
        let (mut host, device) = tokio::io::duplex(256);
        let mut transport = GcodeTransport::new(Box::new(device), DEFAULT_TIMEOUT);
        host.write_all(b"ok\n").await.unwrap();

        assert_eq!(transport.send_command("G91", true).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn without_ack_reads_exactly_one_line() {
        let (mut host, device) = tokio::io::duplex(256);
        let mut transport = GcodeTransport::new(Box::new(device), DEFAULT_TIMEOUT);
        host.write_all(b"X:1.00 Y:2.00 Z:3.00 Count X:0\r\nok\n")
            .await
            .unwrap();

        let data = transport.send_command("M114", false).await.unwrap();
        assert_eq!(data, "X:1.00 Y:2.00 Z:3.00 Count X:0");
        assert_eq!(transport.read_line("M114").await.unwrap(), "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn silent_device_times_out() {
        let (_host, device) = tokio::io::duplex(256);
        let mut transport = GcodeTransport::new(Box::new(device), Duration::from_secs(2));

        let err = transport.send_command("G28", true).await.unwrap_err();
        match err {
            ScopeError::Timeout { command, waited } => {
                assert_eq!(command, "G28");
                assert_eq!(waited, Duration::from_secs(2));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_link_is_reported() {
        let (host, device) = tokio::io::duplex(256);
        let mut transport = GcodeTransport::new(Box::new(device), DEFAULT_TIMEOUT);
        drop(host);

        // Writing to a closed duplex fails with BrokenPipe before any read.
        let err = transport.send_command("M400", true).await.unwrap_err();
        assert!(matches!(
            err,
            ScopeError::Io(_) | ScopeError::Disconnected(_)
        ));
    }

    #[tokio::test]
    async fn flush_drops_stale_echo() {
        let (mut host, device) = tokio::io::duplex(256);
        let mut transport = GcodeTransport::new(Box::new(device), DEFAULT_TIMEOUT);
        host.write_all(b"echo:stale\n").await.unwrap();

        assert_eq!(transport.flush_input_buffer().await, "echo:stale\n".len());

        host.write_all(b"ok\n").await.unwrap();
        assert_eq!(transport.read_line("M400").await.unwrap(), "ok");
    }
}
