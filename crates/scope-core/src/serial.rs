//! Serial port abstractions shared by the drivers.
//!
//! The motion controller of a 3D printer speaks line-oriented ASCII over a
//! USB CDC serial port. Drivers never touch `tokio_serial` directly; they work
//! against [`DynSerial`] so tests can substitute `tokio::io::duplex` streams
//! or the simulated firmware from `scope-driver-mock`.
//!
//! # Example
//!
//! ```rust,ignore
//! use scope_core::serial::{open_serial_async, wrap_buffered, discard_pending};
//!
//! let port = open_serial_async("/dev/ttyUSB0", 115200).await?;
//! let mut port = wrap_buffered(Box::new(port));
//! let stale = discard_pending(&mut port, 50).await;
//! ```

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader};

/// Trait alias for async serial port I/O.
///
/// Implemented for `tokio_serial::SerialStream`, `tokio::io::DuplexStream`
/// and anything else that is `AsyncRead + AsyncWrite + Unpin + Send`.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Line-buffered serial port owned by exactly one transport.
pub type BufferedPort = BufReader<DynSerial>;

/// Wrap a type-erased port for line reading.
pub fn wrap_buffered(port: DynSerial) -> BufferedPort {
    BufReader::new(port)
}

/// Open a serial port with the 8N1, no-flow-control settings Marlin uses.
///
/// Opening is done on the blocking pool so the async runtime is not stalled
/// while the USB device enumerates.
#[cfg(feature = "serial")]
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
) -> crate::error::ScopeResult<tokio_serial::SerialStream> {
    use crate::error::ScopeError;
    use tokio_serial::SerialPortBuilderExt;

    let path = port_path.to_string();
    let result = tokio::task::spawn_blocking(move || {
        tokio_serial::new(&path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
    })
    .await
    .map_err(|e| ScopeError::Serial {
        port: port_path.to_string(),
        message: format!("blocking open task failed: {e}"),
    })?;

    result.map_err(|e| ScopeError::Serial {
        port: port_path.to_string(),
        message: e.to_string(),
    })
}

/// Discard everything currently pending on the port.
///
/// Drops the bytes already held by the `BufReader` and then keeps reading
/// from the underlying stream until nothing arrives for `quiet_ms`.
/// Returns the number of bytes discarded.
pub async fn discard_pending(port: &mut BufferedPort, quiet_ms: u64) -> usize {
    let buffered = port.buffer().len();
    port.consume(buffered);

    buffered + drain_serial_buffer(port.get_mut(), quiet_ms).await
}

/// Read and discard bytes until the stream stays quiet for `quiet_ms`.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, quiet_ms: u64) -> usize {
    let mut discard = [0u8; 256];
    let mut total_discarded = 0usize;

    loop {
        match tokio::time::timeout(Duration::from_millis(quiet_ms), port.read(&mut discard)).await
        {
            Ok(Ok(0)) => break, // EOF
            Ok(Ok(n)) => total_discarded += n,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Ok(Err(_)) => break,
            Err(_) => break, // quiet period elapsed
        }
    }

    total_discarded
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn buffered_port_reads_lines_from_duplex() {
        let (mut host, device) = tokio::io::duplex(64);
        let mut port = wrap_buffered(Box::new(device));

        host.write_all(b"ok\n").await.unwrap();

        let mut line = String::new();
        port.read_line(&mut line).await.unwrap();
        assert_eq!(line.trim(), "ok");
    }

    #[tokio::test]
    async fn discard_pending_clears_reader_and_stream() {
        let (mut host, device) = tokio::io::duplex(64);
        let mut port = wrap_buffered(Box::new(device));

        host.write_all(b"echo:busy\nX:1.00 Y:2.00\n").await.unwrap();
        // Pull part of the data into the BufReader's internal buffer.
        let mut first = String::new();
        port.read_line(&mut first).await.unwrap();
        assert_eq!(first.trim(), "echo:busy");

        let discarded = discard_pending(&mut port, 20).await;
        assert_eq!(discarded, "X:1.00 Y:2.00\n".len());

        host.write_all(b"ok\n").await.unwrap();
        let mut next = String::new();
        port.read_line(&mut next).await.unwrap();
        assert_eq!(next.trim(), "ok");
    }
}
