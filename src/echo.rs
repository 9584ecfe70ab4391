use embedded_io::{Error as _, Read};
use heapless::Vec;
use log::warn;

use crate::chatty;
use crate::debug_flags::DEBUG_HTTP;
use crate::error::{ClockError, Result};

/// Backing storage for one request body, including a terminator slot.
pub const ECHO_BUFFER_SIZE: usize = 128;
/// Largest body that is echoed back in full.
pub const ECHO_CAPACITY: usize = ECHO_BUFFER_SIZE - 1;

/// The body of one POST, truncated to [`ECHO_CAPACITY`] bytes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EchoBuffer {
    data: Vec<u8, ECHO_BUFFER_SIZE>,
}

impl EchoBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read up to `content_len` bytes of body from `reader`.
    ///
    /// Anything beyond [`ECHO_CAPACITY`] is left unread. Fails when the
    /// transport errors or produces nothing at all.
    pub fn receive<R: Read>(reader: &mut R, content_len: usize) -> Result<Self> {
        let want = content_len.min(ECHO_CAPACITY);
        let mut buf = [0u8; ECHO_CAPACITY];
        let mut filled = 0;

        while filled < want {
            match reader.read(&mut buf[filled..want]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => {
                    let reason = format!("{:?}", e.kind());
                    warn!("HTTP body read failed after {} bytes: {}", filled, reason);
                    return Err(ClockError::RequestReceiveFailure { reason });
                }
            }
        }

        if filled == 0 {
            return Err(ClockError::RequestReceiveFailure {
                reason: format!("no body (content length {})", content_len),
            });
        }

        let mut echo = Self::new();
        echo.extend(&buf[..filled]);
        chatty!(
            DEBUG_HTTP,
            "Received {} of {} body bytes",
            echo.len(),
            content_len
        );
        Ok(echo)
    }

    /// Append as much of `bytes` as fits, returning how many were taken.
    pub fn extend(&mut self, bytes: &[u8]) -> usize {
        let room = ECHO_CAPACITY - self.data.len();
        let take = bytes.len().min(room);
        // Cannot fail: `take` never exceeds the remaining payload room.
        let _ = self.data.extend_from_slice(&bytes[..take]);
        take
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
