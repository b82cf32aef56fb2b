//! AT command framing: one command out, one response line back.

use tracing::debug;

use crate::error::{Error, Result};
use crate::transport::Transport;

/// Success sentinel under non-verbose line discipline.
pub const RSP_OK: &str = "0";

/// Framed command/response layer over a [`Transport`].
pub struct AtLink {
    transport: Box<dyn Transport>,
}

impl std::fmt::Debug for AtLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtLink").finish_non_exhaustive()
    }
}

impl AtLink {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Send `cmd` to the device after wrapping it in AT syntax.
    pub fn command(&mut self, cmd: &str) -> Result<()> {
        let framed = format!("AT{cmd}\r");
        debug!("issuing command {framed:?}");
        self.transport.write_all(framed.as_bytes())
    }

    /// Push payload bytes with no AT framing (used inside `+SBDWT`).
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        debug!("writing {} payload bytes", bytes.len());
        self.transport.write_all(bytes)
    }

    /// Read one response line, stripped of trailing whitespace.
    ///
    /// The modem intermittently emits empty lines (a bare `\r\n`) between
    /// framed responses, and a silent line plays as empty too. `retry` bounds
    /// how many empty lines to skip: callers that know a substantive reply is
    /// imminent pass a nonzero budget and get [`Error::Timeout`] on
    /// exhaustion; callers reading optional tail acknowledgements pass 0 and
    /// accept an empty result.
    pub fn response(&mut self, retry: u32) -> Result<String> {
        for _ in 0..=retry {
            let raw = self.transport.read_line()?;
            let rsp = raw.trim_end();
            if !rsp.is_empty() {
                debug!("received response {rsp:?}");
                return Ok(rsp.to_string());
            }
        }
        if retry == 0 {
            debug!("received empty response");
            return Ok(String::new());
        }
        Err(Error::Timeout {
            query: "Read",
            attempts: retry,
        })
    }

    /// Read one response line and require it to equal `expected`.
    pub fn expect(&mut self, expected: &str) -> Result<()> {
        self.expect_with_retry(expected, 0)
    }

    /// Like [`AtLink::expect`], skipping up to `retry` empty lines first.
    pub fn expect_with_retry(&mut self, expected: &str, retry: u32) -> Result<()> {
        let actual = self.response(retry)?;
        if actual == expected {
            Ok(())
        } else {
            Err(Error::ExpectationFailure {
                expected: expected.to_string(),
                actual,
            })
        }
    }
}
