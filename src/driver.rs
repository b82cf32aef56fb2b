//! The RockBLOCK driver proper.
//!
//! Layered on [`AtLink`]: a one-shot line-discipline negotiator, bounded-retry
//! network-time and signal pollers, the satellite session engine, and the
//! public `send_recv` / `recv_all` facade. Everything below the constructor
//! assumes the modem is in non-echo, non-verbose mode and treats a bare `"0"`
//! line as the success sentinel.

use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::at::{AtLink, RSP_OK};
use crate::error::{Error, Result};
use crate::msglog::MessageLog;
use crate::status::{SbdixStatus, SbdsxStatus};
use crate::transport::{SerialTransport, Transport};

/// Maximum MO payload accepted by `+SBDWT` text mode.
const MSG_SIZE_LIMIT: usize = 340;

/// Minimum bars of signal strength before attempting a session.
const MIN_SIGNAL: u32 = 2;

const TIME_RETRIES: u32 = 20;
const TIME_DELAY: Duration = Duration::from_secs(1);

const SIGNAL_RETRIES: u32 = 3;
const SIGNAL_DELAY: Duration = Duration::from_secs(10);

const SESSION_RETRIES: u32 = 3;
const SESSION_DELAY: Duration = Duration::from_secs(1);

/// Empty-line budget while waiting out a satellite session. A session takes
/// around 20 seconds and the modem emits blank keep-alive lines during it.
const SESSION_READ_RETRY: u32 = 5;

/// Message buffer selector for `+SBDD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SbdBuffer {
    MobileOriginated,
    MobileTerminated,
    All,
}

impl SbdBuffer {
    fn id(self) -> &'static str {
        match self {
            Self::MobileOriginated => "0",
            Self::MobileTerminated => "1",
            Self::All => "2",
        }
    }
}

/// An open connection to a RockBLOCK device.
///
/// Owns the serial transport and (optionally) the message log for the life
/// of the process; the transport is released exactly once, on [`close`] or
/// drop, whichever comes first.
///
/// [`close`]: RockBlock::close
pub struct RockBlock {
    link: AtLink,
    log: Option<MessageLog>,
}

impl std::fmt::Debug for RockBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RockBlock").finish_non_exhaustive()
    }
}

impl RockBlock {
    /// Open `device` and negotiate the line discipline.
    pub fn open(device: &str, log: Option<MessageLog>) -> Result<Self> {
        let transport = SerialTransport::open(device)?;
        Self::new(Box::new(transport), log)
    }

    /// Wrap an already-open transport and negotiate the line discipline.
    pub fn new(transport: Box<dyn Transport>, log: Option<MessageLog>) -> Result<Self> {
        let mut rb = Self {
            link: AtLink::new(transport),
            log,
        };
        rb.setup_device()?;
        info!("modem ready (echo off, verbose off, ring alerts off)");
        Ok(rb)
    }

    /// Probe the modem's (echo, verbose) mode and force it to (off, off),
    /// then disable ring alerts.
    ///
    /// This is the only code path that tolerates mixed line discipline. The
    /// probe is a fixed decision tree over the first one or two response
    /// lines to a bare `AT`:
    ///
    /// | first line  | second line | (echo, verbose) |
    /// |-------------|-------------|-----------------|
    /// | `0`         |             | (false, false)  |
    /// | `AT\r0`     |             | (true, false)   |
    /// | `AT` or ``  | `OK`        | (true, true)    |
    /// | `AT` or ``  | other       | (false, true)   |
    fn setup_device(&mut self) -> Result<()> {
        self.link.command("")?;
        let first = self.link.response(0)?;
        let (echo, verbose) = match first.as_str() {
            "0" => (false, false),
            "AT\r0" => (true, false),
            "AT" | "" => {
                let second = self.link.response(0)?;
                if second == "OK" {
                    (true, true)
                } else {
                    (false, true)
                }
            }
            _ => {
                return Err(Error::DeviceError {
                    context: "line discipline probe",
                    response: first,
                })
            }
        };
        debug!("probed line discipline: echo={echo} verbose={verbose}");

        if echo {
            self.link.command("E0")?;
            if verbose {
                self.link.expect("ATE0")?;
                self.link.expect("OK")?;
            } else {
                // Echo of the command itself, glued to the terse result code.
                self.link.expect("ATE0\r0")?;
            }
        }

        if verbose {
            self.link.command("V0")?;
            self.link.expect(RSP_OK)?;
        }

        self.link.command("+SBDMTA=0")?;
        self.link.expect(RSP_OK)?;

        Ok(())
    }

    /// Query signal strength (`+CSQF`), 0 to 5 bars.
    pub fn check_sig_strength(&mut self) -> Result<u32> {
        self.link.command("+CSQF")?;
        let rsp = self.link.response(0)?;
        let strength = rsp
            .strip_prefix("+CSQF:")
            .and_then(|s| s.chars().next())
            .and_then(|c| c.to_digit(10))
            .ok_or_else(|| Error::DeviceError {
                context: "signal strength",
                response: rsp.clone(),
            })?;
        self.link.expect(RSP_OK)?;
        Ok(strength)
    }

    /// Query buffer/mailbox status (`+SBDSX`).
    fn check_status(&mut self) -> Result<SbdsxStatus> {
        self.link.command("+SBDSX")?;
        let rsp = self.link.response(0)?;
        let status = rsp
            .strip_prefix("+SBDSX:")
            .and_then(SbdsxStatus::parse)
            .ok_or_else(|| Error::DeviceError {
                context: "status query",
                response: rsp.clone(),
            })?;
        self.link.expect(RSP_OK)?;
        Ok(status)
    }

    /// Query Iridium network time (`-MSSTM`). Returns whether network
    /// service is currently available.
    fn check_msstm(&mut self) -> Result<bool> {
        self.link.command("-MSSTM")?;
        let rsp = self.link.response(0)?;
        if !rsp.starts_with("-MSSTM:") {
            return Err(Error::DeviceError {
                context: "network time",
                response: rsp,
            });
        }
        let available = rsp.get(8..) != Some("no network service");
        self.link.expect(RSP_OK)?;
        Ok(available)
    }

    /// Wait until the network time query succeeds.
    fn msstm_ok(&mut self) -> Result<()> {
        for attempt in 1..=TIME_RETRIES {
            if self.check_msstm()? {
                return Ok(());
            }
            debug!("no network service (attempt {attempt}/{TIME_RETRIES})");
            if attempt < TIME_RETRIES {
                thread::sleep(TIME_DELAY);
            }
        }
        Err(Error::Timeout {
            query: "Network time",
            attempts: TIME_RETRIES,
        })
    }

    /// Wait until signal strength reaches the session threshold.
    fn signal_ok(&mut self) -> Result<()> {
        for attempt in 1..=SIGNAL_RETRIES {
            let strength = self.check_sig_strength()?;
            if strength >= MIN_SIGNAL {
                return Ok(());
            }
            debug!("signal strength {strength} below {MIN_SIGNAL} (attempt {attempt}/{SIGNAL_RETRIES})");
            if attempt < SIGNAL_RETRIES {
                thread::sleep(SIGNAL_DELAY);
            }
        }
        Err(Error::Timeout {
            query: "Signal strength",
            attempts: SIGNAL_RETRIES,
        })
    }

    /// Run one satellite session: `+SBDIXA` when answering a ring alert,
    /// `+SBDIX` otherwise.
    fn session(&mut self, alert: bool) -> Result<SbdixStatus> {
        self.link
            .command(if alert { "+SBDIXA" } else { "+SBDIX" })?;
        // The modem goes quiet for tens of seconds here, punctuated by
        // blank lines; allow several before declaring the session lost.
        let rsp = self.link.response(SESSION_READ_RETRY)?;
        let fields = rsp
            .strip_prefix("+SBDIX:")
            .or_else(|| rsp.strip_prefix("+SBDIXA:"));
        let status = fields
            .and_then(SbdixStatus::parse)
            .ok_or_else(|| Error::DeviceError {
                context: "session",
                response: rsp.clone(),
            })?;
        self.link.expect(RSP_OK)?;
        debug!("session result {status:?}");
        Ok(status)
    }

    /// Write `msg` into the MO buffer via `+SBDWT` text mode.
    ///
    /// The double acknowledgement is contractual: under non-verbose
    /// discipline the modem reports the payload write and the completion of
    /// the enclosing SBD operation separately, and both must be drained.
    fn write_msg_to_buffer(&mut self, msg: &str) -> Result<()> {
        self.link.command("+SBDWT")?;
        self.link.expect("READY")?;
        self.link.write_raw(msg.as_bytes())?;
        self.link.write_raw(b"\r")?;
        self.link.expect(RSP_OK)?;
        self.link.expect(RSP_OK)?;
        Ok(())
    }

    /// Read the message sitting in the MT buffer via `+SBDRT`, verify its
    /// length when one was advertised, then clear the buffer.
    ///
    /// `expected_len` is `None` when reading a message of unknown length,
    /// e.g. one left over from a previous process's session. Under terse
    /// discipline the command terminator `0` arrives glued to the end of the
    /// content line and is stripped off here.
    fn read_msg_from_buffer(&mut self, expected_len: Option<usize>) -> Result<String> {
        self.link.command("+SBDRT")?;
        let rsp = self.link.response(0)?;
        if !rsp.starts_with("+SBDRT:") {
            return Err(Error::DeviceError {
                context: "buffer read",
                response: rsp,
            });
        }
        let cont = self.link.response(0)?;
        if !cont.ends_with('0') {
            return Err(Error::DeviceError {
                context: "buffer read",
                response: cont,
            });
        }
        if let Some(len) = expected_len {
            if cont.len() != len + 1 {
                return Err(Error::IncorrectContentLength {
                    expected: len,
                    content: cont,
                });
            }
        }
        let msg = cont[..cont.len() - 1].to_string();
        self.clear_buffer(SbdBuffer::MobileTerminated)?;
        if let Some(log) = &mut self.log {
            log.received(&msg).map_err(Error::Log)?;
        }
        Ok(msg)
    }

    /// Clear one of the modem-side message buffers.
    fn clear_buffer(&mut self, buffer: SbdBuffer) -> Result<()> {
        self.link.command(&format!("+SBDD{}", buffer.id()))?;
        self.link.expect(RSP_OK)?;
        self.link.expect(RSP_OK)?;
        Ok(())
    }

    /// Push the MO buffer to the gateway, retrying transient failures.
    /// Returns any MT messages that arrived as a side effect.
    fn send_buffer(&mut self) -> Result<Vec<String>> {
        let mut incidental = Vec::new();

        // An MT already sitting in the buffer is a leftover from a previous
        // run; collect it before the first session overwrites it.
        if self.check_status()?.mt == 1 {
            incidental.push(self.read_msg_from_buffer(None)?);
        }

        let mut delivered = false;
        for attempt in 1..=SESSION_RETRIES {
            let status = self.session(false)?;
            if status.mt == 1 {
                incidental.push(self.read_msg_from_buffer(Some(status.mt_len as usize))?);
            }
            if status.mo_accepted() {
                delivered = true;
                break;
            }
            debug!("session not accepted, mo={} (attempt {attempt}/{SESSION_RETRIES})", status.mo);
            if attempt < SESSION_RETRIES {
                thread::sleep(SESSION_DELAY);
            }
        }
        if !delivered {
            return Err(Error::Timeout {
                query: "Buffer send",
                attempts: SESSION_RETRIES,
            });
        }

        self.clear_buffer(SbdBuffer::MobileOriginated)?;
        Ok(incidental)
    }

    /// Run sessions until one delivers an MT message, then read it.
    fn recv_buffer(&mut self, alert: bool) -> Result<String> {
        for attempt in 1..=SESSION_RETRIES {
            let status = self.session(alert)?;
            if status.mt == 1 {
                return self.read_msg_from_buffer(Some(status.mt_len as usize));
            }
            debug!("no MT delivered, mt={} (attempt {attempt}/{SESSION_RETRIES})", status.mt);
            if attempt < SESSION_RETRIES {
                thread::sleep(SESSION_DELAY);
            }
        }
        Err(Error::Timeout {
            query: "Buffer recv",
            attempts: SESSION_RETRIES,
        })
    }

    /// Send a message, returning any messages received during the sending
    /// process.
    ///
    /// Rejects payloads over 340 bytes without touching the wire. The send
    /// itself is gated on network time and signal strength, then retried
    /// across up to three satellite sessions.
    pub fn send_recv(&mut self, msg: &str) -> Result<Vec<String>> {
        if msg.len() > MSG_SIZE_LIMIT {
            return Err(Error::MessageTooLong { len: msg.len() });
        }
        self.write_msg_to_buffer(msg)?;
        self.msstm_ok()?;
        self.signal_ok()?;
        let incidental = self.send_buffer()?;
        if let Some(log) = &mut self.log {
            log.sent(msg).map_err(Error::Log)?;
        }
        Ok(incidental)
    }

    /// Receive all messages waiting, returning them as a list.
    ///
    /// Loops until the modem reports nothing pending: messages already in
    /// the MT buffer are read directly; ring alerts and gateway-queued
    /// messages each cost a network-time check, a signal check, and a
    /// session. Each message hits the log the moment it is read, so partial
    /// progress survives a failure later in the loop.
    pub fn recv_all(&mut self) -> Result<Vec<String>> {
        let mut received = Vec::new();
        let mut status = self.check_status()?;
        while status.pending() {
            if status.mt == 1 {
                received.push(self.read_msg_from_buffer(None)?);
            } else {
                self.msstm_ok()?;
                self.signal_ok()?;
                received.push(self.recv_buffer(status.ra == 1)?);
            }
            status = self.check_status()?;
        }
        Ok(received)
    }

    /// Whether any messages are waiting to be received.
    pub fn msg_waiting(&mut self) -> Result<bool> {
        Ok(self.check_status()?.pending())
    }

    /// Restore the modem's echo and verbose modes so the next process sees
    /// a predictable line discipline, then release the transport.
    pub fn close(mut self) -> Result<()> {
        self.link.command("E1V1")?;
        // Verbose mode is active by the time the result code is emitted, so
        // the acknowledgement is a full OK, possibly after blank lines.
        self.link.expect_with_retry("OK", SESSION_READ_RETRY)?;
        info!("line discipline restored, closing port");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    /// Wire bytes produced by negotiating against an already-terse modem.
    const PRELUDE: &[u8] = b"AT\rAT+SBDMTA=0\r";

    /// Build a driver over a scripted transport that answers the probe as
    /// an already non-echo, non-verbose modem, then plays `lines`.
    fn modem(lines: &[&str]) -> (RockBlock, MockTransport) {
        let mut script = vec!["0\r\n", "0\r\n"];
        script.extend_from_slice(lines);
        let mock = MockTransport::new(&script);
        let rb = RockBlock::new(Box::new(mock.clone()), None).unwrap();
        (rb, mock)
    }

    fn count(haystack: &[u8], needle: &[u8]) -> usize {
        haystack
            .windows(needle.len())
            .filter(|w| *w == needle)
            .count()
    }

    // ── Line-discipline negotiation ──────────────────────────────────

    #[test]
    fn test_setup_terse_modem_issues_no_discipline_commands() {
        let (_, mock) = modem(&[]);
        assert_eq!(mock.wire(), PRELUDE);
    }

    #[test]
    fn test_setup_echo_only() {
        let mock = MockTransport::new(&["AT\r0\r\n", "ATE0\r0\r\n", "0\r\n"]);
        RockBlock::new(Box::new(mock.clone()), None).unwrap();
        assert_eq!(mock.wire(), b"AT\rATE0\rAT+SBDMTA=0\r");
    }

    #[test]
    fn test_setup_echo_and_verbose() {
        let mock = MockTransport::new(&[
            "AT\r\r\n", "OK\r\n", // probe: echoed AT, then verbose OK
            "ATE0\r\n", "OK\r\n", // echo off
            "0\r\n", // verbose off
            "0\r\n", // ring alerts off
        ]);
        RockBlock::new(Box::new(mock.clone()), None).unwrap();
        assert_eq!(mock.wire(), b"AT\rATE0\rATV0\rAT+SBDMTA=0\r");
    }

    #[test]
    fn test_setup_verbose_only() {
        let mock = MockTransport::new(&["\r\n", "0\r\n", "0\r\n", "0\r\n"]);
        RockBlock::new(Box::new(mock.clone()), None).unwrap();
        assert_eq!(mock.wire(), b"AT\rATV0\rAT+SBDMTA=0\r");
    }

    #[test]
    fn test_setup_unrecognized_probe_response() {
        let mock = MockTransport::new(&["ERROR\r\n"]);
        match RockBlock::new(Box::new(mock), None) {
            Err(Error::DeviceError { context, response }) => {
                assert_eq!(context, "line discipline probe");
                assert_eq!(response, "ERROR");
            }
            other => panic!("expected device error, got {other:?}"),
        }
    }

    // ── Pollers ──────────────────────────────────────────────────────

    #[test]
    fn test_check_sig_strength() {
        let (mut rb, _) = modem(&["+CSQF:4\r\n", "0\r\n"]);
        assert_eq!(rb.check_sig_strength().unwrap(), 4);
    }

    #[test]
    fn test_check_sig_strength_bad_prefix() {
        let (mut rb, _) = modem(&["CSQ:4\r\n"]);
        match rb.check_sig_strength() {
            Err(Error::DeviceError { context, .. }) => assert_eq!(context, "signal strength"),
            other => panic!("expected device error, got {other:?}"),
        }
    }

    #[test]
    fn test_signal_at_threshold_passes_without_retry() {
        let (mut rb, mock) = modem(&["+CSQF:2\r\n", "0\r\n"]);
        rb.signal_ok().unwrap();
        assert_eq!(count(&mock.wire(), b"AT+CSQF\r"), 1);
    }

    #[test]
    fn test_msstm_available() {
        let (mut rb, _) = modem(&["-MSSTM: 12abcd\r\n", "0\r\n"]);
        assert!(rb.check_msstm().unwrap());
    }

    #[test]
    fn test_msstm_no_service() {
        let (mut rb, _) = modem(&["-MSSTM: no network service\r\n", "0\r\n"]);
        assert!(!rb.check_msstm().unwrap());
    }

    #[test]
    fn test_msstm_ok_retries_until_service() {
        let (mut rb, mock) = modem(&[
            "-MSSTM: no network service\r\n",
            "0\r\n",
            "-MSSTM: 1a2b3c\r\n",
            "0\r\n",
        ]);
        rb.msstm_ok().unwrap();
        assert_eq!(count(&mock.wire(), b"AT-MSSTM\r"), 2);
    }

    // ── MT buffer reads ──────────────────────────────────────────────

    #[test]
    fn test_read_msg_known_length() {
        let (mut rb, mock) = modem(&["+SBDRT:\r\n", "WORLD0\r\n", "0\r\n", "0\r\n"]);
        assert_eq!(rb.read_msg_from_buffer(Some(5)).unwrap(), "WORLD");
        // MT buffer cleared after the read
        assert_eq!(count(&mock.wire(), b"AT+SBDD1\r"), 1);
    }

    #[test]
    fn test_read_msg_unknown_length() {
        let (mut rb, _) = modem(&["+SBDRT:\r\n", "STALE0\r\n", "0\r\n", "0\r\n"]);
        assert_eq!(rb.read_msg_from_buffer(None).unwrap(), "STALE");
    }

    #[test]
    fn test_read_msg_zero_length() {
        let (mut rb, _) = modem(&["+SBDRT:\r\n", "0\r\n", "0\r\n", "0\r\n"]);
        assert_eq!(rb.read_msg_from_buffer(Some(0)).unwrap(), "");
    }

    #[test]
    fn test_read_msg_length_mismatch() {
        let (mut rb, _) = modem(&["+SBDRT:\r\n", "WORLD0\r\n"]);
        match rb.read_msg_from_buffer(Some(3)) {
            Err(Error::IncorrectContentLength { expected, content }) => {
                assert_eq!(expected, 3);
                assert_eq!(content, "WORLD0");
            }
            other => panic!("expected length error, got {other:?}"),
        }
    }

    #[test]
    fn test_read_msg_missing_terminator() {
        let (mut rb, _) = modem(&["+SBDRT:\r\n", "WORLD\r\n"]);
        assert!(matches!(
            rb.read_msg_from_buffer(None),
            Err(Error::DeviceError { context: "buffer read", .. })
        ));
    }

    #[test]
    fn test_read_msg_bad_header() {
        let (mut rb, _) = modem(&["ERROR\r\n"]);
        assert!(matches!(
            rb.read_msg_from_buffer(Some(5)),
            Err(Error::DeviceError { context: "buffer read", .. })
        ));
    }

    // ── Sending ──────────────────────────────────────────────────────

    #[test]
    fn test_clean_send_no_mt() {
        let (mut rb, mock) = modem(&[
            "READY\r\n", "0\r\n", "0\r\n", // +SBDWT
            "-MSSTM: 12abcd\r\n", "0\r\n",
            "+CSQF:4\r\n", "0\r\n",
            "+SBDSX:0,0,0,0,0,0\r\n", "0\r\n",
            "+SBDIX:1,42,0,0,0,0\r\n", "0\r\n",
            "0\r\n", "0\r\n", // +SBDD0
        ]);
        let incidental = rb.send_recv("HELLO").unwrap();
        assert!(incidental.is_empty());

        let wire = mock.wire();
        let expected: &[u8] = b"AT+SBDWT\rHELLO\rAT-MSSTM\rAT+CSQF\rAT+SBDSX\rAT+SBDIX\rAT+SBDD0\r";
        assert_eq!(&wire[PRELUDE.len()..], expected);
        assert_eq!(mock.unread_lines(), 0);
    }

    #[test]
    fn test_send_with_incidental_mt() {
        let (mut rb, mock) = modem(&[
            "READY\r\n", "0\r\n", "0\r\n",
            "-MSSTM: 12abcd\r\n", "0\r\n",
            "+CSQF:4\r\n", "0\r\n",
            "+SBDSX:0,0,0,0,0,0\r\n", "0\r\n",
            "+SBDIX:2,43,1,17,5,0\r\n", "0\r\n",
            "+SBDRT:\r\n", "WORLD0\r\n", "0\r\n", "0\r\n", // read + clear MT
            "0\r\n", "0\r\n", // clear MO
        ]);
        let incidental = rb.send_recv("HELLO").unwrap();
        assert_eq!(incidental, vec!["WORLD".to_string()]);

        let wire = mock.wire();
        // MT cleared before MO
        assert_eq!(count(&wire, b"AT+SBDD1\r"), 1);
        assert_eq!(count(&wire, b"AT+SBDD0\r"), 1);
    }

    #[test]
    fn test_send_collects_stale_mt_before_first_session() {
        let (mut rb, mock) = modem(&[
            "READY\r\n", "0\r\n", "0\r\n",
            "-MSSTM: 12abcd\r\n", "0\r\n",
            "+CSQF:3\r\n", "0\r\n",
            "+SBDSX:0,0,1,9,0,0\r\n", "0\r\n", // stale MT in the buffer
            "+SBDRT:\r\n", "STALE0\r\n", "0\r\n", "0\r\n",
            "+SBDIX:0,44,0,0,0,0\r\n", "0\r\n",
            "0\r\n", "0\r\n",
        ]);
        let incidental = rb.send_recv("HELLO").unwrap();
        assert_eq!(incidental, vec!["STALE".to_string()]);
        // The stale read happens before the session is attempted.
        let wire = mock.wire();
        let rt = wire.windows(9).position(|w| w == b"AT+SBDRT\r").unwrap();
        let ix = wire.windows(9).position(|w| w == b"AT+SBDIX\r").unwrap();
        assert!(rt < ix);
    }

    #[test]
    fn test_send_retries_transient_mo_failure() {
        let (mut rb, mock) = modem(&[
            "READY\r\n", "0\r\n", "0\r\n",
            "-MSSTM: 12abcd\r\n", "0\r\n",
            "+CSQF:4\r\n", "0\r\n",
            "+SBDSX:0,0,0,0,0,0\r\n", "0\r\n",
            "+SBDIX:5,43,0,0,0,0\r\n", "0\r\n", // transient failure
            "+SBDIX:0,44,0,0,0,0\r\n", "0\r\n", // accepted
            "0\r\n", "0\r\n",
        ]);
        rb.send_recv("HELLO").unwrap();
        assert_eq!(count(&mock.wire(), b"AT+SBDIX\r"), 2);
    }

    #[test]
    fn test_send_fails_after_session_budget() {
        let (mut rb, mock) = modem(&[
            "READY\r\n", "0\r\n", "0\r\n",
            "-MSSTM: 12abcd\r\n", "0\r\n",
            "+CSQF:4\r\n", "0\r\n",
            "+SBDSX:0,0,0,0,0,0\r\n", "0\r\n",
            "+SBDIX:18,43,0,0,0,0\r\n", "0\r\n",
            "+SBDIX:18,43,0,0,0,0\r\n", "0\r\n",
            "+SBDIX:18,43,0,0,0,0\r\n", "0\r\n",
        ]);
        match rb.send_recv("HELLO") {
            Err(Error::Timeout { query, attempts }) => {
                assert_eq!(query, "Buffer send");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        let wire = mock.wire();
        assert_eq!(count(&wire, b"AT+SBDIX\r"), 3);
        // MO buffer must not be cleared after a failed send.
        assert_eq!(count(&wire, b"AT+SBDD0\r"), 0);
    }

    #[test]
    fn test_send_rejects_oversized_message() {
        let (mut rb, mock) = modem(&[]);
        let before = mock.wire().len();
        let msg = "x".repeat(341);
        match rb.send_recv(&msg) {
            Err(Error::MessageTooLong { len }) => assert_eq!(len, 341),
            other => panic!("expected message too long, got {other:?}"),
        }
        // No wire traffic for a rejected message.
        assert_eq!(mock.wire().len(), before);
    }

    #[test]
    fn test_send_accepts_limit_sized_message() {
        let msg = "x".repeat(340);
        let content = format!("{msg}\r");
        let (mut rb, mock) = modem(&[
            "READY\r\n", "0\r\n", "0\r\n",
            "-MSSTM: 12abcd\r\n", "0\r\n",
            "+CSQF:4\r\n", "0\r\n",
            "+SBDSX:0,0,0,0,0,0\r\n", "0\r\n",
            "+SBDIX:0,45,0,0,0,0\r\n", "0\r\n",
            "0\r\n", "0\r\n",
        ]);
        rb.send_recv(&msg).unwrap();
        assert_eq!(count(&mock.wire(), content.as_bytes()), 1);
    }

    // ── Receiving ────────────────────────────────────────────────────

    #[test]
    fn test_recv_all_nothing_pending() {
        let (mut rb, mock) = modem(&["+SBDSX:0,0,0,0,0,0\r\n", "0\r\n"]);
        assert!(rb.recv_all().unwrap().is_empty());
        assert_eq!(count(&mock.wire(), b"AT+SBDSX\r"), 1);
    }

    #[test]
    fn test_recv_all_drains_via_ring_alert() {
        let (mut rb, mock) = modem(&[
            "+SBDSX:0,0,0,0,1,1\r\n", "0\r\n", // ring alert pending
            "-MSSTM: 1a2b3c\r\n", "0\r\n",
            "+CSQF:5\r\n", "0\r\n",
            "+SBDIXA:0,1,1,7,5,0\r\n", "0\r\n",
            "+SBDRT:\r\n", "HELLO0\r\n", "0\r\n", "0\r\n",
            "+SBDSX:0,0,0,0,0,0\r\n", "0\r\n", // drained
        ]);
        let received = rb.recv_all().unwrap();
        assert_eq!(received, vec!["HELLO".to_string()]);

        let wire = mock.wire();
        // Ring alert answered with the alert form of the session command.
        assert_eq!(count(&wire, b"AT+SBDIXA\r"), 1);
        assert_eq!(count(&wire, b"AT+SBDSX\r"), 2);
    }

    #[test]
    fn test_recv_all_reads_buffered_mt_without_session() {
        let (mut rb, mock) = modem(&[
            "+SBDSX:0,0,1,2,0,0\r\n", "0\r\n", // MT already in the buffer
            "+SBDRT:\r\n", "PING0\r\n", "0\r\n", "0\r\n",
            "+SBDSX:0,0,0,0,0,0\r\n", "0\r\n",
        ]);
        let received = rb.recv_all().unwrap();
        assert_eq!(received, vec!["PING".to_string()]);

        let wire = mock.wire();
        // Direct buffer read: no session, no time or signal polling.
        assert_eq!(count(&wire, b"AT+SBDIX"), 0);
        assert_eq!(count(&wire, b"AT-MSSTM\r"), 0);
        assert_eq!(count(&wire, b"AT+CSQF\r"), 0);
    }

    #[test]
    fn test_recv_all_gateway_queue_uses_plain_session() {
        let (mut rb, mock) = modem(&[
            "+SBDSX:0,0,0,0,0,2\r\n", "0\r\n", // queued at the gateway, no RA
            "-MSSTM: 1a2b3c\r\n", "0\r\n",
            "+CSQF:4\r\n", "0\r\n",
            "+SBDIX:0,1,1,7,3,1\r\n", "0\r\n",
            "+SBDRT:\r\n", "ONE0\r\n", "0\r\n", "0\r\n",
            "+SBDSX:0,0,0,0,0,1\r\n", "0\r\n",
            "-MSSTM: 1a2b3c\r\n", "0\r\n",
            "+CSQF:4\r\n", "0\r\n",
            "+SBDIX:0,2,1,8,3,0\r\n", "0\r\n",
            "+SBDRT:\r\n", "TWO0\r\n", "0\r\n", "0\r\n",
            "+SBDSX:0,0,0,0,0,0\r\n", "0\r\n",
        ]);
        let received = rb.recv_all().unwrap();
        assert_eq!(received, vec!["ONE".to_string(), "TWO".to_string()]);
        assert_eq!(count(&mock.wire(), b"AT+SBDIXA\r"), 0);
    }

    #[test]
    fn test_recv_buffer_exhaustion() {
        let (mut rb, _) = modem(&[
            "+SBDIX:0,1,0,0,0,0\r\n", "0\r\n",
            "+SBDIX:0,2,0,0,0,0\r\n", "0\r\n",
            "+SBDIX:0,3,2,0,0,0\r\n", "0\r\n", // mt=2 is an error, not a delivery
        ]);
        match rb.recv_buffer(false) {
            Err(Error::Timeout { query, attempts }) => {
                assert_eq!(query, "Buffer recv");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_session_tolerates_blank_lines() {
        let (mut rb, _) = modem(&["", "\r\n", "", "+SBDIX:0,9,0,0,0,0\r\n", "0\r\n"]);
        let status = rb.session(false).unwrap();
        assert_eq!(status.momsn, 9);
    }

    #[test]
    fn test_session_garbage_response() {
        let (mut rb, _) = modem(&["+SBDIX:not,numbers,at,all,0,0\r\n"]);
        assert!(matches!(
            rb.session(false),
            Err(Error::DeviceError { context: "session", .. })
        ));
    }

    #[test]
    fn test_msg_waiting() {
        let (mut rb, _) = modem(&[
            "+SBDSX:0,0,0,0,1,0\r\n", "0\r\n",
            "+SBDSX:0,0,0,0,0,0\r\n", "0\r\n",
        ]);
        assert!(rb.msg_waiting().unwrap());
        assert!(!rb.msg_waiting().unwrap());
    }

    // ── Close ────────────────────────────────────────────────────────

    #[test]
    fn test_close_restores_line_discipline() {
        let (rb, mock) = modem(&["\r\n", "\r\n", "OK\r\n"]);
        rb.close().unwrap();
        let wire = mock.wire();
        assert!(wire.ends_with(b"ATE1V1\r"));
    }

    #[test]
    fn test_close_propagates_unexpected_response() {
        let (rb, _) = modem(&["ERROR\r\n"]);
        assert!(matches!(
            rb.close(),
            Err(Error::ExpectationFailure { .. })
        ));
    }

    // ── Message log integration ──────────────────────────────────────

    #[test]
    fn test_send_and_incidental_reads_hit_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.log");
        let log = MessageLog::open(&path).unwrap();

        let script = [
            "0\r\n", "0\r\n", // negotiation
            "READY\r\n", "0\r\n", "0\r\n",
            "-MSSTM: 12abcd\r\n", "0\r\n",
            "+CSQF:4\r\n", "0\r\n",
            "+SBDSX:0,0,0,0,0,0\r\n", "0\r\n",
            "+SBDIX:2,43,1,17,5,0\r\n", "0\r\n",
            "+SBDRT:\r\n", "WORLD0\r\n", "0\r\n", "0\r\n",
            "0\r\n", "0\r\n",
        ];
        let mock = MockTransport::new(&script);
        let mut rb = RockBlock::new(Box::new(mock), Some(log)).unwrap();
        rb.send_recv("HELLO").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        // The incidental MT is logged at the point of read, before the
        // outbound record for the send that triggered it.
        assert!(lines[0].ends_with(" <--- WORLD"));
        assert!(lines[1].ends_with(" ---> HELLO"));
    }
}
