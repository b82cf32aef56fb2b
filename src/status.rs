//! Session and mailbox status records reported by the modem.

/// Result of a satellite session (`+SBDIX` / `+SBDIXA`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbdixStatus {
    /// MO transfer outcome: 0..=4 success, 5..=8 fatal, 10.. transient.
    pub mo: u32,
    /// MO message sequence number assigned by the gateway.
    pub momsn: u32,
    /// MT outcome: 0 none, 1 one message delivered to the buffer, 2 error.
    pub mt: u32,
    /// MT message sequence number.
    pub mtmsn: u32,
    /// Byte length of the MT payload now in the MT buffer.
    pub mt_len: u32,
    /// Further MT messages queued at the gateway.
    pub mt_queued: u32,
}

impl SbdixStatus {
    /// Parse the comma list following the `+SBDIX:` / `+SBDIXA:` header.
    pub fn parse(fields: &str) -> Option<Self> {
        let v = parse_comma_list(fields)?;
        if v.len() != 6 {
            return None;
        }
        Some(Self {
            mo: v[0],
            momsn: v[1],
            mt: v[2],
            mtmsn: v[3],
            mt_len: v[4],
            mt_queued: v[5],
        })
    }

    /// Whether the gateway accepted the MO transfer.
    pub fn mo_accepted(&self) -> bool {
        self.mo <= 4
    }
}

/// Result of a status query (`+SBDSX`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbdsxStatus {
    pub mo: u32,
    pub momsn: u32,
    /// 1 iff the local MT buffer holds an undelivered message.
    pub mt: u32,
    pub mtmsn: u32,
    /// 1 iff a ring alert is pending.
    pub ra: u32,
    /// Gateway's queued MT count.
    pub msg_waiting: u32,
}

impl SbdsxStatus {
    /// Parse the comma list following the `+SBDSX:` header.
    pub fn parse(fields: &str) -> Option<Self> {
        let v = parse_comma_list(fields)?;
        if v.len() != 6 {
            return None;
        }
        Some(Self {
            mo: v[0],
            momsn: v[1],
            mt: v[2],
            mtmsn: v[3],
            ra: v[4],
            msg_waiting: v[5],
        })
    }

    /// Whether anything is deliverable: an MT already in the buffer, a ring
    /// alert, or messages queued at the gateway.
    pub fn pending(&self) -> bool {
        self.mt == 1 || self.ra == 1 || self.msg_waiting > 0
    }
}

/// Parse a string of the form ` a, b, c` into a list of integers.
fn parse_comma_list(txt: &str) -> Option<Vec<u32>> {
    txt.split(',').map(|elm| elm.trim().parse().ok()).collect()
}
