//! The `E(<hex id>,<time>,<body>)` wrapper around every line on the wire

use std::fmt;

use super::error::ProtocolError;

/// A message from a particular sender at a particular (sender clock) time.
/// Sender id 0 is conventionally the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub sender_id: u64,
    pub time: f64,
    pub body: String,
}

impl Envelope {
    pub fn new(sender_id: u64, time: f64, body: impl Into<String>) -> Self {
        Self {
            sender_id,
            time,
            body: body.into(),
        }
    }

    /// Parse a full line (without its trailing newline).
    ///
    /// The id is lowercase hex and the time is digits and dots only. The body is
    /// everything between the second comma and the final `)`, so it may itself
    /// contain commas and parentheses.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let malformed = || ProtocolError::MalformedEnvelope(line.to_string());

        let inner = line
            .strip_prefix("E(")
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(malformed)?;

        let (id, rest) = inner.split_once(',').ok_or_else(malformed)?;
        let (time, body) = rest.split_once(',').ok_or_else(malformed)?;

        if id.is_empty() || !id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(malformed());
        }
        if time.is_empty() || !time.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
            return Err(malformed());
        }

        let sender_id = u64::from_str_radix(id, 16).map_err(|_| malformed())?;
        let time = time.parse::<f64>().map_err(|_| malformed())?;

        Ok(Self {
            sender_id,
            time,
            body: body.to_string(),
        })
    }

    /// Serialize without the trailing newline
    pub fn to_line(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E({:x},{:.6},{})", self.sender_id, self.time, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_envelope() {
        let env = Envelope::parse("E(123def,1516565652,Ping())").unwrap();
        assert_eq!(env.sender_id, 0x123def);
        assert_eq!(env.time, 1516565652.0);
        assert_eq!(env.body, "Ping()");
    }

    #[test]
    fn body_keeps_commas_and_parens() {
        let env = Envelope::parse("E(0,100.25,Recv(1,2,H2,1,3))").unwrap();
        assert_eq!(env.time, 100.25);
        assert_eq!(env.body, "Recv(1,2,H2,1,3)");
    }

    #[test]
    fn rejects_malformed_lines() {
        for line in [
            "",
            "Ping()",
            "E(123def,100,Ping()",
            "E(XYZ,100,Ping())",
            "E(0x12,100,Ping())",
            "E(12,-5,Ping())",
            "E(12,abc,Ping())",
            "E(12,1.2.3,Ping())",
            "E(,100,Ping())",
            "E(12,100)",
        ] {
            let err = Envelope::parse(line).unwrap_err();
            assert!(err.is_recoverable(), "{line} should be a malformed envelope");
        }
    }

    #[test]
    fn serializes_lowercase_hex_and_fixed_time() {
        let env = Envelope::new(0xABC, 12.5, "Hello()");
        assert_eq!(env.to_line(), "E(abc,12.500000,Hello())");
    }

    #[test]
    fn serialized_envelope_parses_back() {
        let env = Envelope::new(u64::MAX, 1516565652.125, "Recv(1,1,T)");
        assert_eq!(Envelope::parse(&env.to_line()).unwrap(), env);
    }
}
