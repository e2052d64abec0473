//! Message grammar: fixed positional patterns and create templates
//!
//! A pattern is literal text with typed placeholders:
//! - `{int}`: one or more ASCII digits
//! - `{float}`: one or more ASCII digits or dots
//! - `{rest}`: any text, possibly empty
//!
//! Patterns are anchored at both ends. A template is literal text with `{}`
//! placeholders filled in argument order. There is no quoting or escaping, so a
//! `{rest}` capture is the only way to carry commas or parentheses.

use std::fmt;

use super::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token<'p> {
    Lit(&'p str),
    Int,
    Float,
    Rest,
}

fn tokenize(pattern: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut rest = pattern;
    while !rest.is_empty() {
        let next = ["{int}", "{float}", "{rest}"]
            .iter()
            .filter_map(|p| rest.find(p).map(|i| (i, *p)))
            .min_by_key(|(i, _)| *i);

        match next {
            Some((0, p)) => {
                tokens.push(match p {
                    "{int}" => Token::Int,
                    "{float}" => Token::Float,
                    _ => Token::Rest,
                });
                rest = &rest[p.len()..];
            }
            Some((i, _)) => {
                tokens.push(Token::Lit(&rest[..i]));
                rest = &rest[i..];
            }
            None => {
                tokens.push(Token::Lit(rest));
                rest = "";
            }
        }
    }
    tokens
}

/// Backtracking match of `tokens` against the whole of `input`
fn match_tokens<'i>(tokens: &[Token<'_>], input: &'i str, out: &mut Vec<&'i str>) -> bool {
    let Some((first, tail)) = tokens.split_first() else {
        return input.is_empty();
    };

    match first {
        Token::Lit(lit) => match input.strip_prefix(*lit) {
            Some(rest) => match_tokens(tail, rest, out),
            None => false,
        },
        Token::Int | Token::Float => {
            let accepts = |b: u8| b.is_ascii_digit() || (*first == Token::Float && b == b'.');
            let longest = input.bytes().take_while(|b| accepts(*b)).count();
            for len in (1..=longest).rev() {
                out.push(&input[..len]);
                if match_tokens(tail, &input[len..], out) {
                    return true;
                }
                out.pop();
            }
            false
        }
        Token::Rest => {
            let mut ends: Vec<usize> = input.char_indices().map(|(i, _)| i).collect();
            ends.push(input.len());
            for end in ends.into_iter().rev() {
                out.push(&input[..end]);
                if match_tokens(tail, &input[end..], out) {
                    return true;
                }
                out.pop();
            }
            false
        }
    }
}

/// Values captured by a successful [`Message::parse`]
#[derive(Debug, Clone, PartialEq)]
pub struct Captures {
    message: &'static str,
    values: Vec<String>,
}

impl Captures {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn str(&self, index: usize) -> Result<&str, ProtocolError> {
        self.values
            .get(index)
            .map(String::as_str)
            .ok_or(ProtocolError::WrongArgumentCount {
                message: self.message,
                expected: index + 1,
                got: self.values.len(),
            })
    }

    pub fn int(&self, index: usize) -> Result<i64, ProtocolError> {
        self.str(index)?
            .parse()
            .map_err(|_| self.malformed(index, "integer"))
    }

    /// Team and player numbers
    pub fn uint(&self, index: usize) -> Result<u32, ProtocolError> {
        self.str(index)?
            .parse()
            .map_err(|_| self.malformed(index, "unsigned integer"))
    }

    pub fn float(&self, index: usize) -> Result<f64, ProtocolError> {
        self.str(index)?
            .parse()
            .map_err(|_| self.malformed(index, "number"))
    }

    fn malformed(&self, index: usize, expected: &'static str) -> ProtocolError {
        ProtocolError::MalformedCapture {
            body: self.values.join(","),
            index,
            expected,
        }
    }
}

/// A message kind on the wire.
///
/// Receive-only messages have no template, send-only messages have no pattern.
#[derive(Debug)]
pub struct Message {
    name: &'static str,
    pattern: Option<&'static str>,
    template: Option<&'static str>,
}

impl Message {
    pub const fn new(
        name: &'static str,
        pattern: Option<&'static str>,
        template: Option<&'static str>,
    ) -> Self {
        Self {
            name,
            pattern,
            template,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Match `body` against this message's grammar.
    /// `None` when the body is some other message (or this one is send-only).
    pub fn parse(&self, body: &str) -> Option<Captures> {
        let pattern = self.pattern?;
        let tokens = tokenize(pattern);
        let mut out = Vec::new();
        if match_tokens(&tokens, body, &mut out) {
            Some(Captures {
                message: self.name,
                values: out.into_iter().map(str::to_string).collect(),
            })
        } else {
            None
        }
    }

    pub fn matches(&self, body: &str) -> bool {
        self.parse(body).is_some()
    }

    /// Fill the template with `args`
    pub fn create(&self, args: &[&dyn fmt::Display]) -> Result<String, ProtocolError> {
        let template = self
            .template
            .ok_or(ProtocolError::CreateNotSupported(self.name))?;

        let expected = template.matches("{}").count();
        if expected != args.len() {
            return Err(ProtocolError::WrongArgumentCount {
                message: self.name,
                expected,
                got: args.len(),
            });
        }

        let mut out = String::with_capacity(template.len() + args.len() * 8);
        let mut pieces = template.split("{}");
        if let Some(head) = pieces.next() {
            out.push_str(head);
        }
        for (piece, arg) in pieces.zip(args) {
            out.push_str(&arg.to_string());
            out.push_str(piece);
        }
        Ok(out)
    }
}

// Both directions
pub static PING: Message = Message::new("Ping", Some("Ping()"), Some("Ping()"));
pub static PONG: Message = Message::new("Pong", Some("Pong({float},{int})"), Some("Pong({},{})"));

// Client to server
pub static HELLO: Message = Message::new("Hello", Some("Hello()"), Some("Hello()"));
pub static RECV: Message = Message::new(
    "Recv",
    Some("Recv({int},{int},{rest})"),
    Some("Recv({},{},{})"),
);
pub static SENT: Message = Message::new(
    "Sent",
    Some("Sent({int},{int},{rest})"),
    Some("Sent({},{},{})"),
);

// Server to client
pub static TEAM_PLAYER: Message = Message::new(
    "TeamPlayer",
    Some("TeamPlayer({int},{int})"),
    Some("TeamPlayer({},{})"),
);
pub static PLAYER_SNAPSHOT: Message = Message::new(
    "PlayerSnapshot",
    Some("PlayerSnapshot({rest})"),
    Some("PlayerSnapshot({})"),
);
pub static PARAMETERS_SNAPSHOT: Message = Message::new(
    "ParametersSnapshot",
    Some("ParametersSnapshot({rest})"),
    Some("ParametersSnapshot({})"),
);
pub static START_GAME: Message = Message::new(
    "StartGame",
    Some("StartGame({int})"),
    Some("StartGame({})"),
);
pub static STOP_GAME: Message = Message::new("StopGame", Some("StopGame()"), Some("StopGame()"));
pub static RESET_GAME: Message =
    Message::new("ResetGame", Some("ResetGame()"), Some("ResetGame()"));
pub static DELETED: Message = Message::new("Deleted", Some("Deleted()"), Some("Deleted()"));
pub static START_INITIALISING: Message = Message::new(
    "StartInitialising",
    Some("StartInitialising()"),
    Some("StartInitialising()"),
);

// Gun sub-messages, carried inside Recv/Sent
pub static HIT: Message = Message::new("Hit", Some("H{int},{int},{int}"), None);
pub static TRIGGER: Message = Message::new("Trigger", Some("T"), None);
pub static TRIGGER_RELEASE: Message = Message::new("TriggerRelease", Some("t"), None);
pub static FULL_AMMO: Message = Message::new("FullAmmo", Some("FA"), None);
pub static INIT_HIT: Message = Message::new("InitHit", Some("InitHit"), None);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recv_captures_nested_body() {
        let caps = RECV.parse("Recv(1,2,H2,1,3)").unwrap();
        assert_eq!(caps.int(0).unwrap(), 1);
        assert_eq!(caps.int(1).unwrap(), 2);
        assert_eq!(caps.str(2).unwrap(), "H2,1,3");

        let inner = HIT.parse(caps.str(2).unwrap()).unwrap();
        assert_eq!(inner.int(0).unwrap(), 2);
        assert_eq!(inner.int(1).unwrap(), 1);
        assert_eq!(inner.int(2).unwrap(), 3);
    }

    #[test]
    fn rest_capture_can_hold_parentheses() {
        let body = r#"PlayerSnapshot({"teamID":1,"playerID":2})"#;
        let caps = PLAYER_SNAPSHOT.parse(body).unwrap();
        assert_eq!(caps.str(0).unwrap(), r#"{"teamID":1,"playerID":2}"#);
    }

    #[test]
    fn multi_digit_ids_are_accepted() {
        let caps = HIT.parse("H12,31,100").unwrap();
        assert_eq!(caps.int(0).unwrap(), 12);
        assert_eq!(caps.int(1).unwrap(), 31);
        assert_eq!(caps.int(2).unwrap(), 100);
    }

    #[test]
    fn patterns_are_anchored() {
        assert!(TRIGGER.matches("T"));
        assert!(!TRIGGER.matches("t"));
        assert!(!TRIGGER.matches("TT"));
        assert!(!HELLO.matches("Hello() "));
        assert!(!START_GAME.matches("StartGame()"));
        assert!(!START_GAME.matches("StartGame(-5)"));
        assert!(!PING.matches("Pong(1,0)"));
    }

    #[test]
    fn pong_accepts_fractional_times() {
        let caps = PONG.parse("Pong(1516565652.25,1)").unwrap();
        assert_eq!(caps.float(0).unwrap(), 1516565652.25);
        assert_eq!(caps.int(1).unwrap(), 1);
    }

    #[test]
    fn create_fills_template() {
        assert_eq!(PING.create(&[]).unwrap(), "Ping()");
        assert_eq!(PONG.create(&[&1516565652.0, &1]).unwrap(), "Pong(1516565652,1)");
        assert_eq!(RECV.create(&[&1, &2, &"T"]).unwrap(), "Recv(1,2,T)");
        assert_eq!(TEAM_PLAYER.create(&[&3, &4]).unwrap(), "TeamPlayer(3,4)");
    }

    #[test]
    fn create_on_receive_only_message_fails() {
        let err = HIT.create(&[&1, &2, &3]).unwrap_err();
        assert!(matches!(err, ProtocolError::CreateNotSupported("Hit")));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn create_checks_argument_count() {
        let err = START_GAME.create(&[]).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::WrongArgumentCount {
                expected: 1,
                got: 0,
                ..
            }
        ));
    }

    #[test]
    fn overflowing_integer_is_a_malformed_capture() {
        let caps = START_GAME.parse("StartGame(99999999999999999999999)").unwrap();
        assert!(matches!(
            caps.int(0),
            Err(ProtocolError::MalformedCapture { index: 0, .. })
        ));
    }
}
