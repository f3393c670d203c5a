//! STOMP 1.2 text framing for the broker session.
//!
//! Wire format: `COMMAND\n` + `name:value\n`* + `\n` + body + `\0`.
//! A bare end-of-line between frames is a heartbeat.

use crate::error::{ChatError, ChatResult};

/// Versions offered in the CONNECT frame.
pub const ACCEPT_VERSION: &str = "1.2,1.1,1.0";

/// STOMP frame commands used by the client and the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            // STOMP is an alias of CONNECT in 1.2
            "CONNECT" | "STOMP" => Some(Self::Connect),
            "CONNECTED" => Some(Self::Connected),
            "SEND" => Some(Self::Send),
            "SUBSCRIBE" => Some(Self::Subscribe),
            "UNSUBSCRIBE" => Some(Self::Unsubscribe),
            "DISCONNECT" => Some(Self::Disconnect),
            "MESSAGE" => Some(Self::Message),
            "RECEIPT" => Some(Self::Receipt),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }

    /// CONNECT and CONNECTED headers are exempt from value escaping.
    fn escapes_headers(&self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

/// Heartbeat periods in milliseconds. Zero disables that direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    pub outgoing_ms: u64,
    pub incoming_ms: u64,
}

impl HeartBeat {
    pub fn new(outgoing_ms: u64, incoming_ms: u64) -> Self {
        Self {
            outgoing_ms,
            incoming_ms,
        }
    }

    /// Parse a `heart-beat:<x>,<y>` header value.
    pub fn parse(value: &str) -> ChatResult<Self> {
        let (x, y) = value
            .split_once(',')
            .ok_or_else(|| ChatError::Frame(format!("invalid heart-beat header: {value}")))?;
        let parse = |s: &str| {
            s.trim()
                .parse::<u64>()
                .map_err(|_| ChatError::Frame(format!("invalid heart-beat header: {value}")))
        };
        Ok(Self::new(parse(x)?, parse(y)?))
    }

    /// Agree on effective periods from the client's request and the
    /// broker's CONNECTED reply.
    pub fn negotiate(client: HeartBeat, server: HeartBeat) -> HeartBeat {
        let pick = |ours: u64, theirs: u64| {
            if ours == 0 || theirs == 0 {
                0
            } else {
                ours.max(theirs)
            }
        };
        HeartBeat {
            outgoing_ms: pick(client.outgoing_ms, server.incoming_ms),
            incoming_ms: pick(client.incoming_ms, server.outgoing_ms),
        }
    }

    pub fn header_value(&self) -> String {
        format!("{},{}", self.outgoing_ms, self.incoming_ms)
    }
}

/// A single STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Look up a header. When repeated, the first occurrence wins.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn connect(heart_beat: HeartBeat) -> Self {
        Frame::new(Command::Connect)
            .header("accept-version", ACCEPT_VERSION)
            .header("heart-beat", heart_beat.header_value())
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
    }

    pub fn unsubscribe(id: &str) -> Self {
        Frame::new(Command::Unsubscribe).header("id", id)
    }

    pub fn send(destination: &str, body: impl Into<String>) -> Self {
        let body = body.into();
        Frame::new(Command::Send)
            .header("destination", destination)
            .header("content-length", body.len().to_string())
            .with_body(body)
    }

    pub fn disconnect(receipt: &str) -> Self {
        Frame::new(Command::Disconnect).header("receipt", receipt)
    }

    /// Serialize to the text form sent over the socket.
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(32 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

fn escape_header(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_header(s: &str) -> ChatResult<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(ChatError::Frame(format!(
                    "undefined escape sequence \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

/// One unit read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Heartbeat,
    Frame(Frame),
}

/// Streaming frame decoder: accumulates socket text and yields complete frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    /// Feed text into the decoder and return every complete frame or heartbeat.
    ///
    /// A framing violation is returned as an error; the offending bytes are
    /// discarded so the decoder is usable afterwards.
    pub fn feed(&mut self, data: &str) -> ChatResult<Vec<Inbound>> {
        self.buffer.push_str(data);
        let mut out = Vec::new();

        loop {
            let eol = leading_eol_len(&self.buffer);
            if eol > 0 {
                self.buffer.drain(..eol);
                out.push(Inbound::Heartbeat);
                continue;
            }
            if self.buffer.is_empty() {
                break;
            }

            let Some((head_end, sep_len)) = find_header_end(&self.buffer) else {
                break;
            };
            let frame = match parse_head(&self.buffer[..head_end]) {
                Ok(f) => f,
                Err(e) => {
                    self.discard_through_nul();
                    return Err(e);
                }
            };
            let body_start = head_end + sep_len;

            let consumed = match frame.get("content-length") {
                Some(len) => {
                    let len: usize = match len.trim().parse() {
                        Ok(n) => n,
                        Err(_) => {
                            self.discard_through_nul();
                            return Err(ChatError::Frame(format!("invalid content-length: {len}")));
                        }
                    };
                    let Some(body_end) = body_start.checked_add(len) else {
                        self.discard_through_nul();
                        return Err(ChatError::Frame(format!("content-length out of range: {len}")));
                    };
                    if self.buffer.len() <= body_end {
                        break;
                    }
                    let Some(body) = self.buffer.get(body_start..body_end) else {
                        self.discard_through_nul();
                        return Err(ChatError::Frame("content-length splits a character".into()));
                    };
                    if self.buffer.as_bytes()[body_end] != 0 {
                        self.discard_through_nul();
                        return Err(ChatError::Frame("missing NUL after body".into()));
                    }
                    out.push(Inbound::Frame(frame.with_body(body)));
                    body_end + 1
                }
                None => {
                    let Some(nul) = self.buffer[body_start..].find('\0') else {
                        break;
                    };
                    let body = &self.buffer[body_start..body_start + nul];
                    out.push(Inbound::Frame(frame.with_body(body)));
                    body_start + nul + 1
                }
            };
            self.buffer.drain(..consumed);
        }

        Ok(out)
    }

    /// Reset internal buffer.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Number of bytes waiting for the rest of their frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn discard_through_nul(&mut self) {
        match self.buffer.find('\0') {
            Some(i) => {
                self.buffer.drain(..=i);
            }
            None => self.buffer.clear(),
        }
    }
}

fn leading_eol_len(s: &str) -> usize {
    if s.starts_with('\n') {
        1
    } else if s.starts_with("\r\n") {
        2
    } else {
        0
    }
}

fn find_header_end(s: &str) -> Option<(usize, usize)> {
    let lf = s.find("\n\n").map(|i| (i, 2));
    let crlf = s.find("\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_head(head: &str) -> ChatResult<Frame> {
    let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));
    let command_line = lines.next().unwrap_or_default();
    let command = Command::parse(command_line)
        .ok_or_else(|| ChatError::Frame(format!("unknown command: {command_line}")))?;
    let escaped = command.escapes_headers();

    let mut frame = Frame::new(command);
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ChatError::Frame(format!("malformed header line: {line}")))?;
        if escaped {
            frame.headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            frame.headers.push((name.to_string(), value.to_string()));
        }
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(items: Vec<Inbound>) -> Vec<Frame> {
        items
            .into_iter()
            .filter_map(|i| match i {
                Inbound::Frame(f) => Some(f),
                Inbound::Heartbeat => None,
            })
            .collect()
    }

    #[test]
    fn connect_frame_matches_wire_format() {
        let text = Frame::connect(HeartBeat::new(10000, 10000)).encode();
        assert_eq!(
            text,
            "CONNECT\naccept-version:1.2,1.1,1.0\nheart-beat:10000,10000\n\n\0"
        );
    }

    #[test]
    fn send_frame_carries_content_length() {
        let text = Frame::send("/app/chat.typing", r#"{"idConversacion":1,"idUsuario":2}"#).encode();
        assert_eq!(
            text,
            "SEND\ndestination:/app/chat.typing\ncontent-length:34\n\n{\"idConversacion\":1,\"idUsuario\":2}\0"
        );
    }

    #[test]
    fn decodes_message_split_across_chunks() {
        let wire = "MESSAGE\nsubscription:sub-0\ndestination:/topic/conversacion/7\nmessage-id:1\n\n42\0";
        let mut decoder = FrameDecoder::new();
        let (a, b) = wire.split_at(20);
        assert!(decoder.feed(a).unwrap().is_empty());
        let got = frames(decoder.feed(b).unwrap());
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].command, Command::Message);
        assert_eq!(got[0].get("subscription"), Some("sub-0"));
        assert_eq!(got[0].body, "42");
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn heartbeats_between_frames() {
        let mut decoder = FrameDecoder::new();
        let out = decoder
            .feed("\n\r\nRECEIPT\nreceipt-id:close-1\n\n\0\n")
            .unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], Inbound::Heartbeat);
        assert_eq!(out[1], Inbound::Heartbeat);
        assert!(matches!(out[2], Inbound::Frame(ref f) if f.command == Command::Receipt));
        assert_eq!(out[3], Inbound::Heartbeat);
    }

    #[test]
    fn content_length_allows_nul_in_body() {
        let mut decoder = FrameDecoder::new();
        let got = frames(
            decoder
                .feed("MESSAGE\nsubscription:s\ncontent-length:3\n\na\0b\0")
                .unwrap(),
        );
        assert_eq!(got[0].body, "a\0b");
    }

    #[test]
    fn content_length_waits_for_full_body() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder
            .feed("MESSAGE\ncontent-length:5\n\nab")
            .unwrap()
            .is_empty());
        let got = frames(decoder.feed("cde\0").unwrap());
        assert_eq!(got[0].body, "abcde");
    }

    #[test]
    fn overflowing_content_length_is_a_frame_error() {
        let mut decoder = FrameDecoder::new();
        let err = decoder
            .feed("MESSAGE\ndestination:/a\ncontent-length:18446744073709551615\n\nx\0")
            .unwrap_err();
        assert!(matches!(err, ChatError::Frame(_)));
        assert_eq!(decoder.pending(), 0);
        let got = frames(decoder.feed("RECEIPT\nreceipt-id:1\n\n\0").unwrap());
        assert_eq!(got.len(), 1);
    }

    #[test]
    fn oversized_content_length_waits_without_panicking() {
        let mut decoder = FrameDecoder::new();
        let got = decoder
            .feed("MESSAGE\ncontent-length:9223372036854775807\n\nx\0")
            .unwrap();
        assert!(got.is_empty());
        assert!(decoder.pending() > 0);
    }

    #[test]
    fn header_escaping_round_trips() {
        let frame = Frame::new(Command::Send)
            .header("destination", "/a")
            .header("note", "x:y\nz\\");
        let encoded = frame.encode();
        assert!(encoded.contains("note:x\\cy\\nz\\\\\n"));
        let mut decoder = FrameDecoder::new();
        let got = frames(decoder.feed(&encoded).unwrap());
        assert_eq!(got[0].get("note"), Some("x:y\nz\\"));
    }

    #[test]
    fn connected_headers_are_not_unescaped() {
        let mut decoder = FrameDecoder::new();
        let got = frames(
            decoder
                .feed("CONNECTED\nversion:1.2\nserver:a\\cb\nheart-beat:0,0\n\n\0")
                .unwrap(),
        );
        assert_eq!(got[0].get("server"), Some("a\\cb"));
    }

    #[test]
    fn first_repeated_header_wins() {
        let mut decoder = FrameDecoder::new();
        let got = frames(decoder.feed("MESSAGE\nfoo:1\nfoo:2\n\n\0").unwrap());
        assert_eq!(got[0].get("foo"), Some("1"));
    }

    #[test]
    fn unknown_command_is_an_error_and_is_discarded() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed("BOGUS\n\n\0").is_err());
        assert_eq!(decoder.pending(), 0);
        let got = frames(decoder.feed("RECEIPT\nreceipt-id:1\n\n\0").unwrap());
        assert_eq!(got.len(), 1);
    }

    #[test]
    fn heartbeat_negotiation() {
        let client = HeartBeat::new(10000, 10000);
        assert_eq!(
            HeartBeat::negotiate(client, HeartBeat::new(0, 0)),
            HeartBeat::new(0, 0)
        );
        assert_eq!(
            HeartBeat::negotiate(client, HeartBeat::new(4000, 20000)),
            HeartBeat::new(20000, 10000)
        );
        assert_eq!(
            HeartBeat::negotiate(HeartBeat::new(0, 5000), HeartBeat::new(8000, 8000)),
            HeartBeat::new(0, 8000)
        );
    }

    #[test]
    fn heartbeat_header_parse() {
        assert_eq!(HeartBeat::parse("0,4000").unwrap(), HeartBeat::new(0, 4000));
        assert!(HeartBeat::parse("nope").is_err());
    }
}
