//! SAM reply line parser
//!
//! Replies are a one- or two-word verb followed by `KEY=VALUE` arguments.
//! Values may be double-quoted (quotes are stripped, spaces inside them
//! preserved) and may themselves contain `=`, so pairs split on the first
//! `=` only. `PING`/`PONG` carry an opaque remainder instead of arguments.

use std::collections::HashMap;

/// The reply types the client reacts to, with a catch-all for whatever a
/// newer router might send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    HelloReply,
    SessionStatus,
    StreamStatus,
    NamingReply,
    DestReply,
    QuitStatus,
    Ping,
    Pong,
    Other,
}

impl ReplyKind {
    fn from_verb(verb: &str) -> Self {
        match verb {
            "HELLO REPLY" => ReplyKind::HelloReply,
            "SESSION STATUS" => ReplyKind::SessionStatus,
            "STREAM STATUS" => ReplyKind::StreamStatus,
            "NAMING REPLY" => ReplyKind::NamingReply,
            "DEST REPLY" => ReplyKind::DestReply,
            "QUIT STATUS" => ReplyKind::QuitStatus,
            "PING" => ReplyKind::Ping,
            "PONG" => ReplyKind::Pong,
            _ => ReplyKind::Other,
        }
    }
}

/// A parsed reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamReply {
    pub kind: ReplyKind,
    pub verb: String,
    pub args: HashMap<String, String>,
    /// Verbatim remainder for PING/PONG.
    pub remainder: String,
}

impl SamReply {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.args.get(key).map(String::as_str)
    }

    pub fn result(&self) -> Option<&str> {
        self.get("RESULT")
    }

    pub fn result_ok(&self) -> bool {
        self.result() == Some("OK")
    }

    /// The router's human-readable failure reason, falling back to the
    /// RESULT code.
    pub fn reason(&self) -> String {
        match (self.get("MESSAGE"), self.result()) {
            (Some(message), Some(result)) => format!("{result}: {message}"),
            (Some(message), None) => message.to_string(),
            (None, Some(result)) => result.to_string(),
            (None, None) => self.verb.clone(),
        }
    }
}

/// Split a line on spaces, except inside double-quoted regions. The
/// quotes themselves are stripped.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in line.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            ' ' if !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

pub fn parse_message(line: &str) -> SamReply {
    let line = line.trim_end_matches(['\r', '\n']);

    // PING/PONG keep their remainder verbatim for the echo reply
    for verb in ["PING", "PONG"] {
        if line == verb || line.starts_with(&format!("{verb} ")) {
            let remainder = line[verb.len()..].trim_start().to_string();
            return SamReply {
                kind: ReplyKind::from_verb(verb),
                verb: verb.to_string(),
                args: HashMap::new(),
                remainder,
            };
        }
    }

    let tokens = tokenize(line);
    let mut iter = tokens.into_iter();
    let mut verb = iter.next().unwrap_or_default();
    let mut rest: Vec<String> = iter.collect();

    // two-word verbs: the second token is part of the verb unless it is
    // already a KEY=VALUE pair
    if let Some(second) = rest.first() {
        if !second.contains('=') {
            verb = format!("{verb} {second}");
            rest.remove(0);
        }
    }

    let mut args = HashMap::new();
    for token in rest {
        match token.split_once('=') {
            Some((key, value)) => {
                args.insert(key.to_string(), value.to_string());
            }
            None => {
                args.insert(token, String::new());
            }
        }
    }

    SamReply {
        kind: ReplyKind::from_verb(&verb),
        verb,
        args,
        remainder: String::new(),
    }
}
