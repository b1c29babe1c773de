//! On-disk message format.
//!
//! ```text
//! ---
//! To: <address>
//! From: <address>
//! Subject: <text>
//! ---
//!
//! <body text>
//! ```
//!
//! A `Cc: a, b` line follows `Subject:` when the message has carbon copies.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::error::{self, Error};

pub const DIVIDER: &str = "---";

/// Substituted when an outbox file has nothing after its header block.
pub const EMPTY_BODY_PLACEHOLDER: &str = "<!-- empty -->";

const UNTITLED: &str = "untitled";

// Most filesystems cap a name at 255 bytes.
const MAX_FILE_NAME_BYTES: usize = 200;

static UNSAFE_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[/\\:*?"<>|\x00-\x1f]"#).expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Message content, readable exactly once.
pub struct Body(Box<dyn Read + Send + Sync>);

impl Body {
    pub fn new<R: Read + Send + Sync + 'static>(reader: R) -> Self {
        Body(Box::new(reader))
    }

    pub fn empty() -> Self {
        Body::from(Vec::new())
    }

    pub fn into_reader(self) -> Box<dyn Read + Send + Sync> {
        self.0
    }

    pub fn into_bytes(mut self) -> io::Result<Vec<u8>> {
        let mut raw = Vec::new();
        self.0.read_to_end(&mut raw)?;
        Ok(raw)
    }

    pub fn into_string(self) -> io::Result<String> {
        let raw = self.into_bytes()?;
        String::from_utf8(raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl From<Vec<u8>> for Body {
    fn from(raw: Vec<u8>) -> Self {
        Body::new(Cursor::new(raw))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::from(text.into_bytes())
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body::from(text.to_string())
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Body(..)")
    }
}

#[derive(Debug)]
pub struct Message {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub cc: Vec<String>,
    pub body: Body,
}

impl Message {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<Body>,
    ) -> Self {
        Message {
            to: to.into(),
            from: from.into(),
            subject: subject.into(),
            cc: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_cc(mut self, cc: Vec<String>) -> Self {
        self.cc = cc;
        self
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    fn headers_only() -> Self {
        Message::new("", "", "", Body::empty())
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed message: {0}")]
    Format(String),

    /// The header block was fine; the decoded headers are kept so the caller
    /// can substitute a body.
    #[error("message {:?} has an empty body", .0.subject)]
    EmptyBody(Box<Message>),

    #[error("reading message: {0}")]
    Io(#[from] io::Error),
}

enum Header {
    To,
    From,
    Subject,
    Cc,
}

impl Header {
    fn split(line: &str) -> Option<(Header, &str)> {
        [
            ("To:", Header::To),
            ("From:", Header::From),
            ("Subject:", Header::Subject),
            ("Cc:", Header::Cc),
        ]
        .into_iter()
        .find_map(|(key, header)| line.strip_prefix(key).map(|value| (header, value.trim())))
    }
}

pub fn decode<R: Read>(mut reader: R) -> Result<Message, CodecError> {
    let mut raw = String::new();
    reader.read_to_string(&mut raw)?;

    let mut message = Message::headers_only();
    let mut dividers = 0;
    let mut lines = raw.split('\n');

    for line in lines.by_ref() {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.starts_with(DIVIDER) {
            dividers += 1;
            if dividers == 2 {
                break;
            }
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }

        match Header::split(line) {
            Some((Header::To, value)) => message.to = value.to_string(),
            Some((Header::From, value)) => message.from = value.to_string(),
            Some((Header::Subject, value)) => message.subject = value.to_string(),
            Some((Header::Cc, value)) => message.cc = parse_list(value),
            None => return Err(CodecError::Format(format!("invalid header line {line:?}"))),
        }
    }

    match dividers {
        0 => return Err(CodecError::Format("no header divider found".to_string())),
        1 => return Err(CodecError::Format("only one header divider found".to_string())),
        _ => {}
    }

    let body = lines.collect::<Vec<_>>().join("\n");
    let body = body.trim();
    if body.is_empty() {
        return Err(CodecError::EmptyBody(Box::new(message)));
    }

    message.body = Body::from(body.to_string());
    Ok(message)
}

/// Like [`decode`], but an empty body becomes [`EMPTY_BODY_PLACEHOLDER`].
pub fn decode_or_placeholder<R: Read>(reader: R) -> Result<Message, CodecError> {
    match decode(reader) {
        Err(CodecError::EmptyBody(message)) => Ok(message.with_body(EMPTY_BODY_PLACEHOLDER)),
        other => other,
    }
}

pub fn encode<W: Write>(message: Message, mut writer: W) -> Result<(), CodecError> {
    writeln!(writer, "{DIVIDER}")?;
    writeln!(writer, "To: {}", message.to)?;
    writeln!(writer, "From: {}", message.from)?;
    writeln!(writer, "Subject: {}", message.subject)?;
    if !message.cc.is_empty() {
        writeln!(writer, "Cc: {}", message.cc.join(", "))?;
    }
    writeln!(writer, "{DIVIDER}")?;
    writeln!(writer)?;

    io::copy(&mut message.body.into_reader(), &mut writer)?;
    writeln!(writer)?;
    writer.flush()?;

    Ok(())
}

/// Filename a message is stored under. Equal subjects map to equal names.
pub fn file_name(subject: &str) -> String {
    let name = WHITESPACE.replace_all(subject.trim(), "-");
    let name = UNSAFE_FILENAME_CHARS.replace_all(&name, "_");

    match truncate_on_char_boundary(&name, MAX_FILE_NAME_BYTES) {
        "" | "." | ".." => UNTITLED.to_string(),
        name => name.to_string(),
    }
}

fn truncate_on_char_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Writes `message` into `dir`, replacing any file with the same name.
pub fn write_to_directory(dir: &Path, message: Message) -> error::Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| Error::filesystem("creating", dir, e))?;

    let path = dir.join(file_name(&message.subject));
    let file = File::create(&path).map_err(|e| Error::filesystem("creating", &path, e))?;
    encode(message, BufWriter::new(file))?;

    Ok(path)
}

pub fn read_file(path: &Path) -> Result<Message, CodecError> {
    let file = File::open(path)?;
    decode_or_placeholder(io::BufReader::new(file))
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|address| !address.is_empty())
        .map(str::to_string)
        .collect()
}
