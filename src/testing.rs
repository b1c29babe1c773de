//! Test doubles for the protocol sessions and the log sink.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{Log, Metadata, Record};
use tokio::sync::mpsc;

use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::inbox::{MailboxSource, RawMessage};
use crate::outbox::{OutboundSession, OutgoingMessage};
use crate::transport::MailConnector;

#[derive(Default)]
pub struct CapturingLog {
    lines: Mutex<Vec<String>>,
}

impl CapturingLog {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl Log for CapturingLog {
    fn enabled(&self, _: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        self.lines
            .lock()
            .unwrap()
            .push(format!("{} {} {}", record.level(), record.target(), record.args()));
    }

    fn flush(&self) {}
}

pub fn credentials() -> Credentials {
    Credentials {
        imap_server_address: "imap.example.com:993".to_string(),
        smtp_server_address: "smtp.example.com:465".to_string(),
        username: "me@example.com".to_string(),
        password: "hunter2".to_string(),
    }
}

pub fn raw_mail(from: &str, to: &str, subject: &str, body: &str) -> RawMessage {
    format!(
        "From: {from}\r\nTo: {to}\r\nSubject: {subject}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{body}\r\n"
    )
    .into_bytes()
}

/// Writes an outbox file from me@example.com with subject "Hello".
pub fn write_outbox_file(dir: &Path, name: &str, to: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(
        &path,
        format!("---\nTo: {to}\nFrom: me@example.com\nSubject: Hello\n---\n\n{body}\n"),
    )
    .unwrap();
    path
}

pub struct FakeMailbox {
    messages: Vec<RawMessage>,
    pub fail_select: bool,
    /// Streams this many messages, then fails like a dropped connection.
    pub fail_after: Option<usize>,
    pub logged_out: Arc<AtomicBool>,
}

impl FakeMailbox {
    pub fn new(messages: Vec<RawMessage>) -> Self {
        Self {
            messages,
            fail_select: false,
            fail_after: None,
            logged_out: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl MailboxSource for FakeMailbox {
    async fn select_primary(&mut self) -> Result<u32> {
        if self.fail_select {
            return Err(Error::connection("fake-imap", "mailbox unavailable"));
        }
        Ok(self.messages.len() as u32)
    }

    async fn stream_messages(&mut self, count: u32, queue: mpsc::Sender<RawMessage>) -> Result<()> {
        for (index, raw) in self.messages.iter().take(count as usize).enumerate() {
            if self.fail_after == Some(index) {
                return Err(Error::connection("fake-imap", "connection reset"));
            }
            if queue.send(raw.clone()).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn logout(self) -> Result<()> {
        self.logged_out.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeOutbound {
    attempts: usize,
    fail_on: Option<usize>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl OutboundSession for FakeOutbound {
    async fn send(&mut self, message: &OutgoingMessage) -> Result<()> {
        self.attempts += 1;
        if self.fail_on == Some(self.attempts) {
            return Err(Error::Send {
                subject: message.subject.clone(),
                reason: "554 rejected".to_string(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(&message.body).into_owned());
        Ok(())
    }

    async fn close(self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeConnector {
    mailbox: Mutex<Option<FakeMailbox>>,
    fail_send_on: Option<usize>,
    refuse_outbound: bool,
    /// Bodies of the messages the fake server accepted, in order.
    pub sent: Arc<Mutex<Vec<String>>>,
    pub outbound_opened: AtomicUsize,
    pub outbound_closed: Arc<AtomicBool>,
}

impl FakeConnector {
    pub fn new(mailbox: FakeMailbox) -> Self {
        Self {
            mailbox: Mutex::new(Some(mailbox)),
            fail_send_on: None,
            refuse_outbound: false,
            sent: Arc::default(),
            outbound_opened: AtomicUsize::new(0),
            outbound_closed: Arc::default(),
        }
    }

    /// The `attempt`-th send (1-based) fails.
    pub fn failing_send(mut self, attempt: usize) -> Self {
        self.fail_send_on = Some(attempt);
        self
    }

    pub fn refusing_outbound(mut self) -> Self {
        self.refuse_outbound = true;
        self
    }
}

#[async_trait]
impl MailConnector for FakeConnector {
    type Inbound = FakeMailbox;
    type Outbound = FakeOutbound;

    async fn open_inbound(&self, _: &Credentials) -> Result<FakeMailbox> {
        self.mailbox
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::connection("fake-imap", "already connected"))
    }

    async fn open_outbound(&self, _: &Credentials) -> Result<FakeOutbound> {
        if self.refuse_outbound {
            return Err(Error::connection("fake-smtp", "535 authentication failed"));
        }
        self.outbound_opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeOutbound {
            attempts: 0,
            fail_on: self.fail_send_on,
            sent: Arc::clone(&self.sent),
            closed: Arc::clone(&self.outbound_closed),
        })
    }
}
