pub mod imap;
pub mod mime;

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::codec::{self, Message};
use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::transport::MailConnector;

pub const PRIMARY_MAILBOX: &str = "INBOX";

const FETCH_QUEUE_CAPACITY: usize = 8;

/// A message exactly as the server sent it.
pub type RawMessage = Vec<u8>;

/// Inbound protocol session.
#[async_trait]
pub trait MailboxSource: Send + 'static {
    /// Selects the primary mailbox and returns its message count.
    async fn select_primary(&mut self) -> Result<u32>;

    /// Pushes messages `1..=count` into `queue`; stops early once the
    /// receiving side is gone.
    async fn stream_messages(&mut self, count: u32, queue: mpsc::Sender<RawMessage>) -> Result<()>;

    async fn logout(self) -> Result<()>;
}

pub struct InboxFetcher {
    inbox_dir: PathBuf,
    log: Logger,
}

impl InboxFetcher {
    pub fn new(inbox_dir: impl Into<PathBuf>, log: Logger) -> Self {
        Self {
            inbox_dir: inbox_dir.into(),
            log,
        }
    }

    /// Downloads the whole primary mailbox and writes one file per message.
    /// Returns the written paths.
    ///
    /// Every run fetches every message again; nothing is remembered between
    /// runs and existing files are overwritten.
    pub async fn fetch<C: MailConnector>(&self, connector: &C, credentials: &Credentials) -> Result<Vec<PathBuf>> {
        let mut source = connector.open_inbound(credentials).await?;

        let count = match source.select_primary().await {
            Ok(count) => count,
            Err(err) => {
                self.logout(source).await;
                return Err(err);
            }
        };

        if count == 0 {
            self.log.info(format_args!("{PRIMARY_MAILBOX} is empty"));
            self.logout(source).await;
            return Ok(Vec::new());
        }

        self.log.info(format_args!("fetching {count} messages from {PRIMARY_MAILBOX}"));
        let (source, decoded) = self.transfer(source, count).await;
        if let Some(source) = source {
            self.logout(source).await;
        }

        let mut written = Vec::new();
        for message in decoded? {
            let path = codec::write_to_directory(&self.inbox_dir, message)?;
            self.log.debug(format_args!("wrote {}", path.display()));
            written.push(path);
        }

        self.log.info(format_args!("wrote {} messages to {}", written.len(), self.inbox_dir.display()));
        Ok(written)
    }

    /// Runs the network producer and the decoding consumer side by side and
    /// waits for the consumer's completion signal. The session comes back
    /// unless the producer panicked.
    async fn transfer<S: MailboxSource>(&self, mut source: S, count: u32) -> (Option<S>, Result<Vec<Message>>) {
        let (queue_tx, queue_rx) = mpsc::channel(FETCH_QUEUE_CAPACITY);
        let (done_tx, done_rx) = oneshot::channel();

        let producer_log = self.log.clone();
        let producer = tokio::spawn(async move {
            // Transport failures end the stream; the consumer then reports
            // whatever it decoded so far.
            if let Err(err) = source.stream_messages(count, queue_tx).await {
                producer_log.error(format_args!("fetch error: {err}"));
            }
            source
        });

        tokio::spawn(decode_queue(queue_rx, done_tx, self.log.clone()));

        let decoded = done_rx
            .await
            .unwrap_or_else(|_| Err(Error::Task("decoder exited without a result".to_string())));

        let source = match producer.await {
            Ok(source) => Some(source),
            Err(err) => {
                self.log.error(format_args!("fetch task failed: {err}"));
                None
            }
        };

        (source, decoded)
    }

    async fn logout<S: MailboxSource>(&self, source: S) {
        if let Err(err) = source.logout().await {
            self.log.warn(format_args!("{err}"));
        }
    }
}

async fn decode_queue(
    mut queue: mpsc::Receiver<RawMessage>,
    done: oneshot::Sender<Result<Vec<Message>>>,
    log: Logger,
) {
    let mut decoded = Vec::new();

    while let Some(raw) = queue.recv().await {
        match mime::decode_raw(&raw, &log) {
            Ok(message) => decoded.push(message),
            Err(err) => {
                let _ = done.send(Err(err));
                return;
            }
        }
    }

    let _ = done.send(Ok(decoded));
}
