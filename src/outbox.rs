pub mod receipt;
pub mod smtp;

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::codec::{self, Message};
use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::transport::MailConnector;

pub use receipt::Receipt;

/// Courtesy delay between two sends on the same session.
pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_secs(1);

/// Outbound protocol session.
#[async_trait]
pub trait OutboundSession: Send {
    async fn send(&mut self, message: &OutgoingMessage) -> Result<()>;

    async fn close(self) -> Result<()>;
}

/// A decoded outbox file with its body buffered and its receipt computed.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub from: String,
    pub to: String,
    pub cc: Vec<String>,
    pub subject: String,
    pub body: Vec<u8>,
    receipt: Receipt,
}

impl OutgoingMessage {
    pub fn new(from: String, to: String, cc: Vec<String>, subject: String, body: Vec<u8>) -> Self {
        let receipt = Receipt::compute(&from, &to, &subject, &body);
        Self {
            from,
            to,
            cc,
            subject,
            body,
            receipt,
        }
    }

    pub fn from_message(message: Message) -> std::io::Result<Self> {
        let body = message.body.into_bytes()?;
        Ok(Self::new(message.from, message.to, message.cc, message.subject, body))
    }

    pub fn receipt(&self) -> Receipt {
        self.receipt
    }
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Files now in `sent`.
    pub moved: Vec<PathBuf>,
    /// Files that could not be decoded; left in the outbox.
    pub skipped: Vec<PathBuf>,
    /// The send failure that ended the batch early, if any.
    pub error: Option<Error>,
}

struct Batch {
    messages: Vec<OutgoingMessage>,
    // Several files share a receipt when their content is identical; each
    // confirmed send moves one of them.
    files: HashMap<Receipt, VecDeque<PathBuf>>,
    skipped: Vec<PathBuf>,
}

pub struct OutboxDispatcher {
    outbox_dir: PathBuf,
    sent_dir: PathBuf,
    send_interval: Duration,
    log: Logger,
}

impl OutboxDispatcher {
    pub fn new(outbox_dir: impl Into<PathBuf>, sent_dir: impl Into<PathBuf>, log: Logger) -> Self {
        Self {
            outbox_dir: outbox_dir.into(),
            sent_dir: sent_dir.into(),
            send_interval: DEFAULT_SEND_INTERVAL,
            log,
        }
    }

    pub fn with_send_interval(mut self, send_interval: Duration) -> Self {
        self.send_interval = send_interval;
        self
    }

    /// Sends every outbox file over one session and moves the confirmed ones
    /// to `sent`.
    ///
    /// The batch stops at the first failed send. If nothing was sent that
    /// failure is the error; otherwise it is carried in the report and the
    /// files sent before it are still moved.
    pub async fn dispatch<C: MailConnector>(&self, connector: &C, credentials: &Credentials) -> Result<DispatchReport> {
        let mut batch = self.prepare()?;
        if batch.messages.is_empty() {
            self.log.info(format_args!("nothing to send in {}", self.outbox_dir.display()));
            return Ok(DispatchReport {
                skipped: batch.skipped,
                ..Default::default()
            });
        }

        let mut session = connector.open_outbound(credentials).await?;
        let (receipts, failure) = self.send_all(&mut session, &batch.messages).await;
        if let Err(err) = session.close().await {
            self.log.warn(format_args!("{err}"));
        }

        if receipts.is_empty() {
            if let Some(err) = failure {
                return Err(err);
            }
        }

        let moved = self.move_confirmed(&receipts, &mut batch.files)?;
        self.log.info(format_args!(
            "sent {} of {} messages",
            moved.len(),
            batch.messages.len()
        ));

        Ok(DispatchReport {
            moved,
            skipped: batch.skipped,
            error: failure,
        })
    }

    fn prepare(&self) -> Result<Batch> {
        let mut batch = Batch {
            messages: Vec::new(),
            files: HashMap::new(),
            skipped: Vec::new(),
        };

        for path in list_files(&self.outbox_dir)? {
            let message = match codec::read_file(&path) {
                Ok(message) => message,
                Err(err) => {
                    self.log.warn(format_args!("skipping {}: {err}", path.display()));
                    batch.skipped.push(path);
                    continue;
                }
            };

            let message = OutgoingMessage::from_message(message).map_err(|e| Error::filesystem("reading", &path, e))?;
            self.log
                .debug(format_args!("{} has receipt {}", path.display(), message.receipt()));

            batch.files.entry(message.receipt()).or_default().push_back(path);
            batch.messages.push(message);
        }

        Ok(batch)
    }

    async fn send_all<S: OutboundSession>(
        &self,
        session: &mut S,
        messages: &[OutgoingMessage],
    ) -> (Vec<Receipt>, Option<Error>) {
        let mut receipts = Vec::with_capacity(messages.len());

        for (index, message) in messages.iter().enumerate() {
            if let Err(err) = session.send(message).await {
                self.log.error(format_args!("{err}"));
                return (receipts, Some(err));
            }

            self.log.info(format_args!("sent {:?} to {}", message.subject, message.to));
            receipts.push(message.receipt());

            if index + 1 < messages.len() && !self.send_interval.is_zero() {
                tokio::time::sleep(self.send_interval).await;
            }
        }

        (receipts, None)
    }

    fn move_confirmed(&self, receipts: &[Receipt], files: &mut HashMap<Receipt, VecDeque<PathBuf>>) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.sent_dir).map_err(|e| Error::filesystem("creating", &self.sent_dir, e))?;

        let mut moved = Vec::with_capacity(receipts.len());
        for receipt in receipts {
            let Some(source) = files.get_mut(receipt).and_then(VecDeque::pop_front) else {
                self.log.warn(format_args!("no outbox file for receipt {receipt}"));
                continue;
            };
            let Some(name) = source.file_name() else {
                continue;
            };

            let destination = self.sent_dir.join(name);
            fs::rename(&source, &destination).map_err(|e| Error::filesystem("moving", &source, e))?;
            moved.push(destination);
        }

        Ok(moved)
    }
}

/// Regular files of `dir`, sorted by name so the send order is stable.
fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir).map_err(|e| Error::filesystem("listing", dir, e))? {
        let entry = entry.map_err(|e| Error::filesystem("listing", dir, e))?;
        let file_type = entry.file_type().map_err(|e| Error::filesystem("inspecting", &entry.path(), e))?;
        if !file_type.is_dir() {
            files.push(entry.path());
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{credentials, write_outbox_file, FakeConnector, FakeMailbox};
    use std::sync::atomic::Ordering;
    use tempfile::tempdir;

    struct Dirs {
        _root: tempfile::TempDir,
        outbox: PathBuf,
        sent: PathBuf,
    }

    fn dirs() -> Dirs {
        let root = tempdir().unwrap();
        let outbox = root.path().join("outbox");
        let sent = root.path().join("sent");
        fs::create_dir_all(&outbox).unwrap();
        Dirs {
            _root: root,
            outbox,
            sent,
        }
    }

    fn dispatcher(dirs: &Dirs) -> OutboxDispatcher {
        OutboxDispatcher::new(&dirs.outbox, &dirs.sent, Logger::discard()).with_send_interval(Duration::ZERO)
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .map(|entries| {
                entries
                    .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_all_sent_files_move_to_sent() {
        let dirs = dirs();
        write_outbox_file(&dirs.outbox, "a", "you@example.com", "first");
        write_outbox_file(&dirs.outbox, "b", "you@example.com", "second");
        let connector = FakeConnector::new(FakeMailbox::new(Vec::new()));

        let report = dispatcher(&dirs).dispatch(&connector, &credentials()).await.unwrap();

        assert_eq!(report.moved.len(), 2);
        assert!(report.error.is_none());
        assert!(names(&dirs.outbox).is_empty());
        assert_eq!(names(&dirs.sent), vec!["a", "b"]);
        assert_eq!(*connector.sent.lock().unwrap(), vec!["first", "second"]);
        assert!(connector.outbound_closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failure_on_second_send_keeps_partial_success() {
        let dirs = dirs();
        write_outbox_file(&dirs.outbox, "1", "you@example.com", "one");
        write_outbox_file(&dirs.outbox, "2", "you@example.com", "two");
        write_outbox_file(&dirs.outbox, "3", "you@example.com", "three");
        let connector = FakeConnector::new(FakeMailbox::new(Vec::new())).failing_send(2);

        let report = dispatcher(&dirs).dispatch(&connector, &credentials()).await.unwrap();

        assert!(matches!(report.error, Some(Error::Send { .. })));
        assert_eq!(names(&dirs.sent), vec!["1"]);
        assert_eq!(names(&dirs.outbox), vec!["2", "3"]);
        assert_eq!(*connector.sent.lock().unwrap(), vec!["one"]);
        assert_eq!(connector.outbound_opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_on_first_send_is_returned() {
        let dirs = dirs();
        write_outbox_file(&dirs.outbox, "1", "you@example.com", "one");
        let connector = FakeConnector::new(FakeMailbox::new(Vec::new())).failing_send(1);

        let result = dispatcher(&dirs).dispatch(&connector, &credentials()).await;

        assert!(matches!(result, Err(Error::Send { .. })));
        assert_eq!(names(&dirs.outbox), vec!["1"]);
        assert!(names(&dirs.sent).is_empty());
        assert!(connector.outbound_closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_malformed_file_is_skipped_and_siblings_sent() {
        let dirs = dirs();
        write_outbox_file(&dirs.outbox, "good", "you@example.com", "fine");
        fs::write(dirs.outbox.join("bad"), "---\nTo: you@example.com\nno divider follows\n").unwrap();
        fs::create_dir_all(dirs.outbox.join("drafts")).unwrap();

        let connector = FakeConnector::new(FakeMailbox::new(Vec::new()));
        let report = dispatcher(&dirs).dispatch(&connector, &credentials()).await.unwrap();

        assert_eq!(report.skipped, vec![dirs.outbox.join("bad")]);
        assert_eq!(names(&dirs.sent), vec!["good"]);
        assert_eq!(names(&dirs.outbox), vec!["bad", "drafts"]);
    }

    #[tokio::test]
    async fn test_empty_body_is_sent_with_placeholder() {
        let dirs = dirs();
        fs::write(
            dirs.outbox.join("blank"),
            "---\nTo: you@example.com\nFrom: me@example.com\nSubject: blank\n---\n\n",
        )
        .unwrap();
        let connector = FakeConnector::new(FakeMailbox::new(Vec::new()));

        dispatcher(&dirs).dispatch(&connector, &credentials()).await.unwrap();

        assert_eq!(*connector.sent.lock().unwrap(), vec![codec::EMPTY_BODY_PLACEHOLDER]);
        assert_eq!(names(&dirs.sent), vec!["blank"]);
    }

    #[tokio::test]
    async fn test_empty_outbox_opens_no_session() {
        let dirs = dirs();
        let connector = FakeConnector::new(FakeMailbox::new(Vec::new()));

        let report = dispatcher(&dirs).dispatch(&connector, &credentials()).await.unwrap();

        assert!(report.moved.is_empty());
        assert_eq!(connector.outbound_opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_identical_files_share_a_receipt() {
        // Both files have the same content and therefore the same receipt.
        // Which file a confirmed send moves is unspecified; once both sends
        // succeed both files are in `sent`.
        let dirs = dirs();
        write_outbox_file(&dirs.outbox, "copy-1", "you@example.com", "same");
        write_outbox_file(&dirs.outbox, "copy-2", "you@example.com", "same");

        let first = codec::read_file(&dirs.outbox.join("copy-1")).unwrap();
        let second = codec::read_file(&dirs.outbox.join("copy-2")).unwrap();
        assert_eq!(
            OutgoingMessage::from_message(first).unwrap().receipt(),
            OutgoingMessage::from_message(second).unwrap().receipt()
        );

        let connector = FakeConnector::new(FakeMailbox::new(Vec::new()));
        dispatcher(&dirs).dispatch(&connector, &credentials()).await.unwrap();

        assert_eq!(names(&dirs.sent), vec!["copy-1", "copy-2"]);
    }

    #[tokio::test]
    async fn test_identical_files_partial_send_moves_exactly_one() {
        let dirs = dirs();
        write_outbox_file(&dirs.outbox, "copy-1", "you@example.com", "same");
        write_outbox_file(&dirs.outbox, "copy-2", "you@example.com", "same");
        let connector = FakeConnector::new(FakeMailbox::new(Vec::new())).failing_send(2);

        let report = dispatcher(&dirs).dispatch(&connector, &credentials()).await.unwrap();

        assert_eq!(report.moved.len(), 1);
        assert_eq!(names(&dirs.sent).len(), 1);
        assert_eq!(names(&dirs.outbox).len(), 1);
    }

    #[tokio::test]
    async fn test_missing_outbox_is_filesystem_error() {
        let dirs = dirs();
        fs::remove_dir(&dirs.outbox).unwrap();
        let connector = FakeConnector::new(FakeMailbox::new(Vec::new()));

        let result = dispatcher(&dirs).dispatch(&connector, &credentials()).await;

        assert!(matches!(result, Err(Error::Filesystem { action: "listing", .. })));
    }
}
