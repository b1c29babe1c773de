use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::credentials::{Credentials, SecretStore};
use crate::error::{Error, Result};
use crate::inbox::InboxFetcher;
use crate::logging::Logger;
use crate::outbox::{DispatchReport, OutboxDispatcher, DEFAULT_SEND_INTERVAL};
use crate::transport::MailConnector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ResolvePaths,
    LoadCredentials,
    FetchInbox,
    DispatchOutbox,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::ResolvePaths => "resolving paths",
            Stage::LoadCredentials => "loading credentials",
            Stage::FetchInbox => "fetching inbox",
            Stage::DispatchOutbox => "dispatching outbox",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Running(Stage),
    Done,
    Failed(Stage),
}

#[derive(Debug, Error)]
#[error("{stage}: {cause}")]
pub struct SyncFailure {
    pub stage: Stage,
    pub cause: Error,
}

/// The three directory roles under one working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directories {
    pub inbox: PathBuf,
    pub outbox: PathBuf,
    pub sent: PathBuf,
}

impl Directories {
    /// Makes `working_dir` absolute and creates missing directories.
    pub fn resolve(working_dir: &Path) -> Result<Self> {
        let root = std::path::absolute(working_dir).map_err(|e| Error::filesystem("resolving", working_dir, e))?;

        let directories = Directories {
            inbox: root.join("inbox"),
            outbox: root.join("outbox"),
            sent: root.join("sent"),
        };
        for dir in [&directories.inbox, &directories.outbox, &directories.sent] {
            fs::create_dir_all(dir).map_err(|e| Error::filesystem("creating", dir, e))?;
        }

        Ok(directories)
    }
}

#[derive(Debug)]
pub struct SyncOptions {
    pub working_dir: PathBuf,
    pub imap_server_address: Option<String>,
    pub smtp_server_address: Option<String>,
    pub send_interval: Duration,
}

impl SyncOptions {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            imap_server_address: None,
            smtp_server_address: None,
            send_interval: DEFAULT_SEND_INTERVAL,
        }
    }
}

#[derive(Debug)]
pub struct SyncSummary {
    pub fetched: Vec<PathBuf>,
    pub dispatch: DispatchReport,
}

/// One invocation: resolve paths, load credentials, fetch, dispatch.
pub struct Orchestrator<'a, C> {
    options: SyncOptions,
    store: &'a dyn SecretStore,
    connector: C,
    log: Logger,
    state: SyncState,
}

impl<'a, C: MailConnector> Orchestrator<'a, C> {
    pub fn new(options: SyncOptions, store: &'a dyn SecretStore, connector: C, log: Logger) -> Self {
        Self {
            options,
            store,
            connector,
            log,
            state: SyncState::Idle,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Runs every stage once, in order. The first failing stage aborts the
    /// rest; its name travels with the error.
    pub async fn run(&mut self) -> Result<SyncSummary, SyncFailure> {
        match self.execute().await {
            Ok(summary) => {
                self.state = SyncState::Done;
                Ok(summary)
            }
            Err(cause) => {
                let stage = match self.state {
                    SyncState::Running(stage) => stage,
                    _ => Stage::ResolvePaths,
                };
                self.state = SyncState::Failed(stage);
                Err(SyncFailure { stage, cause })
            }
        }
    }

    async fn execute(&mut self) -> Result<SyncSummary> {
        self.enter(Stage::ResolvePaths);
        let directories = Directories::resolve(&self.options.working_dir)?;
        self.log.debug(format_args!(
            "inbox {}, outbox {}, sent {}",
            directories.inbox.display(),
            directories.outbox.display(),
            directories.sent.display()
        ));

        self.enter(Stage::LoadCredentials);
        let credentials = Credentials::load(
            self.store,
            self.options.imap_server_address.as_deref(),
            self.options.smtp_server_address.as_deref(),
        )?;

        self.enter(Stage::FetchInbox);
        let fetched = InboxFetcher::new(&directories.inbox, self.log.scoped("inbox"))
            .fetch(&self.connector, &credentials)
            .await?;

        self.enter(Stage::DispatchOutbox);
        let dispatch = OutboxDispatcher::new(&directories.outbox, &directories.sent, self.log.scoped("outbox"))
            .with_send_interval(self.options.send_interval)
            .dispatch(&self.connector, &credentials)
            .await?;

        if let Some(err) = &dispatch.error {
            self.log.warn(format_args!(
                "outbox partially sent ({} moved): {err}",
                dispatch.moved.len()
            ));
        }

        self.log.info(format_args!(
            "sync done: {} fetched, {} sent, {} skipped",
            fetched.len(),
            dispatch.moved.len(),
            dispatch.skipped.len()
        ));
        Ok(SyncSummary { fetched, dispatch })
    }

    fn enter(&mut self, stage: Stage) {
        self.log.debug(format_args!("{stage}"));
        self.state = SyncState::Running(stage);
    }
}
