use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::inbox::imap::ImapSession;
use crate::inbox::MailboxSource;
use crate::logging::Logger;
use crate::outbox::smtp::SmtpSession;
use crate::outbox::OutboundSession;

/// `host:port` of a mail server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl FromStr for ServerAddress {
    type Err = Error;

    fn from_str(address: &str) -> Result<Self> {
        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| Error::Config(format!("server address {address:?} has no port")))?;
        if host.is_empty() {
            return Err(Error::Config(format!("server address {address:?} has no host")));
        }
        let port = port
            .parse()
            .map_err(|e| Error::Config(format!("port of server address {address:?}: {e}")))?;

        Ok(ServerAddress {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Opens protocol sessions for one invocation.
#[async_trait]
pub trait MailConnector: Send + Sync {
    type Inbound: MailboxSource;
    type Outbound: OutboundSession;

    async fn open_inbound(&self, credentials: &Credentials) -> Result<Self::Inbound>;

    async fn open_outbound(&self, credentials: &Credentials) -> Result<Self::Outbound>;
}

/// IMAP over TLS and SMTP.
pub struct NetworkConnector {
    log: Logger,
}

impl NetworkConnector {
    pub fn new(log: Logger) -> Self {
        Self { log }
    }
}

#[async_trait]
impl MailConnector for NetworkConnector {
    type Inbound = ImapSession;
    type Outbound = SmtpSession;

    async fn open_inbound(&self, credentials: &Credentials) -> Result<ImapSession> {
        ImapSession::connect(credentials, self.log.scoped("imap")).await
    }

    async fn open_outbound(&self, credentials: &Credentials) -> Result<SmtpSession> {
        SmtpSession::connect(credentials, self.log.scoped("smtp")).await
    }
}
