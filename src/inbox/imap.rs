use async_imap::{Client, Session};
use async_trait::async_trait;
use futures::TryStreamExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::inbox::{mime, MailboxSource, RawMessage, PRIMARY_MAILBOX};
use crate::logging::Logger;
use crate::transport::ServerAddress;

type ImapStream = Compat<tokio_native_tls::TlsStream<TcpStream>>;

// Whole message, without setting \Seen.
const FETCH_QUERY: &str = "BODY.PEEK[]";

pub struct ImapSession {
    session: Session<ImapStream>,
    server: String,
    log: Logger,
}

// Establish a TLS-encrypted connection to the IMAP server
async fn connect_to_server(address: &ServerAddress) -> anyhow::Result<tokio_native_tls::TlsStream<TcpStream>> {
    let tcp_stream = TcpStream::connect((address.host.as_str(), address.port)).await?;
    let tls = tokio_native_tls::TlsConnector::from(native_tls::TlsConnector::new()?);
    let tls_stream = tls.connect(&address.host, tcp_stream).await?;
    Ok(tls_stream)
}

impl ImapSession {
    pub async fn connect(credentials: &Credentials, log: Logger) -> Result<Self> {
        let server = credentials.imap_server_address.clone();
        let address: ServerAddress = server.parse()?;

        log.debug(format_args!("connecting to {address}"));
        let tls_stream = connect_to_server(&address)
            .await
            .map_err(|e| Error::connection(&server, e))?;
        let client = Client::new(tls_stream.compat());

        log.debug(format_args!("logging in as {}", credentials.username));
        let session = client
            .login(&credentials.username, &credentials.password)
            .await
            .map_err(|(e, _)| Error::connection(&server, format!("logging in: {e}")))?;

        log.info(format_args!("connected to {address}"));
        Ok(Self { session, server, log })
    }
}

#[async_trait]
impl MailboxSource for ImapSession {
    async fn select_primary(&mut self) -> Result<u32> {
        let mailbox = self
            .session
            .select(PRIMARY_MAILBOX)
            .await
            .map_err(|e| Error::connection(&self.server, format!("selecting {PRIMARY_MAILBOX}: {e}")))?;

        self.log
            .debug(format_args!("{PRIMARY_MAILBOX} selected, {} messages", mailbox.exists));
        Ok(mailbox.exists)
    }

    async fn stream_messages(&mut self, count: u32, queue: mpsc::Sender<RawMessage>) -> Result<()> {
        let range = format!("1:{count}");
        let server = self.server.clone();
        let transport = |e: async_imap::error::Error| Error::connection(&server, format!("fetching {range}: {e}"));

        let stream = self.session.fetch(&range, FETCH_QUERY).await.map_err(&transport)?;
        futures::pin_mut!(stream);

        while let Some(fetch) = stream.try_next().await.map_err(&transport)? {
            let raw = match fetch.body() {
                Some(body) => body.to_vec(),
                None => {
                    self.log
                        .warn(format_args!("server returned no body for message {}", fetch.message));
                    mime::placeholder_raw(fetch.message)
                }
            };

            if queue.send(raw).await.is_err() {
                self.log.debug(format_args!("decoder stopped, ending fetch early"));
                break;
            }
        }

        Ok(())
    }

    async fn logout(mut self) -> Result<()> {
        self.session
            .logout()
            .await
            .map_err(|e| Error::connection(&self.server, format!("logging out: {e}")))
    }
}
