use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::transport::smtp::PoolConfig;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};

use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::outbox::{OutboundSession, OutgoingMessage};
use crate::transport::ServerAddress;

// Anything else negotiates STARTTLS.
const IMPLICIT_TLS_PORT: u16 = 465;

pub struct SmtpSession {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    server: String,
    log: Logger,
}

impl SmtpSession {
    /// Builds a single-connection transport and checks that the server
    /// accepts the login before anything is sent.
    pub async fn connect(credentials: &Credentials, log: Logger) -> Result<Self> {
        let server = credentials.smtp_server_address.clone();
        let address: ServerAddress = server.parse()?;

        let builder = if address.port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&address.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&address.host)
        }
        .map_err(|e| Error::connection(&server, e))?;

        let transport = builder
            .port(address.port)
            .credentials(SmtpCredentials::new(
                credentials.username.clone(),
                credentials.password.clone(),
            ))
            .pool_config(PoolConfig::new().max_size(1))
            .build();

        log.debug(format_args!("connecting to {address}"));
        match transport.test_connection().await {
            Ok(true) => {}
            Ok(false) => return Err(Error::connection(&server, "server refused the connection")),
            Err(err) => return Err(Error::connection(&server, err)),
        }

        log.info(format_args!("connected to {address}"));
        Ok(Self { transport, server, log })
    }
}

fn mailbox(address: &str, subject: &str) -> Result<Mailbox> {
    address.parse().map_err(|e| Error::Send {
        subject: subject.to_string(),
        reason: format!("invalid address {address:?}: {e}"),
    })
}

fn build(message: &OutgoingMessage) -> Result<lettre::Message> {
    let mut builder = lettre::Message::builder()
        .from(mailbox(&message.from, &message.subject)?)
        .to(mailbox(&message.to, &message.subject)?)
        .subject(message.subject.as_str())
        .header(ContentType::TEXT_PLAIN);

    for cc in &message.cc {
        builder = builder.cc(mailbox(cc, &message.subject)?);
    }

    builder
        .body(String::from_utf8_lossy(&message.body).into_owned())
        .map_err(|e| Error::Send {
            subject: message.subject.clone(),
            reason: e.to_string(),
        })
}

#[async_trait]
impl OutboundSession for SmtpSession {
    async fn send(&mut self, message: &OutgoingMessage) -> Result<()> {
        let email = build(message)?;

        let response = self.transport.send(email).await.map_err(|e| Error::Send {
            subject: message.subject.clone(),
            reason: e.to_string(),
        })?;

        self.log.debug(format_args!(
            "{} accepted {:?}: {}",
            self.server,
            message.subject,
            response.code()
        ));
        Ok(())
    }

    async fn close(self) -> Result<()> {
        // Dropping the transport closes the pooled connection.
        drop(self.transport);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outgoing(to: &str) -> OutgoingMessage {
        OutgoingMessage::new(
            "me@example.com".to_string(),
            to.to_string(),
            vec!["copy@example.com".to_string()],
            "Greetings".to_string(),
            b"Hello".to_vec(),
        )
    }

    #[test]
    fn test_build_sets_envelope() {
        let email = build(&outgoing("you@example.com")).unwrap();

        let mut recipients: Vec<String> = email.envelope().to().iter().map(|a| a.to_string()).collect();
        recipients.sort();
        assert_eq!(recipients, vec!["copy@example.com", "you@example.com"]);
        assert_eq!(email.envelope().from().unwrap().to_string(), "me@example.com");

        let formatted = String::from_utf8(email.formatted()).unwrap();
        assert!(formatted.contains("Subject: Greetings"));
    }

    #[test]
    fn test_build_rejects_invalid_recipient() {
        let result = build(&outgoing("not an address"));

        assert!(matches!(result, Err(Error::Send { subject, .. }) if subject == "Greetings"));
    }
}
