//! SMTP submission client and outgoing message construction.
//!
//! Port 587 with TLS is upgraded via STARTTLS, any other TLS port uses
//! implicit TLS, and plaintext endpoints connect without encryption.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{SendError, SubmissionClient};
use crate::domain::{Account, BodyFormat, Draft, Encryption, Endpoint};

const STARTTLS_PORT: u16 = 587;

/// An SMTP transport bound to one account.
pub struct SmtpClient {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpClient {
    /// Builds the transport for `endpoint` and verifies it by connecting and
    /// authenticating once.
    pub async fn connect(
        endpoint: &Endpoint,
        username: &str,
        password: &str,
    ) -> Result<Self, SendError> {
        let credentials = SmtpCredentials::new(username.to_string(), password.to_string());

        let builder = match endpoint.encryption {
            Encryption::Tls if endpoint.port == STARTTLS_PORT => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&endpoint.host)
                    .map_err(|e| SendError::Network(format!("SMTP relay error: {}", e)))?
            }
            Encryption::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&endpoint.host)
                .map_err(|e| SendError::Network(format!("SMTP relay error: {}", e)))?,
            Encryption::None => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&endpoint.host)
            }
        };

        let transport = builder
            .port(endpoint.port)
            .credentials(credentials)
            .build();

        transport.test_connection().await.map_err(map_send_error)?;

        tracing::info!(host = %endpoint.host, port = endpoint.port, "SMTP transport ready");
        Ok(Self { transport })
    }
}

/// Classifies a transport error.
fn map_send_error(error: lettre::transport::smtp::Error) -> SendError {
    if error.is_timeout() {
        return SendError::Timeout;
    }
    let auth_rejected = error
        .status()
        .map(|code| matches!(code.to_string().as_str(), "530" | "534" | "535" | "538"))
        .unwrap_or(false);
    if auth_rejected {
        SendError::Auth(error.to_string())
    } else {
        SendError::Network(error.to_string())
    }
}

#[async_trait]
impl SubmissionClient for SmtpClient {
    async fn submit(&mut self, message: Message) -> Result<(), SendError> {
        let response = self.transport.send(message).await.map_err(map_send_error)?;
        tracing::debug!(code = %response.code(), "SMTP accepted message");
        Ok(())
    }

    async fn close(&mut self) {
        // The pooled transport drops its connections with the value.
    }
}

/// Builds the outgoing message for `draft` sent from `account`.
///
/// `attachments` holds `(file name, contents)` pairs already read from disk.
pub fn build_message(
    account: &Account,
    draft: &Draft,
    attachments: Vec<(String, Vec<u8>)>,
) -> Result<Message, SendError> {
    let from_address: Address = account
        .address
        .parse()
        .map_err(|e| SendError::InvalidMessage(format!("invalid from address: {}", e)))?;
    let from = Mailbox::new(Some(account.display_name.clone()), from_address);

    let to: Mailbox = draft
        .recipient
        .trim()
        .parse()
        .map_err(|e| SendError::InvalidMessage(format!("invalid recipient: {}", e)))?;

    let builder = Message::builder()
        .from(from)
        .to(to)
        .subject(draft.subject.clone())
        .date_now();

    let body = match draft.format {
        BodyFormat::Plain => SinglePart::plain(draft.body.clone()),
        BodyFormat::Rich => SinglePart::html(draft.body.clone()),
    };

    let result = if attachments.is_empty() {
        builder.singlepart(body)
    } else {
        let octet_stream = ContentType::parse("application/octet-stream")
            .map_err(|e| SendError::InvalidMessage(format!("content type: {}", e)))?;
        let parts = attachments
            .into_iter()
            .fold(MultiPart::mixed().singlepart(body), |parts, (name, data)| {
                parts.singlepart(Attachment::new(name).body(data, octet_stream.clone()))
            });
        builder.multipart(parts)
    };

    result.map_err(|e| SendError::InvalidMessage(format!("failed to build message: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Preset, Protocol};

    fn account() -> Account {
        Account::from_preset(Preset::Gmail, "Ada", "ada@gmail.com", "pw", Protocol::Imap).unwrap()
    }

    fn formatted(message: &Message) -> String {
        String::from_utf8_lossy(&message.formatted()).to_string()
    }

    #[test]
    fn plain_message_headers() {
        let draft = Draft::new("bob@example.com", "Hello", "Plain body");
        let message = build_message(&account(), &draft, vec![]).unwrap();
        let text = formatted(&message);

        let from = text.lines().find(|l| l.starts_with("From: ")).unwrap();
        assert!(from.contains("Ada") && from.contains("<ada@gmail.com>"));
        assert!(text.contains("To: bob@example.com"));
        assert!(text.contains("Subject: Hello"));
        assert!(text.contains("Content-Type: text/plain"));
        assert!(text.contains("Plain body"));
    }

    #[test]
    fn rich_body_is_html() {
        let draft = Draft::new("bob@example.com", "Hi", "<b>bold</b>").with_format(BodyFormat::Rich);
        let text = formatted(&build_message(&account(), &draft, vec![]).unwrap());
        assert!(text.contains("Content-Type: text/html"));
    }

    #[test]
    fn attachments_make_multipart() {
        let draft = Draft::new("bob@example.com", "Files", "see attached");
        let message = build_message(
            &account(),
            &draft,
            vec![("notes.txt".to_string(), b"attached bytes".to_vec())],
        )
        .unwrap();
        let text = formatted(&message);

        assert!(text.contains("multipart/mixed"));
        assert!(text.contains("notes.txt"));
        assert!(text.contains("application/octet-stream"));
    }

    #[test]
    fn bad_recipient_is_invalid_message() {
        let draft = Draft::new("not an address", "Hi", "body");
        assert!(matches!(
            build_message(&account(), &draft, vec![]),
            Err(SendError::InvalidMessage(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_server_fails_to_connect() {
        let endpoint = Endpoint::plain("127.0.0.1", 9);
        let result = SmtpClient::connect(&endpoint, "user", "pw").await;
        assert!(matches!(
            result,
            Err(SendError::Network(_)) | Err(SendError::Timeout)
        ));
    }
}
