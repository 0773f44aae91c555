//! Connector that reaches real mail servers.

use async_trait::async_trait;

use super::{
    ConnectError, ImapClient, MailConnector, Pop3Client, RetrievalClient, SendError, SmtpClient,
    SubmissionClient,
};
use crate::domain::{Account, Protocol};

/// Opens IMAP, POP3 and SMTP sessions over the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkConnector;

#[async_trait]
impl MailConnector for NetworkConnector {
    async fn open_retrieval(
        &self,
        account: &Account,
    ) -> Result<Box<dyn RetrievalClient>, ConnectError> {
        tracing::debug!(
            protocol = %account.protocol,
            server = %account.incoming.authority(),
            "opening retrieval session"
        );
        let client: Box<dyn RetrievalClient> = match account.protocol {
            Protocol::Imap => Box::new(
                ImapClient::connect(&account.incoming, &account.address, &account.credential)
                    .await?,
            ),
            Protocol::Pop3 => Box::new(
                Pop3Client::connect(&account.incoming, &account.address, &account.credential)
                    .await?,
            ),
        };
        Ok(client)
    }

    async fn open_submission(
        &self,
        account: &Account,
    ) -> Result<Box<dyn SubmissionClient>, SendError> {
        tracing::debug!(server = %account.outgoing.authority(), "opening submission channel");
        let client =
            SmtpClient::connect(&account.outgoing, &account.address, &account.credential).await?;
        Ok(Box::new(client))
    }
}
