//! Account domain types.
//!
//! An [`Account`] carries everything the protocol layer needs to reach a
//! mailbox: credentials plus one endpoint for retrieval and one for sending.
//! Accounts are edited elsewhere; this crate only consumes them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A configured mail account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Display name shown in the UI and used on outgoing mail.
    pub display_name: String,
    /// Email address, also the login name.
    pub address: String,
    /// Password or app-specific password, passed through untouched.
    pub credential: String,
    /// Retrieval protocol.
    pub protocol: Protocol,
    /// Retrieval server (IMAP or POP3).
    pub incoming: Endpoint,
    /// Submission server (SMTP).
    pub outgoing: Endpoint,
    /// Whether this is the active account.
    #[serde(default)]
    pub active: bool,
}

// Hand-written so credentials never end up in logs.
impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("display_name", &self.display_name)
            .field("address", &self.address)
            .field("credential", &"<redacted>")
            .field("protocol", &self.protocol)
            .field("incoming", &self.incoming)
            .field("outgoing", &self.outgoing)
            .field("active", &self.active)
            .finish()
    }
}

impl Account {
    /// Builds an account from a provider preset.
    ///
    /// Returns `None` for [`Preset::Custom`], which has no known servers.
    pub fn from_preset(
        preset: Preset,
        display_name: impl Into<String>,
        address: impl Into<String>,
        credential: impl Into<String>,
        protocol: Protocol,
    ) -> Option<Self> {
        let servers = preset.servers()?;
        let incoming = match protocol {
            Protocol::Imap => Endpoint::tls(servers.imap_host, 993),
            Protocol::Pop3 => Endpoint::tls(servers.pop3_host, 995),
        };
        Some(Self {
            display_name: display_name.into(),
            address: address.into(),
            credential: credential.into(),
            protocol,
            incoming,
            outgoing: Endpoint::tls(servers.smtp_host, servers.smtp_port),
            active: false,
        })
    }

    /// Returns true when a session opened for `other` would serve this
    /// account unchanged. The active flag is ignored.
    pub fn same_connection(&self, other: &Account) -> bool {
        self.address.eq_ignore_ascii_case(&other.address)
            && self.display_name == other.display_name
            && self.credential == other.credential
            && self.protocol == other.protocol
            && self.incoming == other.incoming
            && self.outgoing == other.outgoing
    }
}

/// Retrieval protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// IMAP4rev1.
    Imap,
    /// POP3.
    Pop3,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Imap => write!(f, "IMAP"),
            Protocol::Pop3 => write!(f, "POP3"),
        }
    }
}

/// Transport encryption for an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encryption {
    /// TLS. Implicit TLS for retrieval; for SMTP on port 587 the session is
    /// upgraded with STARTTLS instead.
    Tls,
    /// Plaintext.
    None,
}

/// Host, port and encryption of one server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Transport encryption.
    pub encryption: Encryption,
}

impl Endpoint {
    /// Creates a TLS endpoint.
    pub fn tls(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            encryption: Encryption::Tls,
        }
    }

    /// Creates a plaintext endpoint.
    pub fn plain(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            encryption: Encryption::None,
        }
    }

    /// Returns `host:port`.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Well-known providers with fixed server settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Yanyn,
    #[serde(rename = "163")]
    Netease163,
    #[serde(rename = "126")]
    Netease126,
    Yeah,
    Outlook,
    Hotmail,
    Gmail,
    /// User-supplied servers.
    Custom,
}

struct PresetServers {
    imap_host: &'static str,
    pop3_host: &'static str,
    smtp_host: &'static str,
    smtp_port: u16,
}

impl Preset {
    fn servers(self) -> Option<PresetServers> {
        let servers = match self {
            Preset::Yanyn => PresetServers {
                imap_host: "yanyn.cn",
                pop3_host: "yanyn.cn",
                smtp_host: "yanyn.cn",
                smtp_port: 456,
            },
            Preset::Netease163 => PresetServers {
                imap_host: "imap.163.com",
                pop3_host: "pop.163.com",
                smtp_host: "smtp.163.com",
                smtp_port: 465,
            },
            Preset::Netease126 => PresetServers {
                imap_host: "imap.126.com",
                pop3_host: "pop.126.com",
                smtp_host: "smtp.126.com",
                smtp_port: 465,
            },
            Preset::Yeah => PresetServers {
                imap_host: "imap.yeah.net",
                pop3_host: "pop.yeah.net",
                smtp_host: "smtp.yeah.net",
                smtp_port: 465,
            },
            Preset::Outlook | Preset::Hotmail => PresetServers {
                imap_host: "outlook.office365.com",
                pop3_host: "outlook.office365.com",
                smtp_host: "smtp.office365.com",
                smtp_port: 587,
            },
            Preset::Gmail => PresetServers {
                imap_host: "imap.gmail.com",
                pop3_host: "pop.gmail.com",
                smtp_host: "smtp.gmail.com",
                smtp_port: 465,
            },
            Preset::Custom => return None,
        };
        Some(servers)
    }
}

/// The set of configured accounts, at most one of them active.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountBook {
    accounts: Vec<Account>,
}

impl AccountBook {
    /// Creates a book from a list of accounts.
    ///
    /// If more than one account is flagged active, only the first keeps the flag.
    pub fn new(accounts: Vec<Account>) -> Self {
        let mut book = Self { accounts };
        let mut seen_active = false;
        for account in &mut book.accounts {
            if account.active {
                if seen_active {
                    account.active = false;
                }
                seen_active = true;
            }
        }
        book
    }

    /// Returns all accounts in insertion order.
    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    /// Returns the active account, if any.
    pub fn active(&self) -> Option<&Account> {
        self.accounts.iter().find(|a| a.active)
    }

    /// Adds an account. Accounts are keyed by address; an existing entry
    /// with the same address is replaced and keeps its active flag.
    pub fn upsert(&mut self, mut account: Account) {
        match self
            .accounts
            .iter_mut()
            .find(|a| a.address.eq_ignore_ascii_case(&account.address))
        {
            Some(existing) => {
                account.active = existing.active;
                *existing = account;
            }
            None => {
                account.active = false;
                self.accounts.push(account);
            }
        }
    }

    /// Removes the account with the given address.
    pub fn remove(&mut self, address: &str) -> Option<Account> {
        let index = self
            .accounts
            .iter()
            .position(|a| a.address.eq_ignore_ascii_case(address))?;
        Some(self.accounts.remove(index))
    }

    /// Makes the account with the given address the only active one.
    ///
    /// Returns the newly active account, or `None` (leaving flags untouched)
    /// if no account has that address.
    pub fn activate(&mut self, address: &str) -> Option<&Account> {
        let index = self
            .accounts
            .iter()
            .position(|a| a.address.eq_ignore_ascii_case(address))?;
        for (i, account) in self.accounts.iter_mut().enumerate() {
            account.active = i == index;
        }
        self.accounts.get(index)
    }
}
