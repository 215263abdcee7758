//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of Dmail.
//
// Dmail is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Dmail is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Dmail. If not, see <http://www.gnu.org/licenses/>.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::Error;

/// The system-wide configuration for Dmail.
///
/// This is stored in a TOML file, by default `dmail.toml` in the working
/// directory. Every section is optional; a process only reads the sections
/// relevant to what it was asked to do.
#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct SystemConfig {
    /// Configuration for the transfer server and its relay pipeline.
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Configuration for the mailbox server.
    #[serde(default)]
    pub mailbox: MailboxConfig,

    /// Where RSA key material is found.
    #[serde(default)]
    pub keys: KeysConfig,

    /// Settings for the one-shot client commands.
    #[serde(default)]
    pub client: ClientConfig,
}

impl SystemConfig {
    /// Load the configuration at `path`.
    ///
    /// Relative paths inside the configuration are resolved against the
    /// directory containing `path`.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("reading '{}': {}", path.display(), e))
        })?;
        let mut config: SystemConfig = toml::from_str(&text).map_err(|e| {
            Error::Config(format!("in '{}': {}", path.display(), e))
        })?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.keys.directory = base.join(&config.keys.directory);
        if let Some(ref mut hmac_key) = config.client.hmac_key {
            *hmac_key = base.join(&*hmac_key);
        }

        Ok(config)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct TransferConfig {
    /// The address the transfer protocol listener binds to.
    pub listen: String,
    /// The number of connections served concurrently.
    pub connection_workers: usize,
    /// The number of threads relaying queued messages.
    pub relay_workers: usize,
    /// The capacity of the relay queue.
    ///
    /// When the queue is full, connections submitting mail block until a
    /// relay worker frees up a slot.
    pub queue_capacity: usize,
    /// The address bounce messages are sent from.
    pub bounce_sender: String,
    /// Seconds of silence after which a connection is dropped.
    pub idle_timeout_secs: u64,
    /// Seconds to wait when connecting to a mailbox server.
    pub connect_timeout_secs: u64,
    /// Static table from domain to the `host:port` of its mailbox server.
    pub domains: BTreeMap<String, String>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            listen: "0.0.0.0:2525".to_owned(),
            connection_workers: 10,
            relay_workers: 3,
            queue_capacity: 40,
            bounce_sender: "mailer-daemon@transfer.local".to_owned(),
            idle_timeout_secs: 30 * 60,
            connect_timeout_secs: 30,
            domains: BTreeMap::new(),
        }
    }
}

impl TransferConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct MailboxConfig {
    /// The mail domain this server stores mail for.
    pub domain: String,
    /// The identity reported in response to `startsecure`.
    ///
    /// The private key `<identity>.pem` must exist in the key directory for
    /// secure sessions to work.
    pub identity: String,
    /// The address the transfer protocol (inbound delivery) listener binds
    /// to.
    pub dmtp_listen: String,
    /// The address the access protocol listener binds to.
    pub dmap_listen: String,
    /// The number of connections served concurrently by each listener.
    pub connection_workers: usize,
    /// Seconds of silence after which a connection is dropped.
    pub idle_timeout_secs: u64,
    /// User name to password.
    pub users: BTreeMap<String, String>,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        MailboxConfig {
            domain: String::new(),
            identity: String::new(),
            dmtp_listen: "0.0.0.0:2526".to_owned(),
            dmap_listen: "0.0.0.0:2527".to_owned(),
            connection_workers: 10,
            idle_timeout_secs: 30 * 60,
            users: BTreeMap::new(),
        }
    }
}

impl MailboxConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Directory holding `<identity>.pem` private keys and
    /// `<identity>_pub.pem` public keys.
    pub directory: PathBuf,
}

impl Default for KeysConfig {
    fn default() -> Self {
        KeysConfig {
            directory: "keys".into(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Our own mail address, used as the sender.
    pub address: String,
    /// `host:port` of the transfer server.
    pub transfer: String,
    /// `host:port` of the mailbox server.
    pub mailbox: String,
    pub user: String,
    pub password: String,
    /// Whether to upgrade access protocol sessions with `startsecure`.
    pub secure: bool,
    /// File containing the base64-encoded shared secret for integrity tags.
    pub hmac_key: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            address: String::new(),
            transfer: "127.0.0.1:2525".to_owned(),
            mailbox: "127.0.0.1:2527".to_owned(),
            user: String::new(),
            password: String::new(),
            secure: true,
            hmac_key: None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_full_config() {
        let config: SystemConfig = toml::from_str(
            r#"
[transfer]
listen = "127.0.0.1:1025"
relay_workers = 5
[transfer.domains]
"earth.planet" = "127.0.0.1:1026"

[mailbox]
domain = "earth.planet"
identity = "mailbox-earth-planet"
[mailbox.users]
zim = "gir"

[client]
address = "zim@earth.planet"
secure = false
"#,
        )
        .unwrap();

        assert_eq!("127.0.0.1:1025", config.transfer.listen);
        assert_eq!(5, config.transfer.relay_workers);
        assert_eq!(40, config.transfer.queue_capacity);
        assert_eq!(
            Some("127.0.0.1:1026"),
            config
                .transfer
                .domains
                .get("earth.planet")
                .map(String::as_str)
        );
        assert_eq!("earth.planet", config.mailbox.domain);
        assert_eq!("0.0.0.0:2527", config.mailbox.dmap_listen);
        assert_eq!(
            Some("gir"),
            config.mailbox.users.get("zim").map(String::as_str)
        );
        assert!(!config.client.secure);
        assert_eq!(PathBuf::from("keys"), config.keys.directory);
    }

    #[test]
    fn empty_config_is_all_defaults() {
        let config: SystemConfig = toml::from_str("").unwrap();
        assert_eq!("0.0.0.0:2525", config.transfer.listen);
        assert_eq!(10, config.mailbox.connection_workers);
        assert!(config.client.hmac_key.is_none());
        assert!(config.client.secure);
    }

    #[test]
    fn relative_paths_resolved_against_config_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("dmail.toml");
        fs::write(&path, "[client]\nhmac_key = \"hmac.key\"\n").unwrap();

        let config = SystemConfig::load(&path).unwrap();
        assert_eq!(dir.path().join("keys"), config.keys.directory);
        assert_eq!(Some(dir.path().join("hmac.key")), config.client.hmac_key);
    }

    #[test]
    fn bad_config_reports_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("dmail.toml");
        fs::write(&path, "[transfer]\nrelay_workers = \"many\"\n").unwrap();

        match SystemConfig::load(&path) {
            Err(Error::Config(msg)) => assert!(msg.contains("dmail.toml")),
            r => panic!("Unexpected result: {:?}", r),
        }
    }
}
