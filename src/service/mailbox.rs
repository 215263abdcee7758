//-
// Copyright (c) 2020, 2023, 2024, Jason Lingle
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

//! The mailbox server: stores mail for one domain and serves it to its users.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{info, warn};

use super::listener::{Handler, Listener};
use crate::dmap::server::{MailboxContext, Server as AccessServer};
use crate::dmtp::server::{MailConsumer, Server as TransferServer};
use crate::mail::{message::Mail, store::MailStore, users::UserDirectory};
use crate::support::{error::Error, system_config::MailboxConfig};
use crate::wire::{codec::Codec, keys::KeyStore};

/// Stores inbound mail in the mailboxes of local recipients.
///
/// Recipients in other domains are accepted and ignored, since a message
/// addressed to several domains reaches each of their servers whole.
pub struct MailboxDelivery {
    users: UserDirectory,
    store: MailStore,
}

impl MailboxDelivery {
    pub fn new(users: UserDirectory, store: MailStore) -> Self {
        MailboxDelivery { users, store }
    }
}

impl MailConsumer for MailboxDelivery {
    fn accepts_recipient(&self, address: &str) -> bool {
        match self.users.local_user(address) {
            Some(user) => self.users.user_exists(user),
            None => true,
        }
    }

    fn consume(&self, mail: Mail) -> Result<(), Error> {
        let local = mail
            .recipients
            .iter()
            .filter_map(|r| self.users.local_user(r))
            .filter(|user| self.users.user_exists(user))
            .map(str::to_owned)
            .collect::<BTreeSet<_>>();

        if local.is_empty() {
            warn!(
                "Message from {} has no recipients in {}",
                mail.sender,
                self.users.domain()
            );
        }

        for user in local {
            let id = self.store.add(&user, mail.clone());
            info!("Delivered message {} from {} to {}", id, mail.sender, user);
        }

        Ok(())
    }
}

pub struct MailboxServer {
    store: MailStore,
    dmtp: Listener,
    dmap: Listener,
}

impl MailboxServer {
    pub fn start(
        config: &MailboxConfig,
        keys: Arc<KeyStore>,
    ) -> Result<Self, Error> {
        if config.domain.is_empty() {
            return Err(Error::Config("mailbox.domain is not set".to_owned()));
        }

        let users = UserDirectory::new(&config.domain, config.users.clone());
        let store = MailStore::new();

        let delivery =
            Arc::new(MailboxDelivery::new(users.clone(), store.clone()));
        let dmtp_handler: Arc<Handler> = Arc::new(move |codec: Codec| {
            TransferServer::new(codec, &*delivery).run()
        });
        let dmtp = Listener::start(
            "dmtp",
            &config.dmtp_listen,
            config.connection_workers,
            config.idle_timeout(),
            dmtp_handler,
        )?;

        let context = MailboxContext {
            identity: config.identity.clone(),
            keys,
            users,
            store: store.clone(),
        };
        let dmap_handler: Arc<Handler> = Arc::new(move |codec: Codec| {
            AccessServer::new(codec, &context).run()
        });
        let dmap = match Listener::start(
            "dmap",
            &config.dmap_listen,
            config.connection_workers,
            config.idle_timeout(),
            dmap_handler,
        ) {
            Ok(dmap) => dmap,
            Err(e) => {
                dmtp.shutdown();
                return Err(e);
            },
        };

        info!("Mailbox server for {} started", config.domain);
        Ok(MailboxServer { store, dmtp, dmap })
    }

    pub fn store(&self) -> &MailStore {
        &self.store
    }

    pub fn dmtp_addr(&self) -> SocketAddr {
        self.dmtp.local_addr()
    }

    pub fn dmap_addr(&self) -> SocketAddr {
        self.dmap.local_addr()
    }

    pub fn shutdown(self) {
        self.dmtp.shutdown();
        self.dmap.shutdown();
        info!("Mailbox server stopped");
    }
}
