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

use std::io;
use std::sync::Arc;

use log::{info, warn};

use crate::service::{mailbox::MailboxServer, transfer::TransferServer};
use crate::support::sysexits::Sysexit;
use crate::support::system_config::SystemConfig;
use crate::wire::keys::KeyStore;

pub fn transfer(config: &SystemConfig) {
    let server = match TransferServer::start(&config.transfer) {
        Ok(server) => server,
        Err(e) => {
            log::error!("Failed to start transfer server: {}", e);
            Sysexit::from(&e).exit()
        },
    };

    info!(
        "Transfer server listening on {} for {} domain(s)",
        server.local_addr(),
        config.transfer.domains.len()
    );
    wait_for_stdin_eof();
    server.shutdown();
}

pub fn mailbox(config: &SystemConfig) {
    let keys = Arc::new(KeyStore::new(&config.keys.directory));
    let server = match MailboxServer::start(&config.mailbox, keys) {
        Ok(server) => server,
        Err(e) => {
            log::error!("Failed to start mailbox server: {}", e);
            Sysexit::from(&e).exit()
        },
    };

    info!(
        "Mailbox server for {} accepting mail on {} and users on {}",
        config.mailbox.domain,
        server.dmtp_addr(),
        server.dmap_addr()
    );
    wait_for_stdin_eof();
    server.shutdown();
}

fn wait_for_stdin_eof() {
    if let Err(e) = io::copy(&mut io::stdin(), &mut io::sink()) {
        warn!("Error reading standard input: {}", e);
    }

    info!("Standard input closed, shutting down");
}
