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

//! One-shot commands run against the configured servers.

use std::fs;
use std::path::Path;
use std::time::Duration;

use log::warn;
use secstr::SecVec;

use super::main::SendSubcommand;
use crate::dmap::client::Client as AccessClient;
use crate::dmtp::client::Client as TransferClient;
use crate::mail::{message::Mail, store::MessageId};
use crate::support::error::Error;
use crate::support::sysexits::*;
use crate::support::system_config::SystemConfig;
use crate::wire::keys::KeyStore;

const TIMEOUT: Duration = Duration::from_secs(30);

/// Exit with the status appropriate for `e`.
fn fail(what: &str, e: Error) -> ! {
    eprintln!("{}: {}", what, e);
    Sysexit::from(&e).exit()
}

/// Read the base64-encoded shared secret at `path`.
fn read_hmac_key(path: &Path) -> Result<SecVec<u8>, Error> {
    let text = SecVec::new(fs::read(path).map_err(|e| {
        Error::Config(format!("reading '{}': {}", path.display(), e))
    })?);
    let text = text.unsecure();
    let start = text
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(text.len());
    let end = text
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |last| last + 1);
    let key = base64::decode(&text[start..end]).map_err(|e| {
        Error::Config(format!("in '{}': {}", path.display(), e))
    })?;
    Ok(SecVec::new(key))
}

fn hmac_key(config: &SystemConfig) -> Option<SecVec<u8>> {
    let path = config.client.hmac_key.as_ref()?;
    match read_hmac_key(path) {
        Ok(key) => Some(key),
        Err(e) => fail("Bad integrity key", e),
    }
}

pub fn send(config: &SystemConfig, cmd: SendSubcommand) {
    if config.client.address.is_empty() {
        eprintln!("client.address must be set to send mail");
        EX_CONFIG.exit();
    }

    let mut mail = Mail::new(
        config.client.address.clone(),
        cmd.to,
        cmd.subject,
        cmd.data,
    );
    if let Some(key) = hmac_key(config) {
        if let Err(e) = mail.sign(key.unsecure()) {
            fail("Failed to sign message", e);
        }
    }

    let result = TransferClient::connect(&config.client.transfer, TIMEOUT)
        .and_then(|mut client| {
            client.send_mail(&mail, |unknown| {
                warn!("Server does not know {}", unknown.join(", "))
            })?;
            client.quit()
        });
    if let Err(e) = result {
        fail("Sending failed", e);
    }

    println!("Message queued for {}", mail.joined_recipients());
}

/// Connect to the mailbox server, securing the session if configured, and
/// log in.
fn open_mailbox(config: &SystemConfig) -> AccessClient {
    let client = &config.client;
    let result = AccessClient::connect(&client.mailbox, TIMEOUT).and_then(
        |mut session| {
            if client.secure {
                let keys = KeyStore::new(&config.keys.directory);
                let identity = session.start_secure(&keys)?;
                log::info!("Secure session established with {}", identity);
            }
            session.login(&client.user, &client.password)?;
            Ok(session)
        },
    );

    match result {
        Ok(session) => session,
        Err(e) => fail("Failed to open mailbox", e),
    }
}

fn close_mailbox(session: AccessClient) {
    if let Err(e) = session.quit() {
        warn!("Error closing session: {}", e);
    }
}

pub fn inbox(config: &SystemConfig) {
    let mut session = open_mailbox(config);
    let summaries = match session.list() {
        Ok(summaries) => summaries,
        Err(e) => fail("Listing failed", e),
    };
    close_mailbox(session);

    if summaries.is_empty() {
        println!("No messages");
    }
    for summary in summaries {
        println!(
            "{:>6}  {:<30}  {}",
            summary.id, summary.sender, summary.subject
        );
    }
}

fn fetch(config: &SystemConfig, id: MessageId) -> Mail {
    let mut session = open_mailbox(config);
    let mail = match session.show(id) {
        Ok(mail) => mail,
        Err(e) => fail("Fetching message failed", e),
    };
    close_mailbox(session);
    mail
}

pub fn show(config: &SystemConfig, id: MessageId) {
    let mail = fetch(config, id);
    println!("From:    {}", mail.sender);
    println!("To:      {}", mail.joined_recipients());
    println!("Subject: {}", mail.subject);
    if let Some(ref tag) = mail.integrity_tag {
        println!("Hash:    {}", tag);
    }
    println!();
    println!("{}", mail.body);
}

pub fn delete(config: &SystemConfig, id: MessageId) {
    let mut session = open_mailbox(config);
    if let Err(e) = session.delete(id) {
        fail("Deleting message failed", e);
    }
    close_mailbox(session);
    println!("Deleted message {}", id);
}

pub fn verify(config: &SystemConfig, id: MessageId) {
    let key = match hmac_key(config) {
        Some(key) => key,
        None => {
            eprintln!("client.hmac_key must be set to verify messages");
            EX_CONFIG.exit()
        },
    };

    let mail = fetch(config, id);
    match mail.verify(key.unsecure()) {
        Ok(true) => println!("Message {} is intact", id),
        Ok(false) => {
            println!("Message {} failed the integrity check", id);
            EX_DATAERR.exit()
        },
        Err(e) => fail("Verification failed", e),
    }
}
