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

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use super::mailbox::MailboxServer;
use super::transfer::TransferServer;
use crate::dmap::client::Client as AccessClient;
use crate::dmtp::client::Client as TransferClient;
use crate::mail::{message::Mail, store::MailStore};
use crate::relay::pipeline::BOUNCE_SUBJECT;
use crate::support::{
    error::Error,
    system_config::{MailboxConfig, TransferConfig},
};
use crate::wire::keys::{test_keys, KeyStore};

const TIMEOUT: Duration = Duration::from_secs(10);

struct System {
    _key_dir: TempDir,
    keys: Arc<KeyStore>,
    earth: MailboxServer,
    irk: MailboxServer,
    transfer: TransferServer,
}

fn mailbox_config(domain: &str, users: &[(&str, &str)]) -> MailboxConfig {
    MailboxConfig {
        domain: domain.to_owned(),
        identity: test_keys::TEST_IDENTITY.to_owned(),
        dmtp_listen: "127.0.0.1:0".to_owned(),
        dmap_listen: "127.0.0.1:0".to_owned(),
        connection_workers: 2,
        idle_timeout_secs: 60,
        users: users
            .iter()
            .map(|&(user, password)| (user.to_owned(), password.to_owned()))
            .collect(),
    }
}

fn start_system() -> System {
    crate::init_test_log();

    let (key_dir, keys) = test_keys::key_store();
    let keys = Arc::new(keys);
    let earth = MailboxServer::start(
        &mailbox_config(
            "earth.planet",
            &[("dib", "hunter2"), ("gaz", "gameslave")],
        ),
        Arc::clone(&keys),
    )
    .unwrap();
    let irk = MailboxServer::start(
        &mailbox_config("irk.planet", &[("zim", "gir")]),
        Arc::clone(&keys),
    )
    .unwrap();

    let mut domains = BTreeMap::new();
    domains.insert("earth.planet".to_owned(), earth.dmtp_addr().to_string());
    domains.insert("irk.planet".to_owned(), irk.dmtp_addr().to_string());
    let transfer = TransferServer::start(&TransferConfig {
        listen: "127.0.0.1:0".to_owned(),
        connection_workers: 2,
        relay_workers: 2,
        queue_capacity: 4,
        connect_timeout_secs: 5,
        domains,
        ..TransferConfig::default()
    })
    .unwrap();

    System {
        _key_dir: key_dir,
        keys,
        earth,
        irk,
        transfer,
    }
}

impl System {
    fn send(&self, mail: &Mail) {
        let mut client = TransferClient::connect(
            &self.transfer.local_addr().to_string(),
            TIMEOUT,
        )
        .unwrap();
        client
            .send_mail(mail, |unknown| {
                panic!("Transfer server rejected {:?}", unknown)
            })
            .unwrap();
        client.quit().unwrap();
    }

    fn shutdown(self) {
        self.transfer.shutdown();
        self.earth.shutdown();
        self.irk.shutdown();
    }
}

fn await_mail(store: &MailStore, user: &str, count: usize) -> Vec<Mail> {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let messages = store.list(user);
        if messages.len() >= count {
            return messages.into_iter().map(|(_, mail)| mail).collect();
        }

        assert!(
            Instant::now() < deadline,
            "Timed out waiting for mail to {}",
            user
        );
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn mail_relayed_and_bounced_end_to_end() {
    let system = start_system();

    let mut mail = Mail::new(
        "zim@irk.planet",
        vec![
            "dib@earth.planet".to_owned(),
            "nobody@earth.planet".to_owned(),
            "x@unknown.planet".to_owned(),
        ],
        "Doom",
        "Your planet is doomed",
    );
    mail.sign(b"the tallest").unwrap();
    system.send(&mail);

    assert_eq!(vec![mail.clone()], await_mail(system.earth.store(), "dib", 1));

    let bounces = await_mail(system.irk.store(), "zim", 1);
    assert_eq!(1, bounces.len());
    assert_eq!(BOUNCE_SUBJECT, bounces[0].subject);
    assert_eq!(vec!["zim@irk.planet".to_owned()], bounces[0].recipients);
    assert_eq!(
        "unknown recipients: nobody@earth.planet. \
         errors: unknown domain unknown.planet. \
         delivery not confirmed for: x@unknown.planet",
        bounces[0].body
    );

    let mut client = AccessClient::connect(
        &system.earth.dmap_addr().to_string(),
        TIMEOUT,
    )
    .unwrap();
    assert_eq!(
        test_keys::TEST_IDENTITY,
        client.start_secure(&system.keys).unwrap()
    );
    client.login("dib", "hunter2").unwrap();
    let listed = client.list().unwrap();
    assert_eq!(1, listed.len());
    assert_eq!("Doom", listed[0].subject);

    let shown = client.show(listed[0].id).unwrap();
    assert_eq!(mail, shown);
    assert!(shown.verify(b"the tallest").unwrap());
    client.delete(listed[0].id).unwrap();
    assert!(client.list().unwrap().is_empty());
    client.quit().unwrap();

    assert!(system.earth.store().list("gaz").is_empty());
    system.shutdown();
}

#[test]
fn messages_to_several_domains_arrive_everywhere() {
    let system = start_system();

    let mail = Mail::new(
        "dib@earth.planet",
        vec![
            "zim@irk.planet".to_owned(),
            "gaz@earth.planet".to_owned(),
            "dib@earth.planet".to_owned(),
        ],
        "Proof",
        "I have proof",
    );
    system.send(&mail);

    assert_eq!(vec![mail.clone()], await_mail(system.irk.store(), "zim", 1));
    assert_eq!(vec![mail.clone()], await_mail(system.earth.store(), "gaz", 1));
    assert_eq!(vec![mail], await_mail(system.earth.store(), "dib", 1));
    system.shutdown();
}

#[test]
fn shutdown_disconnects_idle_clients() {
    let system = start_system();

    let mut client = AccessClient::connect(
        &system.earth.dmap_addr().to_string(),
        TIMEOUT,
    )
    .unwrap();
    client.login("gaz", "gameslave").unwrap();

    system.shutdown();
    match client.list() {
        Err(e) => assert!(e.is_disconnect(), "Unexpected error: {:?}", e),
        Ok(r) => panic!("Unexpected success: {:?}", r),
    }
}

#[test]
fn mailbox_requires_domain() {
    crate::init_test_log();

    let (_key_dir, keys) = test_keys::key_store();
    match MailboxServer::start(&mailbox_config("", &[]), Arc::new(keys)) {
        Err(Error::Config(_)) => (),
        Err(e) => panic!("Unexpected error: {:?}", e),
        Ok(_) => panic!("Started without a domain"),
    }
}
