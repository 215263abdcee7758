//-
// Copyright (c) 2020, 2024, Jason Lingle
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

//! Fan-out of accepted mail to the servers of each recipient domain.
//!
//! Messages wait in a bounded queue, which blocks producers when full, and are
//! taken off it by a fixed set of worker threads. A worker handles one message
//! at a time, visiting its recipient domains one after another; different
//! messages are relayed concurrently and in no particular order.
//!
//! Failures never reach whoever submitted the message. They are collected in
//! a `RelayReport` and turned into a single bounce message back to the
//! sender. Problems delivering the bounce are only logged.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use log::{error, info, warn};

use super::resolver::Resolver;
use crate::dmtp::client::Client;
use crate::mail::{address, message::Mail};
use crate::support::error::Error;

pub const BOUNCE_SUBJECT: &str = "Undeliverable mail";

/// What went wrong while relaying one message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelayReport {
    /// Recipients the destination server said do not exist.
    pub unknown: BTreeSet<String>,
    /// Descriptions of the errors encountered.
    pub errors: BTreeSet<String>,
    /// Recipients for which delivery could not be confirmed.
    pub failed: BTreeSet<String>,
}

impl RelayReport {
    pub fn is_clean(&self) -> bool {
        self.unknown.is_empty()
            && self.errors.is_empty()
            && self.failed.is_empty()
    }

    /// The body of the bounce message describing this report.
    pub fn bounce_body(&self) -> String {
        fn list(set: &BTreeSet<String>, separator: &str) -> String {
            set.iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(separator)
        }

        let mut sections = Vec::new();
        if !self.unknown.is_empty() {
            sections.push(format!(
                "unknown recipients: {}",
                list(&self.unknown, ", ")
            ));
        }
        if !self.errors.is_empty() {
            sections.push(format!("errors: {}", list(&self.errors, " - ")));
        }
        if !self.failed.is_empty() {
            sections.push(format!(
                "delivery not confirmed for: {}",
                list(&self.failed, ", ")
            ));
        }

        sections.join(". ")
    }
}

/// Relays single messages.
pub struct Relayer {
    resolver: Arc<dyn Resolver>,
    bounce_sender: String,
    timeout: Duration,
}

impl Relayer {
    pub fn new(
        resolver: Arc<dyn Resolver>,
        bounce_sender: String,
        timeout: Duration,
    ) -> Self {
        Relayer {
            resolver,
            bounce_sender,
            timeout,
        }
    }

    /// Relay `mail` and, if anything went wrong, bounce it.
    pub fn process(&self, mail: Mail) {
        let report = self.relay(&mail);
        if report.is_clean() {
            info!(
                "Relayed message from {} to {} recipient(s)",
                mail.sender,
                mail.recipients.len()
            );
            return;
        }

        warn!(
            "Relaying message from {} was incomplete: {}",
            mail.sender,
            report.bounce_body()
        );

        if let Some(bounce) = self.bounce_for(&mail, &report) {
            let bounce_report = self.relay(&bounce);
            if !bounce_report.is_clean() {
                error!(
                    "Failed to deliver bounce to {}: {}",
                    mail.sender,
                    bounce_report.bounce_body()
                );
            }
        }
    }

    /// Deliver `mail` to the server of each of its recipient domains, in
    /// order of first appearance.
    pub fn relay(&self, mail: &Mail) -> RelayReport {
        let mut report = RelayReport::default();
        let (groups, invalid) = address::group_by_domain(&mail.recipients);
        report.unknown.extend(invalid);

        for (domain, recipients) in groups {
            let target = match self.resolver.resolve(&domain) {
                Some(target) => target,
                None => {
                    warn!("No server known for domain {}", domain);
                    report.errors.insert(format!("unknown domain {}", domain));
                    report.failed.extend(recipients);
                    continue;
                },
            };

            if let Err(e) =
                self.deliver(&target, mail, &recipients, &mut report.unknown)
            {
                warn!("Relaying to {} via {} failed: {}", domain, target, e);
                report.errors.insert(format!("{}: {}", domain, e));
                report.failed.extend(recipients);
            }
        }

        report
    }

    fn deliver(
        &self,
        target: &str,
        mail: &Mail,
        recipients: &[String],
        unknown: &mut BTreeSet<String>,
    ) -> Result<(), Error> {
        let mut client = Client::connect(target, self.timeout)?;
        client.send_mail(mail, |users| {
            for &user in users {
                // Report the address as the sender wrote it if possible
                let original = recipients
                    .iter()
                    .find(|r| address::user(r) == Some(user));
                if let Some(original) = original {
                    unknown.insert(original.clone());
                }
            }
        })?;
        client.quit()
    }

    /// Build the bounce for `mail` given what went wrong relaying it.
    ///
    /// Returns `None` if there is nothing to report or if bouncing would be
    /// pointless or loop.
    pub fn bounce_for(
        &self,
        mail: &Mail,
        report: &RelayReport,
    ) -> Option<Mail> {
        if report.is_clean() {
            return None;
        }

        if mail.sender.eq_ignore_ascii_case(&self.bounce_sender) {
            warn!("Not bouncing a bounce for {:?}", mail.recipients);
            return None;
        }

        match mail.sender_domain() {
            Some(ref domain) if self.resolver.resolve(domain).is_some() => (),
            _ => {
                warn!(
                    "Not bouncing to {}: its domain cannot be resolved",
                    mail.sender
                );
                return None;
            },
        }

        Some(Mail::new(
            self.bounce_sender.clone(),
            vec![mail.sender.clone()],
            BOUNCE_SUBJECT,
            report.bounce_body(),
        ))
    }
}

/// A handle for submitting messages to a `RelayPipeline`.
#[derive(Clone)]
pub struct RelayQueue {
    tx: Sender<Mail>,
}

impl RelayQueue {
    /// Queue `mail` for relaying, blocking while the queue is full.
    pub fn submit(&self, mail: Mail) -> Result<(), Error> {
        self.tx.send(mail).map_err(|_| Error::QueueClosed)
    }
}

/// A running pool of relay workers.
pub struct RelayPipeline {
    queue: RelayQueue,
    shutdown: Option<Sender<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl RelayPipeline {
    pub fn start(
        relayer: Arc<Relayer>,
        worker_count: usize,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = channel::bounded(capacity);
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);

        let workers = (0..worker_count.max(1))
            .map(|i| {
                let relayer = Arc::clone(&relayer);
                let rx = rx.clone();
                let shutdown_rx = shutdown_rx.clone();
                thread::Builder::new()
                    .name(format!("relay-{}", i))
                    .spawn(move || run_worker(&relayer, rx, shutdown_rx))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    error!("Failed to start relay worker: {}", e);
                    None
                },
            })
            .collect();

        RelayPipeline {
            queue: RelayQueue { tx },
            shutdown: Some(shutdown_tx),
            workers,
        }
    }

    pub fn queue(&self) -> RelayQueue {
        self.queue.clone()
    }

    /// Stop all workers and wait for them to exit.
    ///
    /// Messages still in the queue are dropped; a worker in the middle of a
    /// message finishes it first.
    pub fn shutdown(mut self) {
        self.shutdown.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("Relay worker panicked");
            }
        }
    }
}

fn run_worker(relayer: &Relayer, rx: Receiver<Mail>, shutdown: Receiver<()>) {
    loop {
        crossbeam::select! {
            recv(rx) -> mail => match mail {
                Ok(mail) => {
                    // Both channels may have been ready
                    if shutdown.try_recv()
                        == Err(channel::TryRecvError::Disconnected)
                    {
                        break;
                    }

                    relayer.process(mail);
                },
                Err(_) => break,
            },
            recv(shutdown) -> _ => break,
        }
    }
}

#[cfg(test)]
mod test {
    use std::net::TcpListener;
    use std::sync::Mutex;
    use std::time::Instant;

    use super::*;
    use crate::dmtp::server::{MailConsumer, Server};
    use crate::relay::resolver::StaticResolver;
    use crate::support::log_prefix::LogPrefix;
    use crate::wire::codec::Codec;

    const BOUNCE_SENDER: &str = "mailer-daemon@transfer.planet";

    /// A mailbox server for one domain which records what it receives.
    struct Mailbox {
        domain: &'static str,
        users: Vec<&'static str>,
        received: Mutex<Vec<Mail>>,
    }

    impl MailConsumer for Mailbox {
        fn accepts_recipient(&self, recipient: &str) -> bool {
            match (address::user(recipient), address::domain(recipient)) {
                (Some(user), Some(domain))
                    if domain.eq_ignore_ascii_case(self.domain) =>
                {
                    self.users.contains(&user)
                },
                _ => true,
            }
        }

        fn consume(&self, mail: Mail) -> Result<(), Error> {
            self.received.lock().unwrap().push(mail);
            Ok(())
        }
    }

    impl Mailbox {
        fn received(&self) -> Vec<Mail> {
            self.received.lock().unwrap().clone()
        }
    }

    /// Start a mailbox server on an ephemeral port, returning its address.
    fn start_mailbox(
        domain: &'static str,
        users: &[&'static str],
    ) -> (String, Arc<Mailbox>) {
        crate::init_test_log();

        let mailbox = Arc::new(Mailbox {
            domain,
            users: users.to_vec(),
            received: Mutex::new(Vec::new()),
        });
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server_mailbox = Arc::clone(&mailbox);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(_) => break,
                };
                let mailbox = Arc::clone(&server_mailbox);
                thread::spawn(move || {
                    let codec = Codec::from_tcp(
                        stream,
                        Duration::from_secs(10),
                        LogPrefix::new(format!("dmtp-{}", mailbox.domain)),
                    )
                    .unwrap();
                    let _ = Server::new(codec, &*mailbox).run();
                });
            }
        });

        (addr, mailbox)
    }

    fn relayer(domains: Vec<(&str, &str)>) -> Relayer {
        Relayer::new(
            Arc::new(StaticResolver::new(
                domains
                    .into_iter()
                    .map(|(d, a)| (d.to_owned(), a.to_owned())),
            )),
            BOUNCE_SENDER.to_owned(),
            Duration::from_secs(10),
        )
    }

    fn mail(sender: &str, recipients: &[&str]) -> Mail {
        Mail::new(
            sender,
            recipients.iter().map(|&r| r.to_owned()).collect(),
            "Doom",
            "Your planet is doomed",
        )
    }

    /// Start a server which accepts connections but never greets them until
    /// the returned sender is dropped. Each accepted connection is reported on
    /// the returned receiver.
    fn start_stalling_server() -> (String, Sender<()>, Receiver<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (release_tx, release_rx) = channel::bounded::<()>(0);
        let (accepted_tx, accepted_rx) = channel::unbounded();

        thread::spawn(move || {
            let mut held = Vec::new();
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(_) => break,
                };
                let _ = accepted_tx.send(());
                held.push(stream);
                // Blocks until released, then every connection is dropped
                let _ = release_rx.recv();
                held.clear();
            }
        });

        (addr, release_tx, accepted_rx)
    }

    /// An address on which nothing is listening.
    fn dead_address() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    }

    #[test]
    fn unresolvable_domains_bounce_once() {
        let (earth, earth_box) = start_mailbox("earth.planet", &["dib"]);
        let (irk, irk_box) = start_mailbox("irk.planet", &["zim"]);
        let relayer = relayer(vec![
            ("earth.planet", earth.as_str()),
            ("irk.planet", irk.as_str()),
        ]);

        let original = mail(
            "zim@irk.planet",
            &["gir@vort.planet", "dib@earth.planet", "tak@meekrob.planet"],
        );
        let report = relayer.relay(&original);
        assert!(report.unknown.is_empty());
        assert_eq!(
            vec!["unknown domain meekrob.planet", "unknown domain vort.planet"],
            report.errors.iter().map(String::as_str).collect::<Vec<_>>()
        );
        assert_eq!(
            vec!["gir@vort.planet", "tak@meekrob.planet"],
            report.failed.iter().map(String::as_str).collect::<Vec<_>>()
        );

        relayer.process(original.clone());

        // Delivered once by relay() and once more by process()
        assert_eq!(vec![original.clone(), original], earth_box.received());

        let bounces = irk_box.received();
        assert_eq!(1, bounces.len());
        let bounce = &bounces[0];
        assert_eq!(BOUNCE_SENDER, bounce.sender);
        assert_eq!(vec!["zim@irk.planet".to_owned()], bounce.recipients);
        assert_eq!(BOUNCE_SUBJECT, bounce.subject);
        assert!(bounce.body.contains("vort.planet"));
        assert!(bounce.body.contains("meekrob.planet"));
        assert!(!bounce.body.contains("dib@earth.planet"));
    }

    #[test]
    fn unknown_recipients_reported() {
        let (earth, earth_box) = start_mailbox("earth.planet", &["dib"]);
        let (irk, irk_box) = start_mailbox("irk.planet", &["zim"]);
        let relayer = relayer(vec![
            ("earth.planet", earth.as_str()),
            ("irk.planet", irk.as_str()),
        ]);

        let original =
            mail("zim@irk.planet", &["dib@earth.planet", "Gaz@earth.planet"]);
        let report = relayer.relay(&original);
        assert_eq!(
            vec!["Gaz@earth.planet"],
            report.unknown.iter().map(String::as_str).collect::<Vec<_>>()
        );
        assert!(report.errors.is_empty());
        assert!(report.failed.is_empty());
        assert_eq!(
            "unknown recipients: Gaz@earth.planet",
            report.bounce_body()
        );

        relayer.process(original);
        assert_eq!(2, earth_box.received().len());
        assert_eq!(1, irk_box.received().len());
    }

    #[test]
    fn clean_relay_does_not_bounce() {
        let (earth, earth_box) = start_mailbox("earth.planet", &["dib", "gaz"]);
        let (irk, irk_box) = start_mailbox("irk.planet", &["zim", "tak"]);
        let relayer = relayer(vec![
            ("earth.planet", earth.as_str()),
            ("irk.planet", irk.as_str()),
        ]);

        let original = mail(
            "zim@irk.planet",
            &["dib@earth.planet", "tak@irk.planet", "gaz@EARTH.planet"],
        );
        relayer.process(original.clone());

        // Each domain got the whole message exactly once
        assert_eq!(vec![original.clone()], earth_box.received());
        assert_eq!(vec![original], irk_box.received());
    }

    #[test]
    fn connection_failure_recorded() {
        let dead = dead_address();
        let relayer = relayer(vec![("earth.planet", dead.as_str())]);

        let report =
            relayer.relay(&mail("zim@irk.planet", &["dib@earth.planet"]));
        assert!(report.unknown.is_empty());
        assert_eq!(1, report.errors.len());
        assert!(report.errors.iter().all(|e| e.starts_with("earth.planet: ")));
        assert_eq!(
            vec!["dib@earth.planet"],
            report.failed.iter().map(String::as_str).collect::<Vec<_>>()
        );
    }

    #[test]
    fn bounce_suppression() {
        let (irk, _) = start_mailbox("irk.planet", &["zim"]);
        let relayer = relayer(vec![("irk.planet", irk.as_str())]);

        let mut report = RelayReport::default();
        assert_eq!(
            None,
            relayer.bounce_for(&mail("zim@irk.planet", &["a@b.cd"]), &report)
        );

        report.failed.insert("a@b.cd".to_owned());
        assert!(relayer
            .bounce_for(&mail("zim@irk.planet", &["a@b.cd"]), &report)
            .is_some());
        assert_eq!(
            None,
            relayer.bounce_for(&mail(BOUNCE_SENDER, &["a@b.cd"]), &report)
        );
        assert_eq!(
            None,
            relayer.bounce_for(&mail("dib@earth.planet", &["a@b.cd"]), &report)
        );
    }

    #[test]
    fn bounce_body_layout() {
        let mut report = RelayReport::default();
        report.unknown.insert("b@x.yz".to_owned());
        report.unknown.insert("a@x.yz".to_owned());
        report.errors.insert("unknown domain q.rs".to_owned());
        report.errors.insert("x.yz: Connection refused".to_owned());
        report.failed.insert("c@q.rs".to_owned());

        assert_eq!(
            "unknown recipients: a@x.yz, b@x.yz. \
             errors: unknown domain q.rs - x.yz: Connection refused. \
             delivery not confirmed for: c@q.rs",
            report.bounce_body()
        );
    }

    #[test]
    fn pipeline_relays_concurrently() {
        let (earth, earth_box) = start_mailbox("earth.planet", &["dib"]);
        let relayer =
            Arc::new(relayer(vec![("earth.planet", earth.as_str())]));
        let pipeline = RelayPipeline::start(relayer, 3, 4);
        let queue = pipeline.queue();

        for i in 0..20 {
            let mut m = mail("zim@irk.planet", &["dib@earth.planet"]);
            m.subject = i.to_string();
            queue.submit(m).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(30);
        while earth_box.received().len() < 20 {
            assert!(Instant::now() < deadline, "Relay did not finish");
            thread::sleep(Duration::from_millis(10));
        }

        let mut subjects = earth_box
            .received()
            .into_iter()
            .map(|m| m.subject.parse::<u32>().unwrap())
            .collect::<Vec<_>>();
        subjects.sort_unstable();
        assert_eq!((0..20).collect::<Vec<_>>(), subjects);

        pipeline.shutdown();
        assert_matches!(
            Err(Error::QueueClosed),
            queue.submit(mail("zim@irk.planet", &["dib@earth.planet"]))
        );
    }

    #[test]
    fn full_queue_blocks_submitter() {
        crate::init_test_log();

        let (void, release, accepted) = start_stalling_server();
        let relayer = Arc::new(relayer(vec![("void.planet", void.as_str())]));
        let pipeline = RelayPipeline::start(relayer, 1, 1);
        let queue = pipeline.queue();

        // The only worker takes this one and stalls on the connection
        queue
            .submit(mail("zim@irk.planet", &["gir@void.planet"]))
            .unwrap();
        accepted.recv_timeout(Duration::from_secs(10)).unwrap();
        // This one fills the queue
        queue
            .submit(mail("zim@irk.planet", &["gir@void.planet"]))
            .unwrap();

        let (done_tx, done_rx) = channel::bounded(1);
        let blocked_queue = queue.clone();
        let submitter = thread::spawn(move || {
            let result = blocked_queue
                .submit(mail("zim@irk.planet", &["gir@void.planet"]));
            let _ = done_tx.send(());
            result
        });

        assert_matches!(
            Err(channel::RecvTimeoutError::Timeout),
            done_rx.recv_timeout(Duration::from_millis(300))
        );

        drop(release);
        done_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        submitter.join().unwrap().unwrap();

        pipeline.shutdown();
    }
}
