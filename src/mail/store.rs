//-
// Copyright (c) 2023, Jason Lingle
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

//! In-memory mailbox storage.
//!
//! Each user has an independent mailbox with its own lock and its own id
//! counter, so concurrent deliveries to different users never contend with
//! each other beyond the brief lookup of the mailbox itself. Ids start at 1,
//! strictly increase, and are never reused, even after deletion.
//!
//! Nothing here is persistent. Restarting the process loses all mail.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use super::message::Mail;

pub type MessageId = u64;

#[derive(Default)]
struct UserMailbox {
    next_id: AtomicU64,
    messages: Mutex<BTreeMap<MessageId, Mail>>,
}

impl UserMailbox {
    fn messages(&self) -> MutexGuard<'_, BTreeMap<MessageId, Mail>> {
        match self.messages.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// The mail of every user of one mailbox server.
///
/// Cloning a `MailStore` yields another handle to the same storage.
#[derive(Clone, Default)]
pub struct MailStore {
    users: Arc<RwLock<HashMap<String, Arc<UserMailbox>>>>,
}

impl MailStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn mailbox(&self, user: &str) -> Option<Arc<UserMailbox>> {
        let users = match self.users.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        users.get(user).cloned()
    }

    fn mailbox_or_create(&self, user: &str) -> Arc<UserMailbox> {
        if let Some(mailbox) = self.mailbox(user) {
            return mailbox;
        }

        let mut users = match self.users.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(users.entry(user.to_owned()).or_default())
    }

    /// Store `mail` for `user`, returning its new id.
    pub fn add(&self, user: &str, mail: Mail) -> MessageId {
        let mailbox = self.mailbox_or_create(user);
        // Assign under the lock so that ids also appear in order
        let mut messages = mailbox.messages();
        let id = mailbox.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        messages.insert(id, mail);
        id
    }

    /// List every message of `user`, in id order.
    pub fn list(&self, user: &str) -> Vec<(MessageId, Mail)> {
        let mailbox = match self.mailbox(user) {
            Some(mailbox) => mailbox,
            None => return Vec::new(),
        };

        let messages = mailbox.messages();
        messages
            .iter()
            .map(|(&id, mail)| (id, mail.clone()))
            .collect()
    }

    pub fn get(&self, user: &str, id: MessageId) -> Option<Mail> {
        let mailbox = self.mailbox(user)?;
        let messages = mailbox.messages();
        messages.get(&id).cloned()
    }

    /// Delete the given message, returning whether it existed.
    pub fn delete(&self, user: &str, id: MessageId) -> bool {
        let mailbox = match self.mailbox(user) {
            Some(mailbox) => mailbox,
            None => return false,
        };

        let mut messages = mailbox.messages();
        messages.remove(&id).is_some()
    }
}
