//-
// Copyright (c) 2020, 2023, Jason Lingle
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

//! Lookup of RSA key material by identity token.
//!
//! Keys live in a single directory. The private key of identity `foo` is in
//! `foo.pem`; its public key is in `foo_pub.pem`. A component only needs the
//! private keys of its own identities; clients only need public keys.
//!
//! Loaded keys are cached for the life of the `KeyStore`.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;
use log::info;
use openssl::{
    pkey::{Private, Public},
    rsa::Rsa,
};
use regex::Regex;

use crate::support::error::Error;

lazy_static! {
    static ref RX_IDENTITY: Regex =
        Regex::new("^[a-zA-Z0-9_-][a-zA-Z0-9._-]*$").unwrap();
}

/// Whether `identity` can safely be used to name a key file.
pub fn is_valid_identity(identity: &str) -> bool {
    RX_IDENTITY.is_match(identity)
}

#[derive(Debug)]
pub struct KeyStore {
    root: PathBuf,
    public: Mutex<HashMap<String, Arc<Rsa<Public>>>>,
    private: Mutex<HashMap<String, Arc<Rsa<Private>>>>,
}

impl KeyStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        KeyStore {
            root: root.into(),
            public: Mutex::new(HashMap::new()),
            private: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn public_key(
        &self,
        identity: &str,
    ) -> Result<Arc<Rsa<Public>>, Error> {
        let path = self.path(identity, "_pub.pem")?;
        cached(&self.public, identity, || {
            let pem = read_key_file(identity, &path)?;
            Ok(Rsa::public_key_from_pem(&pem)?)
        })
    }

    pub fn private_key(
        &self,
        identity: &str,
    ) -> Result<Arc<Rsa<Private>>, Error> {
        let path = self.path(identity, ".pem")?;
        cached(&self.private, identity, || {
            let pem = read_key_file(identity, &path)?;
            let key = Rsa::private_key_from_pem(&pem)?;
            key.check_key()?;
            Ok(key)
        })
    }

    /// Write a new key pair for `identity` into the store's directory.
    ///
    /// Existing key files are never overwritten.
    pub fn generate(&self, identity: &str, bits: u32) -> Result<(), Error> {
        let private_path = self.path(identity, ".pem")?;
        let public_path = self.path(identity, "_pub.pem")?;
        if private_path.exists() || public_path.exists() {
            return Err(Error::Config(format!(
                "Key for '{}' already exists in {}",
                identity,
                self.root.display()
            )));
        }

        let key = Rsa::generate(bits)?;
        fs::create_dir_all(&self.root)?;
        fs::write(&public_path, key.public_key_to_pem()?)?;
        write_private(&private_path, &key.private_key_to_pem()?)?;
        info!(
            "Generated {}-bit key pair for '{}' in {}",
            bits,
            identity,
            self.root.display()
        );
        Ok(())
    }

    fn path(&self, identity: &str, suffix: &str) -> Result<PathBuf, Error> {
        if !is_valid_identity(identity) {
            return Err(Error::NoSuchKey(identity.to_owned()));
        }

        Ok(self.root.join(format!("{}{}", identity, suffix)))
    }
}

fn cached<T>(
    cache: &Mutex<HashMap<String, Arc<T>>>,
    identity: &str,
    load: impl FnOnce() -> Result<T, Error>,
) -> Result<Arc<T>, Error> {
    {
        let cache = match cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(key) = cache.get(identity) {
            return Ok(Arc::clone(key));
        }
    }

    // Two threads may race to load the same key. That is harmless; the loser
    // just replaces an identical value.
    let key = Arc::new(load()?);
    let mut cache = match cache.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    cache.insert(identity.to_owned(), Arc::clone(&key));
    Ok(key)
}

fn read_key_file(identity: &str, path: &Path) -> Result<Vec<u8>, Error> {
    fs::read(path).map_err(|e| {
        if io::ErrorKind::NotFound == e.kind() {
            Error::NoSuchKey(identity.to_owned())
        } else {
            Error::Io(e)
        }
    })
}

#[cfg(unix)]
fn write_private(path: &Path, data: &[u8]) -> io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(data)
}

#[cfg(not(unix))]
fn write_private(path: &Path, data: &[u8]) -> io::Result<()> {
    fs::write(path, data)
}
