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

//! Symmetric and asymmetric primitives used by secure sessions.
//!
//! A secure session encrypts each line with AES-256-CTR. Each direction of
//! the connection has its own continuous keystream. Lines sent by the
//! initiator use the shared IV as the initial counter block; lines sent by the
//! responder use the shared IV with the top bit of its first byte inverted, so
//! the two keystreams never overlap. Lines are base64-encoded after
//! encryption so that the framing stays line-oriented.
//!
//! The session key is exchanged encrypted with RSA using OAEP padding.

use std::fmt;

use openssl::{
    pkey::{HasPublic, Private},
    rsa::{Padding, Rsa},
    symm::{Cipher, Crypter, Mode},
};
use rand::{rngs::OsRng, Rng};
use secstr::{SecBox, SecVec};

use crate::support::error::Error;

pub const KEY_SIZE: usize = 32;
pub const IV_SIZE: usize = 16;

/// Which end of the connection a `SessionCipher` serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// The end which issued `startsecure`.
    Initiator,
    Responder,
}

impl Role {
    fn peer(self) -> Self {
        match self {
            Role::Initiator => Role::Responder,
            Role::Responder => Role::Initiator,
        }
    }
}

/// The symmetric cipher material of one secure session.
///
/// The raw key and IV are held in locked memory which is zeroed when this
/// value is dropped.
pub struct SessionCipher {
    key: SecBox<[u8; KEY_SIZE]>,
    iv: SecBox<[u8; IV_SIZE]>,
    encryptor: Crypter,
    decryptor: Crypter,
}

impl SessionCipher {
    /// Generate cipher material with a fresh random key and IV.
    pub fn generate(role: Role) -> Result<Self, Error> {
        // Initialise to 0 and generate each byte individually so that the
        // secrets do not come into existence outside of the locked area.
        let mut key = SecBox::new(Box::new([0u8; KEY_SIZE]));
        for i in 0..KEY_SIZE {
            key.unsecure_mut()[i] = OsRng.gen();
        }
        let mut iv = SecBox::new(Box::new([0u8; IV_SIZE]));
        for i in 0..IV_SIZE {
            iv.unsecure_mut()[i] = OsRng.gen();
        }
        Self::new(key, iv, role)
    }

    /// Build cipher material from a key and IV received from the peer.
    pub fn from_parts(
        key: &[u8],
        iv: &[u8],
        role: Role,
    ) -> Result<Self, Error> {
        if KEY_SIZE != key.len() || IV_SIZE != iv.len() {
            return Err(Error::Handshake(format!(
                "bad key/IV length {}/{}",
                key.len(),
                iv.len()
            )));
        }

        let mut secure_key = SecBox::new(Box::new([0u8; KEY_SIZE]));
        secure_key.unsecure_mut().copy_from_slice(key);
        let mut secure_iv = SecBox::new(Box::new([0u8; IV_SIZE]));
        secure_iv.unsecure_mut().copy_from_slice(iv);
        Self::new(secure_key, secure_iv, role)
    }

    fn new(
        key: SecBox<[u8; KEY_SIZE]>,
        iv: SecBox<[u8; IV_SIZE]>,
        role: Role,
    ) -> Result<Self, Error> {
        let encryptor = crypter(
            Mode::Encrypt,
            key.unsecure(),
            direction_iv(&iv, role).unsecure(),
        )?;
        let decryptor = crypter(
            Mode::Decrypt,
            key.unsecure(),
            direction_iv(&iv, role.peer()).unsecure(),
        )?;
        Ok(SessionCipher {
            key,
            iv,
            encryptor,
            decryptor,
        })
    }

    pub fn key(&self) -> &[u8] {
        &self.key.unsecure()[..]
    }

    /// The shared IV, as exchanged during the handshake.
    pub fn iv(&self) -> &[u8] {
        &self.iv.unsecure()[..]
    }

    /// Encrypt `line` and return it as base64.
    pub fn encrypt_line(&mut self, line: &str) -> Result<String, Error> {
        let ciphertext = apply(&mut self.encryptor, line.as_bytes())?;
        Ok(base64::encode(&ciphertext))
    }

    /// Decode and decrypt a base64 `line` produced by the peer's
    /// `encrypt_line()`.
    ///
    /// Any failure is a framing error.
    pub fn decrypt_line(&mut self, line: &str) -> Result<String, Error> {
        let ciphertext = base64::decode(line).map_err(|_| Error::Framing)?;
        let cleartext = apply(&mut self.decryptor, &ciphertext)?;
        String::from_utf8(cleartext).map_err(|_| Error::Framing)
    }
}

impl fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionCipher {{ <redacted> }}")
    }
}

/// The initial counter block for lines sent by `sender`.
fn direction_iv(
    iv: &SecBox<[u8; IV_SIZE]>,
    sender: Role,
) -> SecBox<[u8; IV_SIZE]> {
    let mut out = SecBox::new(Box::new(*iv.unsecure()));
    if Role::Responder == sender {
        out.unsecure_mut()[0] ^= 0x80;
    }
    out
}

fn crypter(mode: Mode, key: &[u8], iv: &[u8]) -> Result<Crypter, Error> {
    let mut c = Crypter::new(Cipher::aes_256_ctr(), mode, key, Some(iv))?;
    c.pad(false);
    Ok(c)
}

fn apply(crypter: &mut Crypter, input: &[u8]) -> Result<Vec<u8>, Error> {
    let mut output =
        vec![0u8; input.len() + Cipher::aes_256_ctr().block_size()];
    let n = crypter.update(input, &mut output)?;
    output.truncate(n);
    Ok(output)
}

/// Encrypt `data` to the holder of `key`.
pub fn rsa_encrypt(
    key: &Rsa<impl HasPublic>,
    data: &[u8],
) -> Result<Vec<u8>, Error> {
    let mut output = vec![0u8; key.size() as usize];
    let n = key.public_encrypt(data, &mut output, Padding::PKCS1_OAEP)?;
    output.truncate(n);
    Ok(output)
}

/// Decrypt `data` which was encrypted to `key`.
///
/// The result is kept in locked memory since it usually carries key material.
pub fn rsa_decrypt(
    key: &Rsa<Private>,
    data: &[u8],
) -> Result<SecVec<u8>, Error> {
    // private_decrypt() requires the output buffer to be at least the size of
    // the RSA modulus
    let mut output = vec![0u8; key.size() as usize];
    let n = key
        .private_decrypt(data, &mut output, Padding::PKCS1_OAEP)
        .map_err(|_| Error::Handshake("bad RSA ciphertext".to_owned()))?;
    output.truncate(n);
    Ok(SecVec::new(output))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::wire::keys::test_keys::TEST_PRIVATE_KEY;

    #[test]
    fn lines_round_trip_across_two_ends() {
        let mut alice = SessionCipher::generate(Role::Initiator).unwrap();
        let mut bob =
            SessionCipher::from_parts(alice.key(), alice.iv(), Role::Responder)
                .unwrap();

        for line in &["ok", "list", "", "data with spaces and ünïcödé"] {
            let encrypted = alice.encrypt_line(line).unwrap();
            assert!(!encrypted.contains('\n'));
            assert_eq!(*line, bob.decrypt_line(&encrypted).unwrap());

            let encrypted = bob.encrypt_line(line).unwrap();
            assert_eq!(*line, alice.decrypt_line(&encrypted).unwrap());
        }
    }

    #[test]
    fn directions_use_distinct_keystreams() {
        let mut alice = SessionCipher::generate(Role::Initiator).unwrap();
        let mut bob =
            SessionCipher::from_parts(alice.key(), alice.iv(), Role::Responder)
                .unwrap();

        // Both ends open with the same line
        let from_alice =
            base64::decode(alice.encrypt_line("login dib hunter2").unwrap())
                .unwrap();
        let from_bob =
            base64::decode(bob.encrypt_line("login dib hunter2").unwrap())
                .unwrap();
        assert_ne!(from_alice, from_bob);

        // With a shared keystream, XORing both ciphertexts with a known line
        // sent one way would reveal a secret line sent the other way.
        let mut alice = SessionCipher::generate(Role::Initiator).unwrap();
        let mut bob =
            SessionCipher::from_parts(alice.key(), alice.iv(), Role::Responder)
                .unwrap();
        let known = "list inbox with flags";
        let secret = "login zim irkenpower";
        let from_alice =
            base64::decode(alice.encrypt_line(known).unwrap()).unwrap();
        let from_bob =
            base64::decode(bob.encrypt_line(secret).unwrap()).unwrap();
        let recovered = from_alice
            .iter()
            .zip(&from_bob)
            .zip(known.as_bytes())
            .map(|((&a, &b), &k)| a ^ b ^ k)
            .collect::<Vec<u8>>();
        assert_ne!(&secret.as_bytes()[..recovered.len()], &recovered[..]);

        // Each end still decrypts what the other sent
        assert_eq!(
            known,
            bob.decrypt_line(&base64::encode(&from_alice)).unwrap()
        );
        assert_eq!(
            secret,
            alice.decrypt_line(&base64::encode(&from_bob)).unwrap()
        );
    }

    #[test]
    fn keystream_advances() {
        let mut cipher = SessionCipher::generate(Role::Initiator).unwrap();
        let a = cipher.encrypt_line("same").unwrap();
        let b = cipher.encrypt_line("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_garbles() {
        let mut alice = SessionCipher::generate(Role::Initiator).unwrap();
        let mut mallory = SessionCipher::generate(Role::Initiator).unwrap();
        let encrypted = alice.encrypt_line("login dib hunter2").unwrap();
        match mallory.decrypt_line(&encrypted) {
            Ok(s) => assert_ne!("login dib hunter2", s),
            Err(Error::Framing) => (),
            Err(e) => panic!("Unexpected error: {}", e),
        }
    }

    #[test]
    fn bad_base64_is_framing_error() {
        let mut cipher = SessionCipher::generate(Role::Initiator).unwrap();
        assert_matches!(Err(Error::Framing), cipher.decrypt_line("!!!"));
    }

    #[test]
    fn bad_lengths_rejected() {
        assert_matches!(
            Err(Error::Handshake(_)),
            SessionCipher::from_parts(
                &[0u8; 16],
                &[0u8; IV_SIZE],
                Role::Initiator
            )
        );
        assert_matches!(
            Err(Error::Handshake(_)),
            SessionCipher::from_parts(
                &[0u8; KEY_SIZE],
                &[0u8; 8],
                Role::Responder
            )
        );
    }

    #[test]
    fn rsa_round_trip() {
        let encrypted = rsa_encrypt(&*TEST_PRIVATE_KEY, b"ok a b c").unwrap();
        let decrypted = rsa_decrypt(&*TEST_PRIVATE_KEY, &encrypted).unwrap();
        assert_eq!(b"ok a b c", decrypted.unsecure());

        let mut corrupt = encrypted;
        corrupt[10] ^= 1;
        assert_matches!(
            Err(Error::Handshake(_)),
            rsa_decrypt(&*TEST_PRIVATE_KEY, &corrupt)
        );
    }
}
