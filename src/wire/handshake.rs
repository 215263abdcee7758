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

//! The `startsecure` key exchange.
//!
//! After the responder has answered `startsecure` with `ok <identity>`:
//!
//! 1. The initiator picks a random nonce N and fresh session key K and IV V,
//!    and sends `ok b64(N) b64(K) b64(V)`, RSA-encrypted to the responder's
//!    public key and base64-encoded.
//!
//! 2. The responder decrypts it, installs K/V, and answers `ok b64(N)` under
//!    the new session cipher.
//!
//! 3. The initiator checks that N came back intact, then sends `ok` under the
//!    session cipher. The responder considers the session secure only once it
//!    has read this acknowledgement.
//!
//! Any failure drops the session cipher and ends the connection; a handshake
//! is never retried on the same connection.

use log::{info, warn};
use openssl::{
    pkey::{HasPublic, Private},
    rsa::Rsa,
};
use rand::{rngs::OsRng, Rng};
use secstr::{SecBox, SecVec};

use super::cipher::{rsa_decrypt, rsa_encrypt, Role, SessionCipher};
use super::codec::{split_command, Codec};
use crate::support::error::Error;

pub const NONCE_SIZE: usize = 32;

/// The secrets generated by the initiator for one handshake.
///
/// Everything in here is zeroed when it is dropped, whichever way the
/// handshake ends.
pub struct HandshakeMaterial {
    nonce: SecBox<[u8; NONCE_SIZE]>,
    cipher: SessionCipher,
}

impl HandshakeMaterial {
    pub fn generate() -> Result<Self, Error> {
        let mut nonce = SecBox::new(Box::new([0u8; NONCE_SIZE]));
        for i in 0..NONCE_SIZE {
            nonce.unsecure_mut()[i] = OsRng.gen();
        }

        Ok(HandshakeMaterial {
            nonce,
            cipher: SessionCipher::generate(Role::Initiator)?,
        })
    }

    pub fn nonce(&self) -> &[u8] {
        &self.nonce.unsecure()[..]
    }

    /// Build `ok b64(N) b64(K) b64(V)` directly in locked memory.
    fn offer(&self) -> SecVec<u8> {
        let parts = [self.nonce(), self.cipher.key(), self.cipher.iv()];
        let len = parts
            .iter()
            .map(|part| 1 + (part.len() + 2) / 3 * 4)
            .sum::<usize>()
            + 2;

        let mut offer = SecVec::new(vec![0u8; len]);
        let buf = offer.unsecure_mut();
        buf[..2].copy_from_slice(b"ok");
        let mut pos = 2;
        for part in &parts {
            buf[pos] = b' ';
            pos += 1;
            pos += base64::encode_config_slice(
                part,
                base64::STANDARD,
                &mut buf[pos..],
            );
        }
        offer
    }
}

/// Run the initiator side of the handshake on `codec`, which must already
/// have received `ok <identity>` in response to `startsecure`.
///
/// On success, `codec` is encrypted. On failure, it is left in plaintext mode
/// and the connection must be abandoned.
pub fn initiate(
    codec: &mut Codec,
    responder_key: &Rsa<impl HasPublic>,
) -> Result<(), Error> {
    let material = HandshakeMaterial::generate()?;
    let offer = rsa_encrypt(responder_key, material.offer().unsecure())?;
    codec.write_line(&base64::encode(&offer))?;

    let HandshakeMaterial { nonce, cipher } = material;
    codec.set_cipher(cipher);

    let result = read_challenge_reply(codec, nonce.unsecure())
        .and_then(|_| codec.write_line("ok"));
    if let Err(ref e) = result {
        warn!("{} Secure handshake failed: {}", codec.log_prefix(), e);
        codec.clear_cipher();
    } else {
        codec.log_prefix().set_secure(true);
        info!("{} Secure session established", codec.log_prefix());
    }

    result
}

fn read_challenge_reply(
    codec: &mut Codec,
    nonce: &[u8; NONCE_SIZE],
) -> Result<(), Error> {
    let reply = codec.read_line()?;
    let echoed = match split_command(&reply) {
        ("ok", Some(echoed)) => echoed,
        ("error", text) => {
            return Err(Error::Handshake(format!(
                "responder rejected offer: {}",
                text.unwrap_or("")
            )))
        },
        _ => {
            return Err(Error::Handshake("malformed challenge reply".to_owned()))
        },
    };

    let expected = base64::encode(&nonce[..]);
    let decoded = base64::decode(echoed).unwrap_or_default();
    if expected.len() != echoed.len()
        || !openssl::memcmp::eq(expected.as_bytes(), echoed.as_bytes())
        || decoded.len() != NONCE_SIZE
        || !openssl::memcmp::eq(&decoded, &nonce[..])
    {
        return Err(Error::Handshake("challenge nonce mismatch".to_owned()));
    }

    Ok(())
}

/// Run the responder side of the handshake on `codec`, after having sent
/// `ok <identity>` in response to `startsecure`.
///
/// On success, `codec` is encrypted. On failure, it is left in plaintext mode
/// and the connection must be abandoned.
pub fn respond(
    codec: &mut Codec,
    own_key: &Rsa<Private>,
) -> Result<(), Error> {
    let result = respond_impl(codec, own_key);
    if let Err(ref e) = result {
        warn!("{} Secure handshake failed: {}", codec.log_prefix(), e);
        codec.clear_cipher();
    } else {
        codec.log_prefix().set_secure(true);
        info!("{} Secure session established", codec.log_prefix());
    }

    result
}

fn respond_impl(
    codec: &mut Codec,
    own_key: &Rsa<Private>,
) -> Result<(), Error> {
    let line = codec.read_line()?;
    let offer = base64::decode(&line)
        .map_err(|_| Error::Handshake("offer is not base64".to_owned()))?;
    let offer = rsa_decrypt(own_key, &offer)?;
    let offer = std::str::from_utf8(offer.unsecure())
        .map_err(|_| Error::Handshake("offer is not text".to_owned()))?;

    let mut tokens = offer.split(' ');
    let (nonce, key, iv) = match (
        tokens.next(),
        tokens.next(),
        tokens.next(),
        tokens.next(),
        tokens.next(),
    ) {
        (Some("ok"), Some(nonce), Some(key), Some(iv), None) => {
            (nonce, key, iv)
        },
        _ => return Err(Error::Handshake("malformed offer".to_owned())),
    };

    let nonce = SecVec::new(decode_secret(nonce)?);
    if nonce.unsecure().len() != NONCE_SIZE {
        return Err(Error::Handshake("bad nonce length".to_owned()));
    }
    let key = SecVec::new(decode_secret(key)?);
    let iv = SecVec::new(decode_secret(iv)?);
    codec.set_cipher(SessionCipher::from_parts(
        key.unsecure(),
        iv.unsecure(),
        Role::Responder,
    )?);

    codec.write_line(&format!("ok {}", base64::encode(nonce.unsecure())))?;

    let ack = codec.read_line()?;
    if "ok" != ack {
        return Err(Error::Handshake(
            "initiator did not acknowledge".to_owned(),
        ));
    }

    Ok(())
}

fn decode_secret(b64: &str) -> Result<Vec<u8>, Error> {
    base64::decode(b64)
        .map_err(|_| Error::Handshake("bad base64 in offer".to_owned()))
}
