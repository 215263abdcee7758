//-
// Copyright (c) 2020, 2022, Jason Lingle
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

use std::path::{Path, PathBuf};

use structopt::StructOpt;

use crate::mail::store::MessageId;
use crate::support::sysexits::*;
use crate::support::system_config::SystemConfig;
use crate::wire::keys::KeyStore;

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
struct Options {
    /// The configuration file. A `logging.toml` next to it, if present,
    /// configures logging.
    #[structopt(
        long,
        short,
        parse(from_os_str),
        default_value = "dmail.toml"
    )]
    config: PathBuf,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt)]
enum Command {
    /// Run the transfer server, which accepts mail from clients and relays it
    /// to the mailbox server of each recipient's domain.
    ///
    /// The server runs until standard input is closed.
    ServeTransfer,
    /// Run the mailbox server for one domain.
    ///
    /// This listens for inbound mail from transfer servers and for mailbox
    /// access by users. The server runs until standard input is closed.
    ServeMailbox,
    Send(SendSubcommand),
    /// List the messages in your mailbox.
    Inbox,
    /// Print one message from your mailbox.
    Show(MessageArg),
    /// Delete one message from your mailbox.
    Delete(MessageArg),
    /// Check the integrity tag of one message against the shared secret
    /// configured as `client.hmac_key`.
    Verify(MessageArg),
    /// Generate an RSA key pair in the key directory.
    ///
    /// The private key is written to `<identity>.pem` and the public key to
    /// `<identity>_pub.pem`. Existing keys are never overwritten.
    Keygen(KeygenSubcommand),
}

/// Send a message through the configured transfer server.
///
/// The message is signed if `client.hmac_key` is configured.
#[derive(StructOpt)]
pub(super) struct SendSubcommand {
    /// A recipient address. Can be passed multiple times.
    #[structopt(long, short, required = true, number_of_values(1))]
    pub(super) to: Vec<String>,
    #[structopt(long, short, default_value = "")]
    pub(super) subject: String,
    /// The body of the message, which must be a single line.
    #[structopt(long, short, default_value = "")]
    pub(super) data: String,
}

#[derive(StructOpt)]
pub(super) struct MessageArg {
    /// The message id, as shown by `inbox`.
    pub(super) id: MessageId,
}

#[derive(StructOpt)]
pub(super) struct KeygenSubcommand {
    /// The size of the RSA modulus.
    #[structopt(long, default_value = "2048")]
    pub(super) bits: u32,
    /// The identity to name the key pair after.
    pub(super) identity: String,
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let options = Options::from_clap(&match Options::clap().get_matches_safe()
    {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        },
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        },
    });

    let config = match SystemConfig::load(&options.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            EX_CONFIG.exit()
        },
    };

    init_log(&options.config);

    match options.command {
        Command::ServeTransfer => super::serve::transfer(&config),
        Command::ServeMailbox => super::serve::mailbox(&config),
        Command::Send(cmd) => super::client::send(&config, cmd),
        Command::Inbox => super::client::inbox(&config),
        Command::Show(cmd) => super::client::show(&config, cmd.id),
        Command::Delete(cmd) => super::client::delete(&config, cmd.id),
        Command::Verify(cmd) => super::client::verify(&config, cmd.id),
        Command::Keygen(cmd) => keygen(&config, cmd),
    }
}

fn init_log(config_path: &Path) {
    let log_config_file = config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("logging.toml");
    if !log_config_file.is_file() {
        crate::init_simple_log();
        return;
    }

    if let Err(e) = log4rs::init_file(
        &log_config_file,
        log4rs::config::Deserializers::default(),
    ) {
        eprintln!(
            "Failed to initialise logging from '{}': {}",
            log_config_file.display(),
            e
        );
        EX_CONFIG.exit();
    }
}

fn keygen(config: &SystemConfig, cmd: KeygenSubcommand) {
    let keys = KeyStore::new(&config.keys.directory);
    if let Err(e) = keys.generate(&cmd.identity, cmd.bits) {
        fatal!(EX_CONFIG, "Failed to generate key pair: {}", e);
    }

    println!(
        "Generated {}-bit key pair '{}' in {}",
        cmd.bits,
        cmd.identity,
        keys.root().display()
    );
}
