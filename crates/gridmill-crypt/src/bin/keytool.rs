//! keytool: keypair generation, signing, and verification from the shell
//!
//! ```bash
//! keytool genkey 1024 private_key public_key
//! keytool sign payload.bin private_key > payload.sig
//! keytool verify payload.bin payload.sig public_key
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use gridmill_crypt::codec::decode_hex_block;
use gridmill_crypt::sign::{sign_file, verify_file, MAX_SIGNATURE_LEN};
use gridmill_crypt::{bridge, codec, FixedPrivateKey, FixedPublicKey};

#[derive(Parser, Debug)]
#[command(name = "keytool")]
#[command(about = "Generate, sign with, and verify gridmill key files")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a keypair and write both key files
    Genkey {
        /// Modulus size in bits
        bits: usize,
        private_path: PathBuf,
        public_path: PathBuf,
    },
    /// Sign a file; the hex signature goes to stdout
    Sign {
        file: PathBuf,
        private_key: PathBuf,
    },
    /// Verify a file against a hex signature file
    Verify {
        file: PathBuf,
        signature: PathBuf,
        public_key: PathBuf,
    },
    /// Round-trip self-test of an existing keypair
    TestCrypt {
        private_key: PathBuf,
        public_key: PathBuf,
    },
}

fn run(args: Args) -> anyhow::Result<bool> {
    match args.command {
        Command::Genkey {
            bits,
            private_path,
            public_path,
        } => {
            let (private, public) = bridge::generate_keypair(bits)?;
            private.write_file(&private_path)?;
            public.write_file(&public_path)?;
            println!("wrote {} and {}", private_path.display(), public_path.display());
            Ok(true)
        }
        Command::Sign { file, private_key } => {
            let key = FixedPrivateKey::read_file(&private_key)?;
            let signature = sign_file(&key, &file)?;
            print!("{}", codec::encode_hex_block(&signature));
            Ok(true)
        }
        Command::Verify {
            file,
            signature,
            public_key,
        } => {
            let key = FixedPublicKey::read_file(&public_key)?;
            let sig_text = std::fs::read_to_string(&signature)?;
            let signature = decode_hex_block(&sig_text, MAX_SIGNATURE_LEN)?;
            let ok = verify_file(&key, &file, &signature)?;
            println!("{}", if ok { "signature valid" } else { "signature INVALID" });
            Ok(ok)
        }
        Command::TestCrypt {
            private_key,
            public_key,
        } => {
            let private = FixedPrivateKey::read_file(&private_key)?;
            let public = FixedPublicKey::read_file(&public_key)?;
            let probe = b"gridmill keytool self-test";
            let signature = gridmill_crypt::sign::sign_block(&private, probe)?;
            let ok = gridmill_crypt::sign::verify_block(&public, probe, &signature)?;
            println!("{}", if ok { "keypair ok" } else { "keypair MISMATCH" });
            Ok(ok)
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run(Args::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
