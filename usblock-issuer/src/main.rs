//! usblock license issuer
//!
//! Usage:
//!   usblock-issue issue <private_key> <product> <usb_serial> <expiration> <output>
//!   usblock-issue keygen --private-out private_key.pem --public-out public_key.pem

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use usblock_issuer::{parse_expiration, run_issue, run_keygen, IssueRequest};

#[derive(Parser, Debug)]
#[command(name = "usblock-issue")]
#[command(about = "Issues device-bound USB licenses")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign a license for one USB device
    Issue {
        /// Private key (PKCS#8 PEM)
        private_key: PathBuf,
        /// Product name
        product: String,
        /// Serial number of the USB device
        usb_serial: String,
        /// Expiration, YYYY-MM-DD or YYYY-MM-DD hh:mm:ss (UTC)
        expiration: String,
        /// License file to write
        output: PathBuf,
    },
    /// Generate a new authority key pair
    Keygen {
        #[arg(long, default_value = "private_key.pem")]
        private_out: PathBuf,
        #[arg(long, default_value = "public_key.pem")]
        public_out: PathBuf,
        /// Overwrite existing key files
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    match args.command {
        Command::Issue {
            private_key,
            product,
            usb_serial,
            expiration,
            output,
        } => {
            let request = IssueRequest {
                private_key,
                product,
                device_serial: usb_serial,
                expires: parse_expiration(&expiration)?,
                output,
            };
            let record = run_issue(&request)?;
            info!("license generated: {}", request.output.display());
            info!("  product: {}", record.product);
            info!("  usb serial: {}", record.device_serial);
            info!("  expires: {}", record.expires);
        }
        Command::Keygen {
            private_out,
            public_out,
            force,
        } => {
            run_keygen(&private_out, &public_out, force)?;
            info!("keep {} secret; ship {} with the agent", private_out.display(), public_out.display());
        }
    }
    Ok(())
}
