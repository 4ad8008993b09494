// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command-line interface definitions.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "citadel-imgtool")]
#[command(about = "Firmware image tool for citadel-boot")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Generate an Ed25519 signing key
    Genkey {
        /// Output file for the 32-byte signing seed
        #[arg(value_name = "KEYFILE")]
        out: PathBuf,
    },

    /// Build a signed (optionally encrypted) firmware image
    Create {
        /// Raw firmware binary
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output image file (header + payload)
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        /// Signing key seed file (from genkey)
        #[arg(short, long, value_name = "KEYFILE")]
        key: PathBuf,

        /// Anti-rollback version number
        #[arg(short, long, default_value = "1")]
        version: u32,

        /// Encrypt the payload with this 32-byte key file
        #[arg(short, long, value_name = "KEYFILE")]
        encrypt: Option<PathBuf>,
    },

    /// Print and check an image header
    Inspect {
        /// Image file to inspect
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        /// Verify the signature against this signing key seed file
        #[arg(short, long, value_name = "KEYFILE")]
        key: Option<PathBuf>,
    },
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Genkey { out } => commands::genkey(&out),
            Commands::Create {
                input,
                output,
                key,
                version,
                encrypt,
            } => commands::create(&input, &output, &key, version, encrypt.as_deref()),
            Commands::Inspect { image, key } => commands::inspect(&image, key.as_deref()),
        }
    }
}
