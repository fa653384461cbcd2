mod backends;
mod config;
mod contents_store;
mod data_store;
mod desktop;
mod engine;
mod extractor;
mod hints;
mod icons;
mod model;
mod result;
mod utils;

use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::engine::Engine;

#[derive(Debug, Subcommand)]
enum Subcommands {
    /// Process new metadata for a suite.
    Run {
        suite: String,
        section: Option<String>,
        /// Rescan even when the repository index is unchanged.
        #[clap(long)]
        force: bool,
    },
    /// Re-export a suite from cached data without extracting anything.
    Publish {
        suite: String,
        section: Option<String>,
    },
    /// Drop metadata and media no mutable suite references anymore.
    Cleanup,
    /// Extract standalone package files, bypassing the caches.
    ProcessFile {
        suite: String,
        section: String,
        #[clap(required = true)]
        files: Vec<Utf8PathBuf>,
    },
    /// Forget every package that the backend currently lists for a suite.
    RemoveFound { suite: String },
    /// Drop one package (pkid `name/version/arch`) or every version of a
    /// package name from the caches.
    Forget { identifier: String },
    /// Show what the caches know about a package.
    Info { pkid: String },
}

#[derive(Debug, Parser)]
#[command(version, about = "AppStream catalog generator", long_about = None)]
#[command(propagate_version = true)]
struct CliArgs {
    /// Path to the generator configuration file.
    #[clap(short = 'c', long, default_value = "asgen-config.json")]
    config: Utf8PathBuf,

    /// Be chatty.
    #[clap(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    subcommand: Subcommands,
}

fn main() -> Result<(), anyhow::Error> {
    let args = CliArgs::parse();
    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_target(false)
        .init();

    let config = Arc::new(Config::load(&args.config)?);
    let mut engine = Engine::new(config)?;

    match args.subcommand {
        Subcommands::Run {
            suite,
            section,
            force,
        } => {
            engine.set_forced(force);
            engine.run(&suite, section.as_deref())?;
        }
        Subcommands::Publish { suite, section } => {
            engine.publish(&suite, section.as_deref())?;
        }
        Subcommands::Cleanup => {
            engine.run_cleanup()?;
        }
        Subcommands::ProcessFile {
            suite,
            section,
            files,
        } => {
            engine.process_file(&suite, &section, &files)?;
        }
        Subcommands::RemoveFound { suite } => {
            engine.remove_found(&suite)?;
        }
        Subcommands::Forget { identifier } => {
            engine.forget(&identifier)?;
        }
        Subcommands::Info { pkid } => {
            engine.info(&pkid)?;
        }
    }
    Ok(())
}
