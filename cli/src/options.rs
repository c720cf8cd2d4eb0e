//! Command-line parsing for the apprt CLI

use std::path::PathBuf;

use runtime_engine::domain::services::runtime_directory;

/// Pull the value following a flag out of the argument list, removing
/// both. Errors when the flag is present without a value.
pub fn take_flag(args: &mut Vec<String>, flag: &str) -> Result<Option<String>, String> {
    match args.iter().position(|a| a == flag) {
        Some(index) => {
            if index + 1 >= args.len() {
                return Err(format!("{flag} requires a value"));
            }
            args.remove(index);
            Ok(Some(args.remove(index)))
        }
        None => Ok(None),
    }
}

/// Remove a boolean switch from the argument list, reporting presence.
pub fn take_switch(args: &mut Vec<String>, flag: &str) -> bool {
    match args.iter().position(|a| a == flag) {
        Some(index) => {
            args.remove(index);
            true
        }
        None => false,
    }
}

macro_rules! parse_flag {
    ($args:expr, $flag:expr) => {
        crate::options::take_flag(&mut $args, $flag)?
    };
}

macro_rules! parse_switch {
    ($args:expr, $flag:expr) => {
        crate::options::take_switch(&mut $args, $flag)
    };
}

/// Options shared by every subcommand.
#[derive(Debug)]
pub struct CliOptions {
    /// Directory scanned for daemon sockets.
    pub runtime_dir: PathBuf,
    /// Daemon pid or entrypoint name selecting among multiple runtimes.
    pub selector: Option<String>,
    /// Emit raw JSON instead of tables.
    pub json: bool,
    pub command: String,
    /// Remaining arguments, handed to the subcommand.
    pub rest: Vec<String>,
}

impl CliOptions {
    pub fn parse(args: Vec<String>) -> Result<Option<CliOptions>, String> {
        let mut args = args;
        if parse_switch!(args, "--help") || parse_switch!(args, "-h") {
            return Ok(None);
        }
        let runtime_dir = parse_flag!(args, "--runtime-dir")
            .map(PathBuf::from)
            .unwrap_or_else(runtime_directory::runtime_dir);
        let selector = parse_flag!(args, "--runtime");
        let json = parse_switch!(args, "--json");

        if args.is_empty() {
            return Ok(None);
        }
        let command = args.remove(0);
        Ok(Some(CliOptions {
            runtime_dir,
            selector,
            json,
            command,
            rest: args,
        }))
    }
}
