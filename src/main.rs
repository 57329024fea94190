#![forbid(unsafe_code)]

//! btrfs-clone CLI entry point.

use clap::Parser;

mod cli_app;

fn main() {
    let args = cli_app::Cli::parse();
    if let Err(e) = cli_app::run(&args) {
        eprintln!("btrfs-clone: {e}");
        std::process::exit(1);
    }
}
