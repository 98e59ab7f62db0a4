//! Binary entry point: parse arguments, run the CLI dispatcher, and map
//! any surfaced [`pandora::error::PandoraError`] to the exit-code
//! convention in `spec.md` §7.

use clap::Parser;

use pandora::cli::{self, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = cli::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(err.exit_code());
    }
}
