use std::process::ExitCode;

use clap::Parser;
use console::style;
use tracing::error;

use crate::program::{Cli, Program};

mod archive;
mod program;

#[tokio::main]
async fn main() -> ExitCode {
    // Usage errors exit with status 2 from inside clap.
    let cli = Cli::parse();

    match Program::new(cli).run().await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("{} {:#}", style("error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
