mod app;
mod cli;
mod info;
mod logging;
mod persist;

use clap::Parser;

fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    app::run(cli)?;

    Ok(())
}
