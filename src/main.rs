mod cli;
mod config;
mod game;
mod installer;
mod log;
mod opener;
mod pathcheck;
mod redeploy;
mod settings;

use anyhow::Result;

fn main() -> Result<()> {
    cli::run()
}
