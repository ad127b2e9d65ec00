use clap::Parser;
use mayrpc::cli::{run_cli, Cli};

fn main() -> anyhow::Result<()> {
    run_cli(Cli::parse())
}
