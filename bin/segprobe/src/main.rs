use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug, Clone)]
#[clap(version, about)]
struct SegprobeArgs {
    #[clap(subcommand)]
    command: commands::SegprobeCommand,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = SegprobeArgs::parse();
    args.command.run().await
}
