use clap::Subcommand;

mod fetch;
mod probe;

#[derive(Subcommand, Debug, Clone)]
pub enum SegprobeCommand {
    /// Detect the container of a remote resource with a few ranged requests
    Probe(probe::ProbeCommand),
    /// Load one segment, decrypting it when a key is given
    Fetch(fetch::FetchCommand),
}

impl SegprobeCommand {
    pub async fn run(self) -> anyhow::Result<()> {
        match self {
            Self::Probe(command) => command.run().await,
            Self::Fetch(command) => command.run().await,
        }
    }
}
