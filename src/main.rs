use clap::Parser;
use plug::{cli::Cli, server::Server};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level())
        .with_target(false)
        .init();

    let config = cli.into_config().map_err(|err| anyhow::anyhow!(err))?;
    let server = Server::bind(&config)?;
    server.run()
}
