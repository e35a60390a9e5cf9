use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;

use crate::sender::CHUNK_SIZE;

/// Serve files from a directory, streamed in fixed-size chunks.
#[derive(Debug, Parser)]
#[command(name = "plug", version, about)]
pub struct Cli {
    /// Directory to serve files from.
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:3456")]
    pub addr: SocketAddr,

    /// Socket read/write timeout in seconds, 0 disables it.
    #[arg(long = "io-timeout", default_value_t = 30)]
    pub io_timeout_secs: u64,

    /// Bytes per read/write cycle.
    #[arg(long, default_value_t = CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Validated server settings.
#[derive(Clone, Debug)]
pub struct Config {
    pub root: PathBuf,
    pub addr: SocketAddr,
    pub io_timeout: Option<Duration>,
    pub chunk_size: usize,
}

impl Cli {
    pub fn log_level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }

    pub fn into_config(self) -> Result<Config, String> {
        if self.chunk_size == 0 {
            return Err("--chunk-size must be at least 1".to_owned());
        }
        if !self.root.is_dir() {
            return Err(format!(
                "--root {} is not a directory",
                self.root.display()
            ));
        }
        let io_timeout = match self.io_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        Ok(Config {
            root: self.root,
            addr: self.addr,
            io_timeout,
            chunk_size: self.chunk_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["plug"]).unwrap();
        assert_eq!(cli.log_level(), tracing::Level::WARN);

        let config = cli.into_config().unwrap();
        assert_eq!(config.root, PathBuf::from("."));
        assert_eq!(config.addr, "127.0.0.1:3456".parse::<SocketAddr>().unwrap());
        assert_eq!(config.io_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.chunk_size, 4096);
    }

    #[test]
    fn zero_timeout_disables_it() {
        let cli = Cli::try_parse_from(["plug", "--io-timeout", "0", "-vv"]).unwrap();
        assert_eq!(cli.log_level(), tracing::Level::DEBUG);
        assert_eq!(cli.into_config().unwrap().io_timeout, None);
    }

    #[test]
    fn zero_chunk_size_fails() {
        let cli = Cli::try_parse_from(["plug", "--chunk-size", "0"]).unwrap();
        let result = cli.into_config();
        assert!(result.unwrap_err().contains("--chunk-size"));
    }

    #[test]
    fn missing_root_fails() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let missing = dir.path().join("nope");
        let cli = Cli::try_parse_from(["plug", "--root", missing.to_str().unwrap()]).unwrap();
        assert!(cli.into_config().unwrap_err().contains("is not a directory"));
        Ok(())
    }

    #[test]
    fn bad_addr_is_rejected_by_parser() {
        assert!(Cli::try_parse_from(["plug", "--addr", "not-an-addr"]).is_err());
    }
}
