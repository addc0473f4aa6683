// CLI module for gencache
// Author: kelexine (https://github.com/kelexine)

use clap::Parser;
use std::path::PathBuf;

/// gencache - probation-aware response cache for LLM generation calls
#[derive(Parser, Debug)]
#[command(name = "gencache", version, about, long_about = None)]
pub struct Args {
    /// Config file to load instead of ~/.gencache/config.toml
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Load and validate the configuration, print it, then exit
    #[arg(long)]
    pub check_config: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let args = Args::parse_from(["gencache", "--config", "/tmp/x.toml", "--check-config"]);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/x.toml")));
        assert!(args.check_config);
    }

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["gencache"]);
        assert!(!args.check_config);
    }
}
