use clap::Parser;
use std::path::PathBuf;

/// argond: fan and power button daemon for Argon ONE cases
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML config file path (default: $ARGOND_CONFIG, then the XDG and /etc locations)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Detach from the terminal and run in the background
    #[arg(short = 'd', long = "daemonize", default_value = "false")]
    pub daemonize: bool,

    /// Log per-cycle temperatures and speeds
    #[arg(short = 'v', long = "verbose", default_value = "false")]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_foreground() {
        let cli = Cli::parse_from(["argond"]);
        assert!(cli.config.is_none());
        assert!(!cli.daemonize);
        assert!(!cli.verbose);
    }

    #[test]
    fn parses_all_flags() {
        let cli = Cli::parse_from(["argond", "-c", "/tmp/argond.yml", "--daemonize", "-v"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/argond.yml")));
        assert!(cli.daemonize);
        assert!(cli.verbose);
    }
}
