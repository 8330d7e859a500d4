//! Capforge CLI — typed capability catalog, provider planning, validated execution.

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "capforge",
    version,
    about = "Capability and action runner — typed contracts, provider planning, validated execution"
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: capforge::cli::Commands,
}

/// Filter used when `RUST_LOG` is unset or invalid.
fn fallback_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "capforge=debug",
        _ => "capforge=trace",
    }
}

fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback_directive(verbose)))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if let Err(e) = capforge::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cf018_verbosity_directives_parse() {
        assert_eq!(fallback_directive(0), "warn");
        assert_eq!(fallback_directive(1), "capforge=debug");
        assert_eq!(fallback_directive(5), "capforge=trace");
        for verbose in 0..3 {
            assert!(EnvFilter::try_new(fallback_directive(verbose)).is_ok());
        }
    }

    #[test]
    fn test_cf018_cli_parses_verbosity() {
        let cli = Cli::try_parse_from(["capforge", "-vv", "history"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }
}
