//! stackplan CLI — declarative infrastructure stacks.

use clap::Parser;
use stackplan::cli::Cli;
use tracing_subscriber::EnvFilter;

/// Log to stderr so plans on stdout stay pipeable.
///
/// `RUST_LOG` wins over `-v`; without either only warnings are shown.
fn setup_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("stackplan={}", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    setup_tracing(cli.verbose);
    if let Err(e) = stackplan::cli::dispatch(cli.command) {
        eprintln!("error[{}]: {}", e.kind(), e);
        std::process::exit(1);
    }
}
