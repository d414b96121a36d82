use clap::Parser as _;
use systemair_save_driver::commands;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

#[derive(clap::Parser)]
#[clap(version, about, author)]
enum Commands {
    Registers(commands::registers::Args),
    Watch(commands::watch::Args),
    Control(commands::control::Args),
}

fn end<E: std::error::Error>(r: Result<(), E>) {
    std::process::exit(match r {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            let mut cause = e.source();
            while let Some(e) = cause {
                eprintln!("  because: {e}");
                cause = e.source();
            }
            1
        }
    });
}

const LOG_VARIABLE: &str = "SYSTEMAIR_SAVE_DRIVER_LOG";

fn main() {
    let filter_description = std::env::var(LOG_VARIABLE).unwrap_or_else(|_| "info".into());
    let filter = filter_description
        .parse::<tracing_subscriber::filter::targets::Targets>()
        .unwrap_or_else(|e| {
            eprintln!("warning: ignoring {LOG_VARIABLE}: {e}");
            tracing_subscriber::filter::targets::Targets::new()
                .with_default(tracing::level_filters::LevelFilter::INFO)
        });
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
    match Commands::parse() {
        Commands::Registers(args) => end(commands::registers::run(args)),
        Commands::Watch(args) => end(commands::watch::run(args)),
        Commands::Control(args) => end(commands::control::run(args)),
    }
}
