//! ova-import - import OVA virtual appliances into Proxmox VE

use clap::Parser;
use color_eyre::{Report, Result};

mod archive;
mod command_run;
mod common_opts;
mod hardware;
mod import;
mod ovf;
mod plan;
mod qemu_img;
mod qm;
mod rescue;
mod utils;

/// Install and configure the tracing/logging system.
///
/// Logs go to stderr, filtered by the RUST_LOG environment variable and
/// defaulting to 'info'; stdout is left for the command plan and summary.
fn install_tracing() {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let format = fmt::format().without_time().with_target(false).compact();

    let fmt_layer = fmt::layer()
        .event_format(format)
        .with_writer(std::io::stderr);
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .init();
}

fn main() -> Result<(), Report> {
    install_tracing();
    color_eyre::install()?;

    let opts = import::ImportOpts::parse();
    import::run(opts)?;
    tracing::debug!("exiting");
    Ok(())
}
