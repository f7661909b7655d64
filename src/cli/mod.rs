//! Command-line interface definitions for the `autoproxy` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `autoproxy` binary.
#[derive(Debug, Parser)]
#[command(
    name = "autoproxy",
    about = "Provision and tear down single-host Shadowsocks proxies",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Choose a location, create an instance, and configure the proxy.
    #[command(name = "create", about = "Create and configure a new proxy")]
    Create,
    /// Delete a proxy and its boot disk.
    #[command(name = "delete", about = "Delete a proxy by name")]
    Delete(DeleteCommand),
    /// Print every recorded proxy and orphaned disk.
    #[command(name = "list", about = "List recorded proxies")]
    List,
    /// Retry deletion of disks left behind by earlier teardowns.
    #[command(name = "reclaim", about = "Retry deletion of orphaned disks")]
    Reclaim,
}

/// Arguments for the `autoproxy delete` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DeleteCommand {
    /// Name of the proxy to delete, as shown by `autoproxy list`.
    #[arg(long, short = 'n', value_name = "NAME")]
    pub(crate) name: String,
}
