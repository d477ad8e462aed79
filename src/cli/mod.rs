//! Command-line interface definitions for the `ephemera` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `ephemera` binary.
#[derive(Debug, Parser)]
#[command(
    name = "ephemera",
    about = "Provision ephemeral remote engines from driver URLs",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Resolve a driver URL and print the request without contacting the API.
    #[command(name = "plan", about = "Resolve a driver URL without contacting the API")]
    Plan(UrlCommand),
    /// Provision (or reuse) an instance and print its identifier.
    #[command(name = "up", about = "Provision or reuse an instance and print its id")]
    Up(UrlCommand),
    /// Destroy an instance by identifier.
    #[command(name = "down", about = "Destroy an instance")]
    Down(DownCommand),
}

/// Arguments shared by subcommands that take a driver URL.
#[derive(Debug, Parser)]
pub(crate) struct UrlCommand {
    /// Driver URL, for example `namespace:///build1?shape=4x8&ttl=30m`.
    #[arg(value_name = "URL")]
    pub(crate) url: String,
}

/// Arguments for the `ephemera down` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DownCommand {
    /// Identifier printed by `ephemera up`.
    #[arg(value_name = "INSTANCE_ID")]
    pub(crate) instance_id: String,
}
