pub mod commands;
pub mod database;
pub mod error;
pub mod handler;
pub mod service;
pub mod task;

use commands::*;
use poise::command;

/// 🔊 Dynamic voice channel settings
#[command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "MANAGE_CHANNELS",
    subcommands("category", "bitrate", "disable", "list")
)]
pub async fn voice(_ctx: crate::Context<'_>) -> Result<(), crate::Error> {
    Ok(())
}
