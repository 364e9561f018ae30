pub mod commands;
pub mod database;
pub mod error;
pub mod service;
pub mod task;

use commands::*;
use poise::command;

/// 🐛 Pest control: temporarily take a member's access away
#[command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "MANAGE_ROLES",
    subcommands("set", "config", "user", "pardon", "list", "remove")
)]
pub async fn unverify(_ctx: crate::Context<'_>) -> Result<(), crate::Error> {
    Ok(())
}
