use super::{
    database::{RestrictionKind, RestrictionRecord, RestrictionStatus},
    error::UnverifyError,
    service::Imposition,
};
use crate::{
    platform::{Platform, SerenityPlatform},
    utils::{next_occurrence, parse_until},
    Context, Error,
};
use chrono::{DateTime, Local, NaiveTime, Utc};
use poise::{
    command,
    serenity_prelude::{self as serenity, ChannelId, GuildId, Mentionable, RoleId, UserId},
};
use tracing::info;

const MESSAGE_LIMIT: usize = 1900;

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum ListFilter {
    #[name = "waiting"]
    Waiting,
    #[name = "finished"]
    Finished,
    #[name = "member_left"]
    MemberLeft,
    #[name = "guild_not_found"]
    GuildNotFound,
    #[name = "all"]
    All,
}

impl ListFilter {
    fn status(self) -> Option<RestrictionStatus> {
        match self {
            Self::Waiting => Some(RestrictionStatus::Waiting),
            Self::Finished => Some(RestrictionStatus::Finished),
            Self::MemberLeft => Some(RestrictionStatus::MemberLeft),
            Self::GuildNotFound => Some(RestrictionStatus::GuildNotFound),
            Self::All => None,
        }
    }
}

fn timestamp(time: DateTime<Utc>) -> String {
    format!("<t:{}:f>", time.timestamp())
}

fn guild_id(ctx: &Context<'_>) -> Result<GuildId, Error> {
    Ok(ctx.guild_id().ok_or("This command only works in a server")?)
}

fn guild_name(ctx: &Context<'_>) -> String {
    ctx.guild()
        .map(|g| g.name.clone())
        .unwrap_or_else(|| "this server".to_string())
}

/// Everything except database failures is the user's mistake and gets a reply.
async fn refuse(ctx: Context<'_>, err: UnverifyError) -> Result<(), Error> {
    match err {
        UnverifyError::Db(e) => Err(e.into()),
        err => {
            ctx.say(format!("❌ {}", err)).await?;
            Ok(())
        }
    }
}

async fn parse_end(ctx: Context<'_>, until: &str) -> Result<Option<DateTime<Utc>>, Error> {
    match parse_until(until, &Local::now()) {
        Some(end) => Ok(Some(end)),
        None => {
            ctx.say(format!(
                "❌ I don't know how to parse `{}`, please try again.",
                until
            ))
            .await?;
            Ok(None)
        }
    }
}

async fn notify_revoked(
    platform: &dyn Platform,
    user_id: UserId,
    guild: &str,
    record: &RestrictionRecord,
    reason: Option<&str>,
) {
    let mut text = format!(
        "Your access to **{}** was temporarily revoked.\nYour access will be automatically returned on {}",
        guild,
        timestamp(record.end_time)
    );
    if let Some(reason) = reason {
        text.push_str(&format!("\nReason: {}", reason));
    }
    if let Err(e) = platform.direct_message(user_id, &text).await {
        info!(%user_id, "Couldn't send unverify info: {}", e);
    }
}

async fn restrict_self(
    ctx: Context<'_>,
    end_time: DateTime<Utc>,
    keep: Option<ChannelId>,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let author = ctx.author();
    let platform = SerenityPlatform::new(ctx.serenity_context());
    let kind = RestrictionKind::SelfUnverify;

    let request = Imposition {
        guild_id,
        user_id: author.id,
        end_time,
        reason: Some(kind.to_string()),
        kind,
        channels_to_keep: keep.into_iter().collect(),
    };
    let record = match ctx.data().unverifier.impose(&platform, request).await {
        Ok(record) => record,
        Err(e) => return refuse(ctx, e).await,
    };

    notify_revoked(&platform, author.id, &guild_name(&ctx), &record, None).await;
    ctx.say(format!(
        "🌙 Member {} was temporarily unverified. The access will be returned on: {}",
        author.name,
        timestamp(record.end_time)
    ))
    .await?;
    Ok(())
}

/// Set the role unverified members get
#[command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "MANAGE_ROLES"
)]
pub async fn set(
    ctx: Context<'_>,
    #[description = "Role that unverified members get"] role: serenity::Role,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;

    ctx.data()
        .unverifier
        .db()
        .set_guild_config(guild_id.get(), role.id.get())
        .await?;

    info!(%guild_id, role_id = %role.id, "Unverify role set to {}", role.name);
    ctx.say(format!("✅ Unverify role was set to {}.", role.mention()))
        .await?;
    Ok(())
}

/// Show the unverify configuration of this server
#[command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "MANAGE_ROLES"
)]
pub async fn config(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;

    match ctx.data().unverifier.db().guild_config(guild_id.get()).await {
        Some(config) => {
            let role = RoleId::new(config.unverify_role_id);
            ctx.say(format!("⚙️ Unverify role: {}", role.mention()))
                .await?;
        }
        None => {
            ctx.say("❌ Unverify is not configured on this server.")
                .await?;
        }
    }
    Ok(())
}

/// Temporarily take a member's access away
#[command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "MANAGE_ROLES"
)]
pub async fn user(
    ctx: Context<'_>,
    #[description = "Member to unverify"] member: serenity::Member,
    #[description = "Until when, e.g. 1h30m, 18:00 or 2024-05-01 12:00"] until: String,
    #[description = "Reason"]
    #[rest]
    reason: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let Some(end_time) = parse_end(ctx, &until).await? else {
        return Ok(());
    };
    let platform = SerenityPlatform::new(ctx.serenity_context());

    let request = Imposition {
        guild_id,
        user_id: member.user.id,
        end_time,
        reason: reason.clone(),
        kind: RestrictionKind::Unverify,
        channels_to_keep: Vec::new(),
    };
    let record = match ctx.data().unverifier.impose(&platform, request).await {
        Ok(record) => record,
        Err(e) => return refuse(ctx, e).await,
    };

    notify_revoked(
        &platform,
        member.user.id,
        &guild_name(&ctx),
        &record,
        record.reason.as_deref(),
    )
    .await;

    info!(
        %guild_id,
        user_id = %member.user.id,
        moderator = %ctx.author().id,
        "Member {} unverified until {}, reason: {:?}",
        member.user.name,
        record.end_time,
        reason
    );
    ctx.say(format!(
        "✅ Member {} was temporarily unverified. The access will be returned on: {}",
        member.user.name,
        timestamp(record.end_time)
    ))
    .await?;
    Ok(())
}

/// Return a member's access on the next reverify pass
#[command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "MANAGE_ROLES"
)]
pub async fn pardon(
    ctx: Context<'_>,
    #[description = "Member to pardon"] member: serenity::Member,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;

    if let Err(e) = ctx.data().unverifier.pardon(guild_id, member.user.id).await {
        return refuse(ctx, e).await;
    }

    ctx.say(format!(
        "✅ Unverify of {} ({}) was pardoned. Access will be returned next time the reverifier runs.",
        member.user.name, member.user.id
    ))
    .await?;
    Ok(())
}

fn describe(record: &RestrictionRecord) -> String {
    let mut text = format!(
        "**#{}** <@{}> | {} → {} | {} | {}",
        record.idx,
        record.user_id,
        timestamp(record.start_time),
        timestamp(record.end_time),
        record.status,
        record.kind
    );
    if !record.roles_to_return.is_empty() {
        let roles: Vec<_> = record
            .roles_to_return
            .iter()
            .map(|id| format!("<@&{}>", id))
            .collect();
        text.push_str(&format!("\n> Roles to return: {}", roles.join(", ")));
    }
    if !record.channels_to_return.is_empty() {
        let channels: Vec<_> = record
            .channels_to_return
            .iter()
            .map(|id| format!("<#{}>", id))
            .collect();
        text.push_str(&format!("\n> Channels to return: {}", channels.join(", ")));
    }
    if let Some(reason) = &record.reason {
        text.push_str(&format!("\n> Reason: {}", reason));
    }
    text
}

/// Splits entries into messages that fit the platform limit.
fn paginate(entries: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut pages = Vec::new();
    let mut page = String::new();
    for entry in entries {
        let entry = crate::utils::truncate_chars(&entry, MESSAGE_LIMIT);
        if !page.is_empty() && page.len() + entry.len() + 2 > MESSAGE_LIMIT {
            pages.push(std::mem::take(&mut page));
        }
        if !page.is_empty() {
            page.push_str("\n\n");
        }
        page.push_str(&entry);
    }
    if !page.is_empty() {
        pages.push(page);
    }
    pages
}

/// List unverify records of this server
#[command(
    slash_command,
    prefix_command,
    guild_only,
    ephemeral,
    required_permissions = "MANAGE_ROLES"
)]
pub async fn list(
    ctx: Context<'_>,
    #[description = "Which records to show (default: waiting)"] status: Option<ListFilter>,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let filter = status.unwrap_or(ListFilter::Waiting);

    let records = ctx
        .data()
        .unverifier
        .db()
        .list(guild_id.get(), filter.status())
        .await;

    if records.is_empty() {
        ctx.say("📝 No unverify records found.").await?;
        return Ok(());
    }

    for page in paginate(records.iter().map(describe)) {
        ctx.say(page).await?;
    }
    Ok(())
}

/// DANGER: forget a record without returning anything
#[command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "MANAGE_ROLES"
)]
pub async fn remove(
    ctx: Context<'_>,
    #[description = "Record number from the list"] idx: u64,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let db = ctx.data().unverifier.db();

    match db.get(idx).await {
        Some(record) if record.guild_id == guild_id.get() => {
            db.remove(idx).await?;
            info!(%guild_id, idx, user_id = record.user_id, "Unverify record removed");
            ctx.say(format!(
                "🗑️ Record #{} was removed. Nothing was returned to <@{}>.",
                idx, record.user_id
            ))
            .await?;
        }
        _ => {
            ctx.say(format!("❌ There is no record #{} on this server.", idx))
                .await?;
        }
    }
    Ok(())
}

/// Take your own access away for a while
#[command(slash_command, prefix_command, guild_only)]
pub async fn selfunverify(
    ctx: Context<'_>,
    #[description = "Until when, e.g. 2h, 22:00 or 2024-05-01 12:00"] until: String,
    #[description = "A channel you want to keep"] keep: Option<serenity::GuildChannel>,
) -> Result<(), Error> {
    let Some(end_time) = parse_end(ctx, &until).await? else {
        return Ok(());
    };
    restrict_self(ctx, end_time, keep.map(|c| c.id)).await
}

/// Goodnight! Selfunverify until six in the morning
#[command(slash_command, prefix_command, guild_only)]
pub async fn gn(ctx: Context<'_>) -> Result<(), Error> {
    let morning = NaiveTime::from_hms_opt(6, 0, 0).ok_or("Invalid wake-up time")?;
    let end_time = next_occurrence(&Local::now(), morning).ok_or("Could not resolve 06:00")?;
    restrict_self(ctx, end_time, None).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(idx: u64, reason: Option<&str>) -> RestrictionRecord {
        let now = Utc::now();
        RestrictionRecord {
            idx,
            guild_id: 1,
            user_id: 2,
            start_time: now,
            end_time: now + Duration::hours(1),
            last_checked: None,
            roles_to_return: vec![3, 4],
            channels_to_return: vec![5],
            channels_to_remove: vec![],
            reason: reason.map(str::to_string),
            status: RestrictionStatus::Waiting,
            kind: RestrictionKind::Unverify,
        }
    }

    #[test]
    fn describe_lists_what_will_be_returned() {
        let text = describe(&record(7, Some("spam")));
        assert!(text.starts_with("**#7** <@2>"));
        assert!(text.contains("<@&3>, <@&4>"));
        assert!(text.contains("<#5>"));
        assert!(text.contains("Reason: spam"));
        assert!(text.contains("waiting"));
    }

    #[test]
    fn pages_stay_under_the_limit() {
        let entries: Vec<String> = (0..200).map(|i| describe(&record(i, Some("x")))).collect();
        let pages = paginate(entries);

        assert!(pages.len() > 1);
        assert!(pages.iter().all(|p| p.len() <= MESSAGE_LIMIT));
        assert!(pages.concat().contains("**#199**"));
    }

    #[test]
    fn list_filter_maps_to_status() {
        assert_eq!(ListFilter::All.status(), None);
        assert_eq!(
            ListFilter::MemberLeft.status(),
            Some(RestrictionStatus::MemberLeft)
        );
    }
}
