pub mod membership;

use crate::{Data, Error};
use poise::serenity_prelude as serenity;

/// Routes each raw event kind to its listener.
pub fn handler<'a>(
    ctx: &'a serenity::Context,
    event: &'a serenity::FullEvent,
    data: &'a Data,
) -> poise::BoxFuture<'a, Result<(), Error>> {
    Box::pin(async move {
        match event {
            serenity::FullEvent::GuildMemberUpdate {
                old_if_available,
                new,
                event,
                ..
            } => {
                membership::handle_member_update(
                    ctx,
                    old_if_available.as_ref(),
                    new.as_ref(),
                    event,
                    data,
                )
                .await;
            }
            serenity::FullEvent::UserUpdate { old_data, new, .. } => {
                membership::handle_user_update(ctx, old_data.as_ref(), new, data).await;
            }
            _ => {}
        }
        Ok(())
    })
}
