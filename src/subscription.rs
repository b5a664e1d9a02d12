//! Подписки: сохранение фильтра, поиск новых объявлений, рассылка подписчикам.

use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::context::AppContext;
use crate::error::TransportError;
use crate::forwarder::ForwardError;
use crate::notifications::Notifier;
use crate::store::{Listing, ListingStore, Subscription, UserRecord, UserStore};

/// Сколько новых объявлений уходит подписчику за один цикл
pub const DELTA_LIMIT: usize = 3;

pub const NEW_LISTINGS_TEXT: &str = "📩 Нові оголошення за вашими критеріями:";

/// Сохраняет подписку; новые объявления отсчитываются от `now`
pub async fn record(users: &dyn UserStore, user_id: i64, subscription: &Subscription, now: DateTime<Utc>) -> Result<()> {
    users
        .set_subscription(user_id, Some(subscription), Some(now))
        .await
        .context("Failed to save subscription")?;
    info!("User {} subscribed: {:?}", user_id, subscription.predicate);
    Ok(())
}

pub async fn cancel(users: &dyn UserStore, user_id: i64) -> Result<()> {
    users
        .set_subscription(user_id, None, None)
        .await
        .context("Failed to cancel subscription")?;
    info!("User {} cancelled subscription", user_id);
    Ok(())
}

/// Свежие объявления под фильтром пользователя, появившиеся после последнего просмотра
pub async fn new_matches(store: &dyn ListingStore, user: &UserRecord) -> Result<Vec<Listing>> {
    let Some(subscription) = &user.subscription else {
        return Ok(Vec::new());
    };
    let after = user.last_viewed_at.unwrap_or(user.last_active_at);
    let listings = store
        .fetch_created_after(&subscription.predicate, after, DELTA_LIMIT)
        .await
        .context("Failed to fetch new listings")?;
    Ok(listings)
}

/// Итог одного цикла рассылки
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub subscribers: usize,
    pub notified: usize,
    pub listings_sent: usize,
    pub blocked: usize,
    pub stale_listings: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserDelivery {
    /// `stale` объявлений оказались удалены из канала и пропущены
    Sent { count: usize, stale: usize },
    Blocked,
}

/// Пользователь заблокировал бота: подписка снимается, операторы получают уведомление
pub async fn drop_blocked_user(users: &dyn UserStore, notifier: &Notifier, user_id: i64) -> Result<()> {
    warn!("User {} blocked the bot, dropping subscription", user_id);
    let user = users.get_user(user_id).await.context("Failed to load blocked user")?;
    if user.is_some() {
        cancel(users, user_id).await?;
    }
    let nick = user
        .and_then(|u| u.nickname)
        .map(|n| format!(" @{}", n))
        .unwrap_or_default();
    notifier
        .notify_admins(&format!("Користувач {}{} заблокував бота, підписку скасовано", user_id, nick))
        .await;
    Ok(())
}

/// Отправляет пользователю новые объявления по подписке.
///
/// Удалённый пост убирает объявление из базы, и выборка повторяется без уже отправленных,
/// так что следующее по свежести объявление занимает его место. Отметка просмотра
/// сдвигается после доставки, поэтому в следующем цикле отправленное не повторится.
pub async fn deliver_updates(ctx: &AppContext, user: &UserRecord, now: DateTime<Utc>) -> Result<UserDelivery> {
    let mut listings = new_matches(ctx.listings.as_ref(), user).await?;
    if listings.is_empty() {
        return Ok(UserDelivery::Sent { count: 0, stale: 0 });
    }

    match ctx.transport.send_message(user.id, NEW_LISTINGS_TEXT, None).await {
        Ok(_) => {}
        Err(TransportError::Blocked) => {
            drop_blocked_user(ctx.users.as_ref(), &ctx.notifier, user.id).await?;
            return Ok(UserDelivery::Blocked);
        }
        Err(e) => return Err(ForwardError::Transport(e).into()),
    }

    let mut sent = HashSet::new();
    let mut stale = 0;
    loop {
        match ctx.forwarder.forward_listings(user.id, &listings, &mut sent).await {
            Ok(_) => break,
            Err(ForwardError::Blocked(_)) => {
                drop_blocked_user(ctx.users.as_ref(), &ctx.notifier, user.id).await?;
                return Ok(UserDelivery::Blocked);
            }
            Err(ForwardError::MessageNotFound { id, link }) => {
                warn!("Listing {} points to a deleted message {}, removing it", id, link);
                ctx.listings.remove_listing(id).await?;
                ctx.notifier.notify_admins(&format!("Something wrong with: {}", link)).await;
                stale += 1;
                listings = new_matches(ctx.listings.as_ref(), user).await?;
            }
            Err(e) => return Err(e.into()),
        }
    }

    ctx.users.set_last_viewed(user.id, now).await?;
    Ok(UserDelivery::Sent {
        count: sent.len(),
        stale,
    })
}

/// Один цикл рассылки по всем подписчикам. Ошибка для одного пользователя не прерывает цикл.
pub async fn notify_subscribers(ctx: &AppContext) -> Result<BroadcastReport> {
    let users = ctx
        .users
        .subscribed_users()
        .await
        .context("Failed to load subscribers")?;
    let mut report = BroadcastReport {
        subscribers: users.len(),
        ..BroadcastReport::default()
    };

    for user in &users {
        match deliver_updates(ctx, user, Utc::now()).await {
            Ok(UserDelivery::Sent { count, stale }) => {
                if count > 0 {
                    report.notified += 1;
                }
                report.listings_sent += count;
                report.stale_listings += stale;
            }
            Ok(UserDelivery::Blocked) => report.blocked += 1,
            Err(e) => error!("Failed to deliver updates to user {}: {:#}", user.id, e),
        }
    }

    info!("Broadcast finished: {:?}", report);
    Ok(report)
}
