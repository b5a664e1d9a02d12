//! Маршрутизация апдейтов: меню, визарды, помощь, меню оператора.
//!
//! Телеграм-типы сюда не попадают: `bot` превращает апдейт в [`Incoming`], а ответы уходят через
//! [`ChatTransport`](crate::transport::ChatTransport) из контекста.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::context::AppContext;
use crate::menu::{self, MenuCommand};
use crate::pager::ResultPager;
use crate::store::{AdSubmission, UserRecord};
use crate::subscription;
use crate::transport::{render, Keyboard, RenderedMessage};
use crate::utils::format_submission;
use crate::wizard::manager::LAST_MESSAGE_KEY;
use crate::wizard::{Action, ConversationState, FlowKind, Outcome, WizardManager, WizardSession};

pub const STAGE_KEY: &str = "stage";
pub const HELP_MESSAGE_KEY: &str = "help_message";

/// Где сейчас пользователь; хранится в сессии
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Menu,
    Wizard(FlowKind),
    Help,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sender {
    pub user_id: i64,
    pub chat_id: i64,
    pub nickname: Option<String>,
}

/// Апдейт без привязки к Telegram
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Command { message_id: i32, command: String },
    Callback { id: String, data: String, message_id: Option<i32> },
    Text { message_id: i32, text: String },
    Location { message_id: i32, lat: f64, lng: f64 },
    Photo { message_id: i32, file_id: String },
}

pub async fn handle_update(ctx: &AppContext, from: &Sender, incoming: Incoming) -> Result<()> {
    let user = ctx
        .users
        .touch_user(from.user_id, from.nickname.as_deref(), Utc::now())
        .await
        .context("Failed to register user")?;
    let stage = load_stage(ctx, from.user_id).await?;
    debug!("Update from {} at {:?}: {:?}", from.user_id, stage, incoming);

    match incoming {
        Incoming::Command { command, .. } => handle_command(ctx, from, &user, &command).await,
        Incoming::Callback { id, data, message_id } => {
            if let Err(e) = ctx.transport.answer_callback(&id, None).await {
                warn!("Failed to answer callback {}: {}", id, e);
            }
            if let Some(command) = MenuCommand::parse(&data) {
                return handle_menu(ctx, from, &user, command, message_id).await;
            }
            match stage {
                Stage::Wizard(kind) => run_wizard(ctx, from, &user, kind, Action::from_callback(&data), message_id).await,
                _ => {
                    debug!("Ignoring callback {:?} outside of wizard", data);
                    Ok(())
                }
            }
        }
        Incoming::Text { message_id, text } => {
            match stage {
                Stage::Wizard(kind) => run_wizard(ctx, from, &user, kind, Action::FreeText(text), None).await?,
                Stage::Help => {
                    ctx.sessions.save_session(from.user_id, HELP_MESSAGE_KEY, &text).await?;
                    let (text, keyboard) = menu::help_confirm(&text);
                    show(ctx, from, None, &text, keyboard).await?;
                }
                Stage::Menu => return Ok(()),
            }
            delete_user_message(ctx, from, message_id).await;
            Ok(())
        }
        Incoming::Location { message_id, lat, lng } => {
            if let Stage::Wizard(kind) = stage {
                run_wizard(ctx, from, &user, kind, Action::Location { lat, lng }, None).await?;
                delete_user_message(ctx, from, message_id).await;
            }
            Ok(())
        }
        Incoming::Photo { message_id, file_id } => {
            if let Stage::Wizard(kind) = stage {
                run_wizard(ctx, from, &user, kind, Action::Photo(file_id), None).await?;
                delete_user_message(ctx, from, message_id).await;
            }
            Ok(())
        }
    }
}

fn is_admin(ctx: &AppContext, user: &UserRecord) -> bool {
    user.is_admin || ctx.config.admin_ids.contains(&user.id)
}

async fn handle_command(ctx: &AppContext, from: &Sender, user: &UserRecord, command: &str) -> Result<()> {
    let command = command.split_whitespace().next().unwrap_or("");
    let command = command.split('@').next().unwrap_or(command);
    match command {
        "/start" | "/menu" => {
            info!("User {} opened main menu", from.user_id);
            save_stage(ctx, from.user_id, Stage::Menu).await?;
            // Новое сообщение внизу чата, старое не трогаем
            save_last(ctx, from.user_id, &None).await?;
            show(ctx, from, None, menu::WELCOME_TEXT, menu::main_menu(is_admin(ctx, user))).await
        }
        "/help" => {
            save_stage(ctx, from.user_id, Stage::Help).await?;
            save_last(ctx, from.user_id, &None).await?;
            let (text, keyboard) = menu::help_prompt();
            show(ctx, from, None, &text, keyboard).await
        }
        _ => Ok(()),
    }
}

async fn handle_menu(
    ctx: &AppContext,
    from: &Sender,
    user: &UserRecord,
    command: MenuCommand,
    anchor: Option<i32>,
) -> Result<()> {
    if command.is_admin_only() && !is_admin(ctx, user) {
        warn!("User {} tried admin command {:?}", from.user_id, command);
        return Ok(());
    }

    match command {
        MenuCommand::MainMenu => {
            save_stage(ctx, from.user_id, Stage::Menu).await?;
            show(ctx, from, anchor, menu::WELCOME_TEXT, menu::main_menu(is_admin(ctx, user))).await
        }
        MenuCommand::Search(kind) => start_wizard(ctx, from, kind, false, anchor).await,
        MenuCommand::SubscribeSearch(kind) => start_wizard(ctx, from, kind, true, anchor).await,
        MenuCommand::SubmitAd => start_wizard(ctx, from, FlowKind::AdSubmission, false, anchor).await,
        MenuCommand::SubscriptionMenu => {
            save_stage(ctx, from.user_id, Stage::Menu).await?;
            let (text, keyboard) = menu::subscription_menu(user);
            show(ctx, from, anchor, &text, keyboard).await
        }
        MenuCommand::CancelSubscription => {
            subscription::cancel(ctx.users.as_ref(), from.user_id).await?;
            let mut user = user.clone();
            user.subscription = None;
            let (text, keyboard) = menu::subscription_menu(&user);
            show(ctx, from, anchor, &text, keyboard).await
        }
        MenuCommand::Help => {
            save_stage(ctx, from.user_id, Stage::Help).await?;
            let (text, keyboard) = menu::help_prompt();
            show(ctx, from, anchor, &text, keyboard).await
        }
        MenuCommand::SubmitHelp => {
            let message = ctx.sessions.load_session(from.user_id, HELP_MESSAGE_KEY).await?;
            let Some(message) = message else {
                let (text, keyboard) = menu::help_prompt();
                return show(ctx, from, anchor, &text, keyboard).await;
            };
            let request = menu::help_request_text(from.user_id, from.nickname.as_deref(), &message);
            ctx.notifier.notify_admins(&request).await;
            ctx.sessions.remove_session(from.user_id, HELP_MESSAGE_KEY).await?;
            save_stage(ctx, from.user_id, Stage::Menu).await?;
            info!("Help request from {} sent to admins", from.user_id);
            show(ctx, from, anchor, menu::HELP_SENT_TEXT, menu::main_menu(is_admin(ctx, user))).await
        }
        MenuCommand::AdminMenu => {
            let (text, keyboard) = menu::admin_menu(user, None);
            show(ctx, from, anchor, &text, keyboard).await
        }
        MenuCommand::TotalUsers | MenuCommand::RecentHourUsers | MenuCommand::TotalSubscribedUsers => {
            let stats = ctx.users.user_stats(Utc::now() - Duration::hours(1)).await?;
            let (text, keyboard) = menu::admin_menu(user, menu::admin_stat_text(command, &stats));
            show(ctx, from, anchor, &text, keyboard).await
        }
        MenuCommand::Refresh => {
            let report = subscription::notify_subscribers(ctx).await?;
            let text = format!(
                "Розсилку завершено.\nПідписників: {}\nОтримали оголошення: {}\nЗаблокували бота: {}\nБиті посилання: {}",
                report.subscribers, report.notified, report.blocked, report.stale_listings
            );
            let (text, keyboard) = menu::admin_menu(user, Some(text));
            show(ctx, from, anchor, &text, keyboard).await
        }
    }
}

async fn start_wizard(
    ctx: &AppContext,
    from: &Sender,
    kind: FlowKind,
    subscription_mode: bool,
    anchor: Option<i32>,
) -> Result<()> {
    let flow = kind.flow();
    let mut session = WizardSession {
        state: ConversationState::new(subscription_mode),
        last_message: load_last(ctx, from.user_id).await?,
    };
    let manager = WizardManager::new(&flow, ctx.listings.as_ref(), ctx.rates.as_ref(), ctx.transport.as_ref());
    manager.start(from.chat_id, &mut session, anchor).await?;
    session.save(ctx.sessions.as_ref(), from.user_id, kind).await?;
    save_stage(ctx, from.user_id, Stage::Wizard(kind)).await?;
    info!("User {} started {:?} (subscription: {})", from.user_id, kind, subscription_mode);
    Ok(())
}

async fn run_wizard(
    ctx: &AppContext,
    from: &Sender,
    user: &UserRecord,
    kind: FlowKind,
    action: Action,
    anchor: Option<i32>,
) -> Result<()> {
    let flow = kind.flow();
    let mut session = WizardSession::load(ctx.sessions.as_ref(), from.user_id, kind).await?;
    let manager = WizardManager::new(&flow, ctx.listings.as_ref(), ctx.rates.as_ref(), ctx.transport.as_ref());
    let outcome = manager.handle(from.chat_id, &mut session, action, anchor).await?;

    match outcome {
        Outcome::Rendered | Outcome::Ignored => {}
        Outcome::ShowResults { predicate, offset } => {
            let pager = ResultPager::new(
                ctx.listings.as_ref(),
                ctx.users.as_ref(),
                ctx.transport.as_ref(),
                &ctx.forwarder,
                &ctx.notifier,
            );
            pager
                .show(from.chat_id, &predicate, offset, &mut session.last_message, anchor)
                .await?;
        }
        Outcome::Subscribed(subscription) => {
            subscription::record(ctx.users.as_ref(), from.user_id, &subscription, Utc::now()).await?;
            let text = format!("{}\n\n{}", menu::SUBSCRIBED_TEXT, subscription.summary);
            render(
                ctx.transport.as_ref(),
                from.chat_id,
                &mut session.last_message,
                anchor,
                &text,
                menu::main_menu(is_admin(ctx, user)),
            )
            .await?;
            save_stage(ctx, from.user_id, Stage::Menu).await?;
        }
        Outcome::Submitted { answers, photos } => {
            let submission = AdSubmission {
                user_id: from.user_id,
                answers,
                photos,
                created_at: Utc::now(),
            };
            ctx.submissions
                .save_submission(&submission)
                .await
                .context("Failed to save ad submission")?;
            ctx.notifier
                .notify_admins(&format_submission(&submission, from.nickname.as_deref()))
                .await;
            ctx.notifier.send_photos_to_admins(&submission.photos).await;
            render(
                ctx.transport.as_ref(),
                from.chat_id,
                &mut session.last_message,
                anchor,
                menu::AD_SAVED_TEXT,
                menu::home_only(),
            )
            .await?;
            save_stage(ctx, from.user_id, Stage::Menu).await?;
        }
        Outcome::Exit => {
            render(
                ctx.transport.as_ref(),
                from.chat_id,
                &mut session.last_message,
                anchor,
                menu::WELCOME_TEXT,
                menu::main_menu(is_admin(ctx, user)),
            )
            .await?;
            save_stage(ctx, from.user_id, Stage::Menu).await?;
        }
    }

    session.save(ctx.sessions.as_ref(), from.user_id, kind).await
}

/// Рисует экран меню в сообщении под кнопкой или в последнем сообщении бота
async fn show(ctx: &AppContext, from: &Sender, anchor: Option<i32>, text: &str, keyboard: Keyboard) -> Result<()> {
    let mut last = load_last(ctx, from.user_id).await?;
    render(ctx.transport.as_ref(), from.chat_id, &mut last, anchor, text, keyboard).await?;
    save_last(ctx, from.user_id, &last).await
}

async fn delete_user_message(ctx: &AppContext, from: &Sender, message_id: i32) {
    if let Err(e) = ctx.transport.delete_message(from.chat_id, message_id).await {
        debug!("Failed to delete message {} from {}: {}", message_id, from.user_id, e);
    }
}

pub async fn load_stage(ctx: &AppContext, user_id: i64) -> Result<Stage> {
    let raw = ctx.sessions.load_session(user_id, STAGE_KEY).await?;
    Ok(raw
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default())
}

async fn save_stage(ctx: &AppContext, user_id: i64, stage: Stage) -> Result<()> {
    let raw = serde_json::to_string(&stage)?;
    ctx.sessions.save_session(user_id, STAGE_KEY, &raw).await?;
    Ok(())
}

async fn load_last(ctx: &AppContext, user_id: i64) -> Result<Option<RenderedMessage>> {
    let raw = ctx.sessions.load_session(user_id, LAST_MESSAGE_KEY).await?;
    Ok(raw.and_then(|raw| serde_json::from_str(&raw).ok()))
}

async fn save_last(ctx: &AppContext, user_id: i64, last: &Option<RenderedMessage>) -> Result<()> {
    match last {
        Some(message) => {
            let raw = serde_json::to_string(message)?;
            ctx.sessions.save_session(user_id, LAST_MESSAGE_KEY, &raw).await?;
        }
        None => ctx.sessions.remove_session(user_id, LAST_MESSAGE_KEY).await?,
    }
    Ok(())
}
