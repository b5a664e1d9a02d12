use crate::context::AppContext;
use crate::handlers::{self, Incoming, Sender};
use crate::utils::format_error;
use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, Message};
use tracing::{error, info};

pub async fn start_bot(bot: Bot, ctx: Arc<AppContext>) -> Result<()> {
    info!("Bot is starting...");

    let ctx_clone1 = ctx.clone();
    let ctx_clone2 = ctx.clone();
    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .filter(|msg: Message| msg.chat.is_private())
                .endpoint(move |msg: Message| {
                    let ctx = ctx_clone1.clone();
                    async move { handle_message(msg, ctx).await }
                }),
        )
        .branch(
            Update::filter_callback_query().endpoint(move |q: CallbackQuery| {
                let ctx = ctx_clone2.clone();
                async move { handle_callback(q, ctx).await }
            }),
        );

    Dispatcher::builder(bot, handler)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_message(msg: Message, ctx: Arc<AppContext>) -> ResponseResult<()> {
    let Some((sender, incoming)) = incoming_from_message(&msg) else {
        return Ok(());
    };
    // Ошибка одного апдейта не должна ронять диспетчер
    if let Err(e) = handlers::handle_update(&ctx, &sender, incoming).await {
        error!("Failed to handle message from {}: {:#}", sender.user_id, e);
        report_failure(&ctx, sender.chat_id).await;
    }
    Ok(())
}

async fn handle_callback(q: CallbackQuery, ctx: Arc<AppContext>) -> ResponseResult<()> {
    let Some(data) = q.data.clone() else {
        return Ok(());
    };
    let sender = Sender {
        user_id: q.from.id.0 as i64,
        chat_id: q.message.as_ref().map(|m| m.chat.id.0).unwrap_or(q.from.id.0 as i64),
        nickname: q.from.username.clone(),
    };
    let incoming = Incoming::Callback {
        id: q.id.clone(),
        data,
        message_id: q.message.as_ref().map(|m| m.id.0),
    };
    if let Err(e) = handlers::handle_update(&ctx, &sender, incoming).await {
        error!("Failed to handle callback from {}: {:#}", sender.user_id, e);
        report_failure(&ctx, sender.chat_id).await;
    }
    Ok(())
}

async fn report_failure(ctx: &AppContext, chat_id: i64) {
    let text = format_error("щось пішло не так, спробуйте ще раз або поверніться в меню /start");
    if let Err(e) = ctx.transport.send_message(chat_id, &text, None).await {
        error!("Failed to report error to {}: {}", chat_id, e);
    }
}

fn incoming_from_message(msg: &Message) -> Option<(Sender, Incoming)> {
    let user = msg.from()?;
    let sender = Sender {
        user_id: user.id.0 as i64,
        chat_id: msg.chat.id.0,
        nickname: user.username.clone(),
    };
    let message_id = msg.id.0;

    let incoming = if let Some(text) = msg.text() {
        if text.starts_with('/') {
            Incoming::Command {
                message_id,
                command: text.to_string(),
            }
        } else {
            Incoming::Text {
                message_id,
                text: text.to_string(),
            }
        }
    } else if let Some(location) = msg.location() {
        Incoming::Location {
            message_id,
            lat: location.latitude,
            lng: location.longitude,
        }
    } else if let Some(photos) = msg.photo() {
        // Самый большой размер идёт последним
        let photo = photos.last()?;
        Incoming::Photo {
            message_id,
            file_id: photo.file.id.clone(),
        }
    } else {
        return None;
    };

    Some((sender, incoming))
}
