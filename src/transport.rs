//! Граница с чат-API: клавиатуры, отправка и редактирование сообщений.
//!
//! Визард и рассылка работают через [`ChatTransport`], поэтому в тестах Telegram заменяется записывающей
//! реализацией, а в работе используется [`TelegramTransport`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicI32, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use teloxide::prelude::*;
use teloxide::types::{ChatId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId, ParseMode};
use teloxide::{ApiError, RequestError};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::TransportError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub text: String,
    pub data: String,
}

impl Button {
    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: data.into(),
        }
    }
}

pub type Keyboard = Vec<Vec<Button>>;

/// Последнее отрисованное ботом сообщение: с ним сравнивается новая отрисовка
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub message_id: i32,
    pub text: String,
    pub keyboard: Keyboard,
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Отправляет HTML-сообщение, возвращает его id
    async fn send_message(&self, chat_id: i64, text: &str, keyboard: Option<&Keyboard>) -> Result<i32, TransportError>;

    async fn edit_message(&self, chat_id: i64, message_id: i32, text: &str, keyboard: &Keyboard)
        -> Result<(), TransportError>;

    /// Копия сообщения без подписи «переслано», с заменённой подписью
    async fn copy_message(
        &self,
        chat_id: i64,
        from_chat_id: i64,
        message_id: i32,
        caption: Option<&str>,
    ) -> Result<(), TransportError>;

    async fn send_photo(&self, chat_id: i64, file_id: &str, caption: Option<&str>) -> Result<(), TransportError>;

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), TransportError>;

    async fn answer_callback(&self, callback_id: &str, alert: Option<&str>) -> Result<(), TransportError>;
}

/// Перерисовывает активное сообщение пользователя.
///
/// Редактирует сообщение под нажатой кнопкой (`anchor`), иначе последнее отрисованное. Если сообщения нет
/// или оно удалено, отправляет новое. Ничего не делает, если текст и клавиатура совпадают с последней
/// отрисовкой того же сообщения. Возвращает `true`, если к API был сделан вызов.
pub async fn render(
    transport: &dyn ChatTransport,
    chat_id: i64,
    last: &mut Option<RenderedMessage>,
    anchor: Option<i32>,
    text: &str,
    keyboard: Keyboard,
) -> Result<bool, TransportError> {
    let target = anchor.or_else(|| last.as_ref().map(|m| m.message_id));

    if let (Some(target), Some(prev)) = (target, last.as_ref()) {
        if prev.message_id == target && prev.text == text && prev.keyboard == keyboard {
            return Ok(false);
        }
    }

    let message_id = match target {
        Some(id) => match transport.edit_message(chat_id, id, text, &keyboard).await {
            Ok(()) | Err(TransportError::NotModified) => id,
            Err(TransportError::MessageNotFound) => {
                warn!("Message {} in chat {} is gone, sending a new one", id, chat_id);
                transport.send_message(chat_id, text, Some(&keyboard)).await?
            }
            Err(e) => return Err(e),
        },
        None => transport.send_message(chat_id, text, Some(&keyboard)).await?,
    };

    *last = Some(RenderedMessage {
        message_id,
        text: text.to_string(),
        keyboard,
    });
    Ok(true)
}

pub fn to_markup(keyboard: &Keyboard) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(keyboard.iter().map(|row| {
        row.iter()
            .map(|b| InlineKeyboardButton::callback(b.text.clone(), b.data.clone()))
            .collect::<Vec<_>>()
    }))
}

impl From<RequestError> for TransportError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::RetryAfter(_) => TransportError::RateLimited,
            RequestError::Api(api) => match api {
                ApiError::BotBlocked | ApiError::UserDeactivated => TransportError::Blocked,
                ApiError::MessageNotModified => TransportError::NotModified,
                ApiError::MessageToForwardNotFound
                | ApiError::MessageIdInvalid
                | ApiError::MessageToEditNotFound
                | ApiError::MessageToDeleteNotFound => TransportError::MessageNotFound,
                ApiError::Unknown(ref text) if text.contains("not found") => TransportError::MessageNotFound,
                other => TransportError::Other(other.to_string()),
            },
            other => TransportError::Other(other.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_message(&self, chat_id: i64, text: &str, keyboard: Option<&Keyboard>) -> Result<i32, TransportError> {
        let mut request = self
            .bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html)
            .disable_web_page_preview(true);
        if let Some(kb) = keyboard {
            request = request.reply_markup(to_markup(kb));
        }
        let message = request.await?;
        Ok(message.id.0)
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        keyboard: &Keyboard,
    ) -> Result<(), TransportError> {
        self.bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id), text)
            .parse_mode(ParseMode::Html)
            .disable_web_page_preview(true)
            .reply_markup(to_markup(keyboard))
            .await?;
        Ok(())
    }

    async fn copy_message(
        &self,
        chat_id: i64,
        from_chat_id: i64,
        message_id: i32,
        caption: Option<&str>,
    ) -> Result<(), TransportError> {
        let mut request = self
            .bot
            .copy_message(ChatId(chat_id), ChatId(from_chat_id), MessageId(message_id));
        if let Some(caption) = caption {
            request = request.caption(caption);
        }
        request.await?;
        Ok(())
    }

    async fn send_photo(&self, chat_id: i64, file_id: &str, caption: Option<&str>) -> Result<(), TransportError> {
        let mut request = self.bot.send_photo(ChatId(chat_id), InputFile::file_id(file_id));
        if let Some(caption) = caption {
            request = request.caption(caption).parse_mode(ParseMode::Html);
        }
        request.await?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), TransportError> {
        self.bot.delete_message(ChatId(chat_id), MessageId(message_id)).await?;
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, alert: Option<&str>) -> Result<(), TransportError> {
        let mut request = self.bot.answer_callback_query(callback_id);
        if let Some(text) = alert {
            request = request.text(text).show_alert(true);
        }
        request.await?;
        Ok(())
    }
}

/// Что было отправлено через [`RecordingTransport`]
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Message {
        chat_id: i64,
        message_id: i32,
        text: String,
        keyboard: Option<Keyboard>,
    },
    Edit {
        chat_id: i64,
        message_id: i32,
        text: String,
        keyboard: Keyboard,
    },
    Copy {
        chat_id: i64,
        message_id: i32,
        caption: Option<String>,
    },
    Photo {
        chat_id: i64,
        file_id: String,
    },
    Delete {
        chat_id: i64,
        message_id: i32,
    },
    Callback {
        alert: Option<String>,
    },
}

#[derive(Default)]
struct Faults {
    lost_edits: bool,
    missing: HashSet<i32>,
    blocked: HashSet<i64>,
    rate_limited: usize,
}

/// Транспорт, который ничего не отправляет, а записывает вызовы. Для тестов и отладки без Telegram.
#[derive(Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<Sent>>,
    faults: Mutex<Faults>,
    next_id: AtomicI32,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn calls(&self) -> Vec<Sent> {
        self.calls.lock().await.clone()
    }

    pub async fn clear(&self) {
        self.calls.lock().await.clear();
    }

    /// Тексты сообщений, отправленных в чат (без правок)
    pub async fn messages_to(&self, chat: i64) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|c| match c {
                Sent::Message { chat_id, text, .. } if *chat_id == chat => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn edit_count(&self) -> usize {
        self.calls.lock().await.iter().filter(|c| matches!(c, Sent::Edit { .. })).count()
    }

    /// Сообщения, которые больше нельзя редактировать
    pub async fn lose_edits(&self) {
        self.faults.lock().await.lost_edits = true;
    }

    /// Сообщение канала удалено: копирование вернёт `MessageNotFound`
    pub async fn remove_source(&self, message_id: i32) {
        self.faults.lock().await.missing.insert(message_id);
    }

    pub async fn block(&self, chat_id: i64) {
        self.faults.lock().await.blocked.insert(chat_id);
    }

    /// Следующие `n` пересылок упрутся в flood control
    pub async fn rate_limit_next(&self, n: usize) {
        self.faults.lock().await.rate_limited = n;
    }

    async fn check_chat(&self, chat_id: i64) -> Result<(), TransportError> {
        if self.faults.lock().await.blocked.contains(&chat_id) {
            return Err(TransportError::Blocked);
        }
        Ok(())
    }

    async fn check_source(&self, message_id: i32) -> Result<(), TransportError> {
        let mut faults = self.faults.lock().await;
        if faults.missing.contains(&message_id) {
            return Err(TransportError::MessageNotFound);
        }
        if faults.rate_limited > 0 {
            faults.rate_limited -= 1;
            return Err(TransportError::RateLimited);
        }
        Ok(())
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_message(&self, chat_id: i64, text: &str, keyboard: Option<&Keyboard>) -> Result<i32, TransportError> {
        self.check_chat(chat_id).await?;
        let message_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 101;
        self.calls.lock().await.push(Sent::Message {
            chat_id,
            message_id,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
        });
        Ok(message_id)
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        keyboard: &Keyboard,
    ) -> Result<(), TransportError> {
        self.check_chat(chat_id).await?;
        if self.faults.lock().await.lost_edits {
            return Err(TransportError::MessageNotFound);
        }
        self.calls.lock().await.push(Sent::Edit {
            chat_id,
            message_id,
            text: text.to_string(),
            keyboard: keyboard.clone(),
        });
        Ok(())
    }

    async fn copy_message(
        &self,
        chat_id: i64,
        _from_chat_id: i64,
        message_id: i32,
        caption: Option<&str>,
    ) -> Result<(), TransportError> {
        self.check_chat(chat_id).await?;
        self.check_source(message_id).await?;
        self.calls.lock().await.push(Sent::Copy {
            chat_id,
            message_id,
            caption: caption.map(str::to_string),
        });
        Ok(())
    }

    async fn send_photo(&self, chat_id: i64, file_id: &str, _caption: Option<&str>) -> Result<(), TransportError> {
        self.check_chat(chat_id).await?;
        self.calls.lock().await.push(Sent::Photo {
            chat_id,
            file_id: file_id.to_string(),
        });
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), TransportError> {
        self.calls.lock().await.push(Sent::Delete { chat_id, message_id });
        Ok(())
    }

    async fn answer_callback(&self, _callback_id: &str, alert: Option<&str>) -> Result<(), TransportError> {
        self.calls.lock().await.push(Sent::Callback {
            alert: alert.map(str::to_string),
        });
        Ok(())
    }
}
