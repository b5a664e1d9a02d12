//! Доставка объявлений пользователю: копия поста из канала с очищенной подписью,
//! медиагруппа целиком, текстовая ссылка на время flood control.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::store::Listing;
use crate::transport::ChatTransport;
use crate::utils::{clean_caption, format_listing_link};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForwardError {
    #[error("Listing {id} message is gone: {link}")]
    MessageNotFound { id: i64, link: String },
    #[error("Bot was blocked by user {0}")]
    Blocked(i64),
    #[error("Transport error: {0}")]
    Transport(TransportError),
}

/// Как объявление дошло до пользователя
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Copied,
    Link,
}

pub struct Forwarder {
    transport: Arc<dyn ChatTransport>,
    from_chat_id: i64,
    send_delay: Duration,
    flood_cooldown: Duration,
    cooldown_until: Mutex<Option<Instant>>,
}

impl Forwarder {
    pub fn new(transport: Arc<dyn ChatTransport>, from_chat_id: i64, send_delay: Duration, flood_cooldown: Duration) -> Self {
        Self {
            transport,
            from_chat_id,
            send_delay,
            flood_cooldown,
            cooldown_until: Mutex::new(None),
        }
    }

    pub async fn in_cooldown(&self) -> bool {
        matches!(*self.cooldown_until.lock().await, Some(until) if Instant::now() < until)
    }

    async fn start_cooldown(&self) {
        *self.cooldown_until.lock().await = Some(Instant::now() + self.flood_cooldown);
    }

    /// Отправляет объявления по очереди с паузой между ними.
    /// Уже отправленные в этой пачке (`sent`) пропускаются, так что после ошибки
    /// вызов можно повторить с той же пачкой. Останавливается на первой ошибке.
    pub async fn forward_listings(
        &self,
        chat_id: i64,
        listings: &[Listing],
        sent: &mut HashSet<i64>,
    ) -> Result<usize, ForwardError> {
        let mut count = 0;
        for listing in listings {
            if sent.contains(&listing.id) {
                continue;
            }
            if !sent.is_empty() && !self.send_delay.is_zero() {
                tokio::time::sleep(self.send_delay).await;
            }
            self.forward_listing(chat_id, listing).await?;
            sent.insert(listing.id);
            count += 1;
        }
        Ok(count)
    }

    pub async fn forward_listing(&self, chat_id: i64, listing: &Listing) -> Result<Delivery, ForwardError> {
        let ids = listing.message_ids();
        if ids.is_empty() || self.in_cooldown().await {
            return self.send_link(chat_id, listing).await;
        }

        let caption = listing.caption.as_deref().and_then(clean_caption);
        for (i, message_id) in ids.iter().enumerate() {
            let caption = if i == 0 { caption.as_deref() } else { None };
            let sent = self
                .transport
                .copy_message(chat_id, self.from_chat_id, *message_id, caption)
                .await;
            match sent {
                Ok(()) => {}
                Err(TransportError::RateLimited) => {
                    warn!("Flood control while sending listing {} to {}, falling back to link", listing.id, chat_id);
                    self.start_cooldown().await;
                    // Часть медиагруппы могла уйти; ссылка ведёт на весь пост
                    return self.send_link(chat_id, listing).await;
                }
                Err(e) => return Err(self.classify(e, chat_id, listing)),
            }
        }
        debug!("Listing {} delivered to {}", listing.id, chat_id);
        Ok(Delivery::Copied)
    }

    async fn send_link(&self, chat_id: i64, listing: &Listing) -> Result<Delivery, ForwardError> {
        self.transport
            .send_message(chat_id, &format_listing_link(listing), None)
            .await
            .map_err(|e| self.classify(e, chat_id, listing))?;
        Ok(Delivery::Link)
    }

    fn classify(&self, error: TransportError, chat_id: i64, listing: &Listing) -> ForwardError {
        match error {
            TransportError::Blocked => ForwardError::Blocked(chat_id),
            TransportError::MessageNotFound => ForwardError::MessageNotFound {
                id: listing.id,
                link: listing.link.clone(),
            },
            other => ForwardError::Transport(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::Currency;
    use crate::store::ListingKind;
    use crate::transport::{RecordingTransport, Sent};
    use chrono::Utc;

    fn listing(id: i64, first_message: i32, group: i32) -> Listing {
        Listing {
            id,
            kind: ListingKind::Apartment,
            district: "Галицький".to_string(),
            street: Some("Руська".to_string()),
            residential_complex: None,
            rooms: 1,
            rent_price: 12000.0,
            currency: Currency::Uah,
            living_area: None,
            territory_area: None,
            pets: false,
            kids: false,
            conditioner: false,
            furniture: false,
            latitude: None,
            longitude: None,
            link: format!("https://t.me/c/1/{}", first_message),
            media_group_size: group,
            caption: Some("1к квартира\nПідписуйтесь на наш канал".to_string()),
            created_at: Utc::now(),
        }
    }

    fn forwarder(transport: Arc<RecordingTransport>) -> Forwarder {
        Forwarder::new(transport, -100, Duration::ZERO, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn media_group_is_copied_with_clean_caption_on_first_item() {
        let transport = Arc::new(RecordingTransport::new());
        let fwd = forwarder(transport.clone());

        assert_eq!(fwd.forward_listing(5, &listing(1, 40, 3)).await, Ok(Delivery::Copied));

        let calls = transport.calls().await;
        assert_eq!(calls.len(), 3);
        assert_eq!(
            calls[0],
            Sent::Copy {
                chat_id: 5,
                message_id: 40,
                caption: Some("1к квартира".to_string())
            }
        );
        assert_eq!(
            calls[2],
            Sent::Copy {
                chat_id: 5,
                message_id: 42,
                caption: None
            }
        );
    }

    #[tokio::test]
    async fn flood_control_switches_to_links_until_cooldown_ends() {
        let transport = Arc::new(RecordingTransport::new());
        transport.rate_limit_next(1).await;
        let fwd = forwarder(transport.clone());

        let mut sent = HashSet::new();
        let count = fwd.forward_listings(5, &[listing(1, 40, 1), listing(2, 50, 1)], &mut sent).await;

        assert_eq!(count, Ok(2));
        assert!(fwd.in_cooldown().await);
        let texts = transport.messages_to(5).await;
        assert_eq!(texts.len(), 2);
        assert!(texts[1].contains("https://t.me/c/1/50"));
    }

    #[tokio::test]
    async fn missing_source_is_reported_with_listing() {
        let transport = Arc::new(RecordingTransport::new());
        transport.remove_source(40).await;
        let fwd = forwarder(transport);

        let err = fwd.forward_listing(5, &listing(9, 40, 1)).await.unwrap_err();
        assert_eq!(
            err,
            ForwardError::MessageNotFound {
                id: 9,
                link: "https://t.me/c/1/40".to_string()
            }
        );
    }

    #[tokio::test]
    async fn blocked_user_is_an_error() {
        let transport = Arc::new(RecordingTransport::new());
        transport.block(5).await;
        let fwd = forwarder(transport);

        assert_eq!(fwd.forward_listing(5, &listing(1, 40, 1)).await, Err(ForwardError::Blocked(5)));
    }

    #[tokio::test]
    async fn sends_to_one_chat_are_spaced_and_not_repeated() {
        let transport = Arc::new(RecordingTransport::new());
        let fwd = Forwarder::new(transport.clone(), -100, Duration::from_millis(50), Duration::from_secs(60));
        let batch = [listing(1, 40, 1), listing(2, 50, 1), listing(3, 60, 1)];
        let mut sent = HashSet::from([1]);

        let started = Instant::now();
        assert_eq!(fwd.forward_listings(5, &batch, &mut sent).await, Ok(2));

        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(sent.len(), 3);
        assert_eq!(transport.calls().await.len(), 2);
    }
}
