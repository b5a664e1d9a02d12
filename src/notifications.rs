//! Уведомления операторам: битые ссылки, заблокированные пользователи, заявки, просьбы о помощи.

use std::sync::Arc;

use tracing::{info, warn};

use crate::store::UserStore;
use crate::transport::ChatTransport;

pub struct Notifier {
    transport: Arc<dyn ChatTransport>,
    users: Arc<dyn UserStore>,
    static_admins: Vec<i64>,
}

impl Notifier {
    pub fn new(transport: Arc<dyn ChatTransport>, users: Arc<dyn UserStore>, static_admins: Vec<i64>) -> Self {
        Self {
            transport,
            users,
            static_admins,
        }
    }

    /// Операторы из конфигурации плюс пользователи с флагом `is_admin`
    pub async fn admin_ids(&self) -> Vec<i64> {
        let mut ids = self.static_admins.clone();
        match self.users.admin_ids().await {
            Ok(from_db) => ids.extend(from_db),
            Err(e) => warn!("Failed to load admins from database: {}", e),
        }
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Возвращает число операторов, которым сообщение дошло
    pub async fn notify_admins(&self, text: &str) -> usize {
        let admins = self.admin_ids().await;
        if admins.is_empty() {
            warn!("No admins to notify: {}", text);
            return 0;
        }
        self.notify_users(text, &admins).await
    }

    /// Ошибка доставки одному получателю не мешает остальным
    pub async fn notify_users(&self, text: &str, users: &[i64]) -> usize {
        let mut delivered = 0;
        for &user_id in users {
            match self.transport.send_message(user_id, text, None).await {
                Ok(_) => delivered += 1,
                Err(e) => warn!("Failed to notify user {}: {}", user_id, e),
            }
        }
        info!("Notification delivered to {}/{} users", delivered, users.len());
        delivered
    }

    pub async fn send_photos_to_admins(&self, file_ids: &[String]) {
        if file_ids.is_empty() {
            return;
        }
        for admin in self.admin_ids().await {
            for file_id in file_ids {
                if let Err(e) = self.transport.send_photo(admin, file_id, None).await {
                    warn!("Failed to send photo to admin {}: {}", admin, e);
                    break;
                }
            }
        }
    }
}
