use std::sync::Arc;

use crate::config::Config;
use crate::currency::RateSource;
use crate::forwarder::Forwarder;
use crate::notifications::Notifier;
use crate::store::{ListingStore, SessionStore, SubmissionStore, UserStore};
use crate::transport::ChatTransport;

/// Общие сервисы бота. Один экземпляр под `Arc` делится между обработчиками и фоновой рассылкой.
pub struct AppContext {
    pub config: Config,
    pub listings: Arc<dyn ListingStore>,
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub submissions: Arc<dyn SubmissionStore>,
    pub rates: Arc<dyn RateSource>,
    pub transport: Arc<dyn ChatTransport>,
    pub forwarder: Forwarder,
    pub notifier: Notifier,
}

impl AppContext {
    /// Все хранилища обслуживает одна реализация (SQLite или память)
    pub fn new<S>(config: Config, store: Arc<S>, rates: Arc<dyn RateSource>, transport: Arc<dyn ChatTransport>) -> Self
    where
        S: ListingStore + UserStore + SessionStore + SubmissionStore + 'static,
    {
        let forwarder = Forwarder::new(
            transport.clone(),
            config.from_chat_id,
            config.send_delay,
            config.flood_cooldown,
        );
        let notifier = Notifier::new(transport.clone(), store.clone(), config.admin_ids.clone());
        Self {
            listings: store.clone(),
            users: store.clone(),
            sessions: store.clone(),
            submissions: store,
            rates,
            transport,
            forwarder,
            notifier,
            config,
        }
    }
}
