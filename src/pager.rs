//! Постраничный показ результатов поиска.

use std::collections::HashSet;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::forwarder::{ForwardError, Forwarder};
use crate::notifications::Notifier;
use crate::query::Predicate;
use crate::store::{Listing, ListingStore, UserStore};
use crate::subscription;
use crate::transport::{render, ChatTransport, Keyboard, RenderedMessage};
use crate::wizard::keyboard::{button, BACK_TEXT, HOME_TEXT};
use crate::wizard::Action;

pub const PAGE_SIZE: usize = 3;

pub const EMPTY_RESULT_TEXT: &str = "Нажаль за вашими критеріями пошуку нічого не знайшлось.\n\
                                     Спробуйте змінити параметри пошуку,\n\
                                     або підпишіться на розсилку нових оголошень.";
pub const THATS_ALL_FOLKS_TEXT: &str = "Схоже що це всі оголошення на сьогодні,\n\
                                        Підпишись на розсилку щоб першим знати про нові оголошення";
pub const MORE_RESULTS_TEXT: &str = "Схоже тут є ще варіанти для тебе ❗️";
pub const SHOW_MORE_TEXT: &str = "Показати ще ⤵️";
pub const SUBSCRIBE_TEXT: &str = "Підписатися на оновлення 📩";

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub listings: Vec<Listing>,
    pub offset: usize,
    /// Страница короче `PAGE_SIZE`. Полная страница считается не последней, даже если дальше пусто.
    pub is_last: bool,
}

pub async fn fetch_page(store: &dyn ListingStore, predicate: &Predicate, offset: usize) -> Result<Page> {
    let listings = store
        .fetch_page(predicate, offset, PAGE_SIZE)
        .await
        .context("Failed to fetch results page")?;
    let is_last = listings.len() < PAGE_SIZE;
    Ok(Page {
        listings,
        offset,
        is_last,
    })
}

pub fn results_keyboard(page: &Page) -> Keyboard {
    let mut keyboard = Vec::new();
    if !page.is_last {
        keyboard.push(vec![button(SHOW_MORE_TEXT, &Action::ShowMore)]);
    }
    keyboard.push(vec![button(BACK_TEXT, &Action::Back), button(HOME_TEXT, &Action::MainMenu)]);
    keyboard.push(vec![button(SUBSCRIBE_TEXT, &Action::Subscribe)]);
    keyboard
}

pub struct ResultPager<'a> {
    store: &'a dyn ListingStore,
    users: &'a dyn UserStore,
    transport: &'a dyn ChatTransport,
    forwarder: &'a Forwarder,
    notifier: &'a Notifier,
}

impl<'a> ResultPager<'a> {
    pub fn new(
        store: &'a dyn ListingStore,
        users: &'a dyn UserStore,
        transport: &'a dyn ChatTransport,
        forwarder: &'a Forwarder,
        notifier: &'a Notifier,
    ) -> Self {
        Self {
            store,
            users,
            transport,
            forwarder,
            notifier,
        }
    }

    /// Пересылает страницу и ставит под ней сообщение с навигацией.
    ///
    /// Пустой результат на первой странице заменяет текст сообщения под кнопкой. Если пост объявления
    /// удалён из канала, объявление убирается из базы, операторы получают уведомление, а страница
    /// запрашивается заново без уже отправленных объявлений. Если пользователь заблокировал бота,
    /// его подписка снимается и возвращается `None`.
    pub async fn show(
        &self,
        chat_id: i64,
        predicate: &Predicate,
        offset: usize,
        last_message: &mut Option<RenderedMessage>,
        anchor: Option<i32>,
    ) -> Result<Option<Page>> {
        let mut sent: HashSet<i64> = HashSet::new();
        loop {
            let page = fetch_page(self.store, predicate, offset).await?;
            if page.listings.is_empty() && offset == 0 {
                render(self.transport, chat_id, last_message, anchor, EMPTY_RESULT_TEXT, results_keyboard(&page)).await?;
                return Ok(Some(page));
            }

            match self.forwarder.forward_listings(chat_id, &page.listings, &mut sent).await {
                Ok(_) => {
                    let text = if page.is_last { THATS_ALL_FOLKS_TEXT } else { MORE_RESULTS_TEXT };
                    // Навигация всегда новым сообщением под объявлениями
                    *last_message = None;
                    render(self.transport, chat_id, last_message, None, text, results_keyboard(&page)).await?;
                    info!("Shown {} listings to {} from offset {}", page.listings.len(), chat_id, offset);
                    return Ok(Some(page));
                }
                Err(ForwardError::MessageNotFound { id, link }) => {
                    warn!("Listing {} points to a deleted message {}, removing it", id, link);
                    let name = page
                        .listings
                        .iter()
                        .find(|l| l.id == id)
                        .map(Listing::full_name)
                        .unwrap_or(link);
                    self.notifier.notify_admins(&format!("Something wrong with: {}", name)).await;
                    self.store.remove_listing(id).await.context("Failed to remove stale listing")?;
                }
                Err(ForwardError::Blocked(user_id)) => {
                    subscription::drop_blocked_user(self.users, self.notifier, user_id).await?;
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
