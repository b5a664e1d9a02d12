use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use realty_bot::config::Config;
use realty_bot::context::AppContext;
use realty_bot::currency::{FixedRates, RateSnapshot};
use realty_bot::handlers::{handle_update, load_stage, Incoming, Sender, Stage, HELP_MESSAGE_KEY};
use realty_bot::menu;
use realty_bot::pager::THATS_ALL_FOLKS_TEXT;
use realty_bot::store::{Listing, ListingStore, MemoryStore, UserStore};
use realty_bot::subscription::{self, NEW_LISTINGS_TEXT};
use realty_bot::transport::{ChatTransport, RecordingTransport, Sent};
use realty_bot::wizard::FlowKind;

const USER: i64 = 1;
const ADMIN: i64 = 900;
const NEXT: &str = r#"{"n":1}"#;
const BACK: &str = r#"{"b":1}"#;
const MAIN_MENU: &str = r#"{"m":1}"#;

fn config() -> Config {
    Config {
        telegram_token: "test".to_string(),
        database_url: "sqlite::memory:".to_string(),
        from_chat_id: -100,
        admin_ids: vec![ADMIN],
        monobank_url: String::new(),
        rates_ttl: Duration::from_secs(600),
        notify_interval: Duration::from_secs(3600),
        send_delay: Duration::ZERO,
        flood_cooldown: Duration::from_secs(60),
    }
}

fn listing(kind: &str, district: &str, message_id: i32) -> Listing {
    serde_json::from_value(serde_json::json!({
        "kind": kind,
        "district": district,
        "rooms": 3,
        "rent_price": 25000.0,
        "currency": "UAH",
        "living_area": 110.0,
        "link": format!("https://t.me/c/100/{}", message_id),
        "created_at": Utc::now() - chrono::Duration::hours(1),
    }))
    .unwrap()
}

struct Harness {
    ctx: AppContext,
    store: Arc<MemoryStore>,
    transport: Arc<RecordingTransport>,
}

async fn harness() -> Harness {
    let store = Arc::new(
        MemoryStore::with_listings(vec![
            listing("house", "Винники", 10),
            listing("house", "Брюховичі", 20),
            listing("apartment", "Сихівський", 30),
        ])
        .await,
    );
    let transport = Arc::new(RecordingTransport::new());
    let chat: Arc<dyn ChatTransport> = transport.clone();
    let rates = Arc::new(FixedRates(RateSnapshot::new(40.0, 44.0)));
    let ctx = AppContext::new(config(), store.clone(), rates, chat);
    Harness { ctx, store, transport }
}

fn sender(id: i64) -> Sender {
    Sender {
        user_id: id,
        chat_id: id,
        nickname: Some(format!("user{}", id)),
    }
}

impl Harness {
    async fn command(&self, from: i64, command: &str) {
        let incoming = Incoming::Command {
            message_id: 1,
            command: command.to_string(),
        };
        handle_update(&self.ctx, &sender(from), incoming).await.unwrap();
    }

    async fn press(&self, from: i64, data: &str, message_id: i32) {
        let incoming = Incoming::Callback {
            id: "cb".to_string(),
            data: data.to_string(),
            message_id: Some(message_id),
        };
        handle_update(&self.ctx, &sender(from), incoming).await.unwrap();
    }

    async fn last_edit_text(&self) -> Option<String> {
        self.transport.calls().await.into_iter().rev().find_map(|c| match c {
            Sent::Edit { text, .. } => Some(text),
            _ => None,
        })
    }

    async fn copied(&self, chat: i64) -> Vec<i32> {
        self.transport
            .calls()
            .await
            .into_iter()
            .filter_map(|c| match c {
                Sent::Copy { chat_id, message_id, .. } if chat_id == chat => Some(message_id),
                _ => None,
            })
            .collect()
    }
}

#[tokio::test]
async fn house_search_forwards_matching_listings() {
    let h = harness().await;
    h.command(USER, "/start").await;
    assert_eq!(h.transport.messages_to(USER).await, vec![menu::WELCOME_TEXT.to_string()]);

    h.press(USER, menu::HOUSES_STATE, 101).await;
    assert_eq!(load_stage(&h.ctx, USER).await.unwrap(), Stage::Wizard(FlowKind::Houses));

    for _ in 0..FlowKind::Houses.flow().steps.len() {
        h.press(USER, NEXT, 101).await;
    }

    let mut copied = h.copied(USER).await;
    copied.sort();
    assert_eq!(copied, vec![10, 20]);
    assert_eq!(
        h.transport.messages_to(USER).await.last().map(String::as_str),
        Some(THATS_ALL_FOLKS_TEXT)
    );

    // Навигация под результатами ведёт в главное меню
    h.press(USER, MAIN_MENU, 102).await;
    assert_eq!(h.last_edit_text().await.as_deref(), Some(menu::WELCOME_TEXT));
    assert_eq!(load_stage(&h.ctx, USER).await.unwrap(), Stage::Menu);
}

#[tokio::test]
async fn back_on_first_step_returns_to_main_menu() {
    let h = harness().await;
    h.command(USER, "/start").await;
    h.press(USER, menu::APARTMENTS_STATE, 101).await;
    h.press(USER, BACK, 101).await;

    assert_eq!(h.last_edit_text().await.as_deref(), Some(menu::WELCOME_TEXT));
    assert_eq!(load_stage(&h.ctx, USER).await.unwrap(), Stage::Menu);
}

#[tokio::test]
async fn deleted_channel_post_is_dropped_from_results() {
    let h = harness().await;
    h.transport.remove_source(10).await;
    h.command(USER, "/start").await;
    h.press(USER, menu::HOUSES_STATE, 101).await;
    for _ in 0..FlowKind::Houses.flow().steps.len() {
        h.press(USER, NEXT, 101).await;
    }

    assert_eq!(h.copied(USER).await, vec![20]);
    let links: Vec<String> = h.store.listings().await.into_iter().map(|l| l.link).collect();
    assert!(!links.contains(&"https://t.me/c/100/10".to_string()));
    let admin_messages = h.transport.messages_to(ADMIN).await;
    assert!(admin_messages.iter().any(|m| m.starts_with("Something wrong with:")));
}

#[tokio::test]
async fn subscription_receives_only_new_listings() {
    let h = harness().await;
    h.command(USER, "/start").await;
    h.press(USER, menu::SUBSCRIPTION_STATE, 101).await;
    h.press(USER, menu::SUB_HOUSES_STATE, 101).await;
    for _ in 0..FlowKind::Houses.flow().steps.len() {
        h.press(USER, NEXT, 101).await;
    }

    let user = h.store.get_user(USER).await.unwrap().unwrap();
    assert!(user.subscription.is_some());
    assert!(h.last_edit_text().await.unwrap().starts_with(menu::SUBSCRIBED_TEXT));
    assert_eq!(load_stage(&h.ctx, USER).await.unwrap(), Stage::Menu);
    // Существующие объявления подписчику не досылаются
    assert!(h.copied(USER).await.is_empty());

    tokio::time::sleep(Duration::from_millis(10)).await;
    let mut fresh = listing("house", "Зимна Вода", 40);
    fresh.created_at = Utc::now();
    h.store.insert_listing(&fresh).await.unwrap();
    h.store.insert_listing(&listing("apartment", "Галицький", 50)).await.unwrap();

    let report = subscription::notify_subscribers(&h.ctx).await.unwrap();
    assert_eq!(report.subscribers, 1);
    assert_eq!(report.notified, 1);
    assert_eq!(report.listings_sent, 1);
    assert!(h.transport.messages_to(USER).await.contains(&NEW_LISTINGS_TEXT.to_string()));
    assert_eq!(h.copied(USER).await, vec![40]);

    let again = subscription::notify_subscribers(&h.ctx).await.unwrap();
    assert_eq!(again.notified, 0);
}

#[tokio::test]
async fn blocked_subscriber_loses_subscription() {
    let h = harness().await;
    h.command(USER, "/start").await;
    h.press(USER, menu::SUB_HOUSES_STATE, 101).await;
    for _ in 0..FlowKind::Houses.flow().steps.len() {
        h.press(USER, NEXT, 101).await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    let mut fresh = listing("house", "Винники", 60);
    fresh.created_at = Utc::now();
    h.store.insert_listing(&fresh).await.unwrap();
    h.transport.block(USER).await;

    let report = subscription::notify_subscribers(&h.ctx).await.unwrap();
    assert_eq!(report.blocked, 1);
    let user = h.store.get_user(USER).await.unwrap().unwrap();
    assert!(user.subscription.is_none());
    assert!(h
        .transport
        .messages_to(ADMIN)
        .await
        .iter()
        .any(|m| m.contains("заблокував бота")));
}

#[tokio::test]
async fn deleted_post_in_broadcast_is_replaced_and_not_resent() {
    let h = harness().await;
    h.command(USER, "/start").await;
    h.press(USER, menu::SUB_HOUSES_STATE, 101).await;
    for _ in 0..FlowKind::Houses.flow().steps.len() {
        h.press(USER, NEXT, 101).await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    let mut older = listing("house", "Винники", 70);
    older.created_at = Utc::now();
    h.store.insert_listing(&older).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let mut newer = listing("house", "Брюховичі", 80);
    newer.created_at = Utc::now();
    h.store.insert_listing(&newer).await.unwrap();
    h.transport.remove_source(80).await;

    let first = subscription::notify_subscribers(&h.ctx).await.unwrap();
    assert_eq!(first.notified, 1);
    assert_eq!(first.listings_sent, 1);
    assert_eq!(first.stale_listings, 1);

    let second = subscription::notify_subscribers(&h.ctx).await.unwrap();
    assert_eq!(second.notified, 0);
    assert_eq!(h.copied(USER).await, vec![70]);
}

#[tokio::test]
async fn user_blocking_bot_during_search_loses_subscription() {
    let h = harness().await;
    h.command(USER, "/start").await;
    h.press(USER, menu::SUB_HOUSES_STATE, 101).await;
    let steps = FlowKind::Houses.flow().steps.len();
    for _ in 0..steps {
        h.press(USER, NEXT, 101).await;
    }
    assert!(h.store.get_user(USER).await.unwrap().unwrap().subscription.is_some());

    h.press(USER, menu::HOUSES_STATE, 102).await;
    for _ in 0..steps - 1 {
        h.press(USER, NEXT, 102).await;
    }
    h.transport.block(USER).await;
    // Последний «далі» запускает показ результатов
    h.press(USER, NEXT, 102).await;

    assert!(h.store.get_user(USER).await.unwrap().unwrap().subscription.is_none());
    assert!(h
        .transport
        .messages_to(ADMIN)
        .await
        .iter()
        .any(|m| m.contains("заблокував бота")));
}

#[tokio::test]
async fn help_request_reaches_admins() {
    let h = harness().await;
    h.command(USER, "/start").await;
    h.press(USER, menu::HELP_STATE, 101).await;
    assert_eq!(load_stage(&h.ctx, USER).await.unwrap(), Stage::Help);

    let text = Incoming::Text {
        message_id: 55,
        text: "Шукаю квартиру біля парку".to_string(),
    };
    handle_update(&h.ctx, &sender(USER), text).await.unwrap();
    assert!(h.last_edit_text().await.unwrap().contains("Шукаю квартиру біля парку"));
    assert!(h.transport.calls().await.contains(&Sent::Delete {
        chat_id: USER,
        message_id: 55
    }));

    h.press(USER, menu::SUBMIT_HELP, 101).await;
    let admin_messages = h.transport.messages_to(ADMIN).await;
    assert_eq!(admin_messages.len(), 1);
    assert!(admin_messages[0].contains("Шукаю квартиру біля парку"));
    assert!(admin_messages[0].contains("@user1"));
    assert_eq!(h.last_edit_text().await.as_deref(), Some(menu::HELP_SENT_TEXT));
    assert_eq!(h.ctx.sessions.load_session(USER, HELP_MESSAGE_KEY).await.unwrap(), None);
}

#[tokio::test]
async fn admin_commands_are_ignored_for_regular_users() {
    let h = harness().await;
    h.command(USER, "/start").await;
    h.transport.clear().await;

    h.press(USER, menu::TOTAL_USERS, 101).await;
    assert!(h
        .transport
        .calls()
        .await
        .iter()
        .all(|c| matches!(c, Sent::Callback { .. })));

    h.command(ADMIN, "/start").await;
    let admin_menu = h.transport.calls().await.into_iter().find_map(|c| match c {
        Sent::Message { chat_id, keyboard, .. } if chat_id == ADMIN => keyboard,
        _ => None,
    });
    let admin_menu = admin_menu.unwrap();
    assert_eq!(admin_menu.last().unwrap()[0].data, menu::ADMIN_MENU);

    h.press(ADMIN, menu::TOTAL_USERS, 102).await;
    assert_eq!(h.last_edit_text().await.as_deref(), Some("Всього користувачів: 2"));
}

#[tokio::test]
async fn text_outside_of_dialog_is_ignored() {
    let h = harness().await;
    h.command(USER, "/start").await;
    h.transport.clear().await;

    let text = Incoming::Text {
        message_id: 77,
        text: "привіт".to_string(),
    };
    handle_update(&h.ctx, &sender(USER), text).await.unwrap();
    assert!(h.transport.calls().await.is_empty());
    assert!(h.store.get_user(USER).await.unwrap().is_some());
}

#[tokio::test]
async fn cancelling_subscription_updates_menu() {
    let h = harness().await;
    h.command(USER, "/start").await;
    h.press(USER, menu::SUB_APARTMENTS_STATE, 101).await;
    let steps = FlowKind::Apartments.flow().steps.len();
    for _ in 0..steps {
        h.press(USER, NEXT, 101).await;
    }
    assert!(h.store.get_user(USER).await.unwrap().unwrap().subscription.is_some());

    h.press(USER, menu::CANCEL_SUBSCRIPTION, 101).await;
    assert!(h.store.get_user(USER).await.unwrap().unwrap().subscription.is_none());
    assert_eq!(h.last_edit_text().await.as_deref(), Some(menu::SUBSCRIPTION_TEXT));
}
