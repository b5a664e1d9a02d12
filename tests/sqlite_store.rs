use chrono::{Duration, Utc};
use realty_bot::query::{Column, Predicate, Value};
use realty_bot::store::{
    AdSubmission, AnswerField, Listing, ListingStore, SessionStore, SqliteStore, SubmissionStore, Subscription,
    UserStore,
};

fn listing(district: &str, rooms: i64, price: f64, currency: &str, minutes_ago: i64) -> Listing {
    let complex = if rooms > 1 { Some("Парус Парк") } else { None };
    serde_json::from_value(serde_json::json!({
        "kind": "apartment",
        "district": district,
        "residential_complex": complex,
        "rooms": rooms,
        "rent_price": price,
        "currency": currency,
        "latitude": 49.84,
        "longitude": 24.03,
        "link": format!("https://t.me/c/100/{}", rooms * 10),
        "media_group_size": 2,
        "created_at": Utc::now() - Duration::minutes(minutes_ago),
    }))
    .unwrap()
}

async fn open(dir: &tempfile::TempDir) -> SqliteStore {
    let url = format!("sqlite://{}", dir.path().join("realty.db").display());
    SqliteStore::new(&url).await.unwrap()
}

#[tokio::test]
async fn data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open(&dir).await;
        store.insert_listing(&listing("Сихівський", 1, 9000.0, "UAH", 30)).await.unwrap();
        store.touch_user(7, Some("olena"), Utc::now()).await.unwrap();
        store
            .set_subscription(
                7,
                Some(&Subscription {
                    predicate: Predicate::eq(Column::District, Value::text("Сихівський")),
                    summary: "Обрані фільтри:".to_string(),
                }),
                Some(Utc::now()),
            )
            .await
            .unwrap();
        store.save_session(7, "filter_state", r#"{"stepIndex":2}"#).await.unwrap();
    }

    let store = open(&dir).await;
    let page = store.fetch_page(&Predicate::All, 0, 10).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].message_ids(), vec![10, 11]);

    let user = store.get_user(7).await.unwrap().unwrap();
    assert_eq!(user.nickname.as_deref(), Some("olena"));
    assert_eq!(
        user.subscription.unwrap().predicate,
        Predicate::eq(Column::District, Value::text("Сихівський"))
    );
    assert_eq!(
        store.load_session(7, "filter_state").await.unwrap().as_deref(),
        Some(r#"{"stepIndex":2}"#)
    );
}

#[tokio::test]
async fn predicates_translate_to_sql() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir).await;
    store.insert_listing(&listing("Сихівський", 1, 9000.0, "UAH", 30)).await.unwrap();
    store.insert_listing(&listing("Франківський", 2, 15000.0, "UAH", 20)).await.unwrap();
    store.insert_listing(&listing("Личаківський", 3, 400.0, "USD", 10)).await.unwrap();

    // Потолок цены в каждой валюте
    let price = Predicate::any(vec![
        Predicate::eq(Column::Currency, Value::text("UAH")).and(Predicate::range(Column::RentPrice, None, Some(15000.0))),
        Predicate::eq(Column::Currency, Value::text("USD")).and(Predicate::range(Column::RentPrice, None, Some(375.0))),
    ]);
    let page = store.fetch_page(&price, 0, 10).await.unwrap();
    let districts: Vec<&str> = page.iter().map(|l| l.district.as_str()).collect();
    assert_eq!(districts, vec!["Франківський", "Сихівський"]);

    let rooms = Predicate::is_in(Column::Rooms, vec![Value::Int(2), Value::Int(3)]);
    assert_eq!(store.fetch_page(&rooms, 0, 10).await.unwrap().len(), 2);
    assert_eq!(store.fetch_page(&rooms, 1, 10).await.unwrap().len(), 1);
    assert!(store
        .fetch_page(&Predicate::is_in(Column::Rooms, vec![]), 0, 10)
        .await
        .unwrap()
        .is_empty());

    let near = Predicate::Near {
        lat: 49.84,
        lng: 24.03,
        radius_m: 500.0,
    };
    assert_eq!(store.fetch_page(&near, 0, 10).await.unwrap().len(), 3);

    let mut complexes = store
        .distinct_values(Column::ResidentialComplex, &Predicate::All)
        .await
        .unwrap();
    complexes.dedup();
    assert_eq!(complexes, vec![Value::text("Парус Парк")]);

    let fresh = store
        .fetch_created_after(&Predicate::All, Utc::now() - Duration::minutes(15), 3)
        .await
        .unwrap();
    assert_eq!(fresh.len(), 1);
    assert_eq!(fresh[0].district, "Личаківський");
}

#[tokio::test]
async fn users_stats_and_submissions() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir).await;
    let now = Utc::now();
    store.touch_user(1, None, now - Duration::hours(3)).await.unwrap();
    store.touch_user(2, Some("ivan"), now).await.unwrap();
    store.set_admin(3, true).await.unwrap();
    store
        .set_subscription(
            2,
            Some(&Subscription {
                predicate: Predicate::All,
                summary: String::new(),
            }),
            Some(now),
        )
        .await
        .unwrap();

    let stats = store.user_stats(now - Duration::hours(1)).await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.subscribed, 1);
    assert_eq!(store.admin_ids().await.unwrap(), vec![3]);
    assert_eq!(store.subscribed_users().await.unwrap()[0].id, 2);
    assert!(store.set_subscription(99, None, None).await.is_err());

    let submission = AdSubmission {
        user_id: 2,
        answers: vec![AnswerField {
            name: "Адреса".to_string(),
            value: "Шевченка 1".to_string(),
        }],
        photos: vec!["file-1".to_string()],
        created_at: now,
    };
    store.save_submission(&submission).await.unwrap();
    let saved = store.submissions_for(2).await.unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].answers, submission.answers);
    assert_eq!(saved[0].photos, submission.photos);
}

#[tokio::test]
async fn in_memory_sessions_can_be_removed() {
    let store = SqliteStore::new("sqlite::memory:").await.unwrap();
    store.save_session(5, "stage", r#""help""#).await.unwrap();
    store.save_session(5, "stage", r#""menu""#).await.unwrap();
    assert_eq!(store.load_session(5, "stage").await.unwrap().as_deref(), Some(r#""menu""#));

    store.remove_session(5, "stage").await.unwrap();
    assert_eq!(store.load_session(5, "stage").await.unwrap(), None);
    assert!(store.remove_listing(42).await.map(|removed| !removed).unwrap());
}
