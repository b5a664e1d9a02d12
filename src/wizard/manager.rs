//! Машина состояний визарда: переходы между шагами, диспетчеризация действий, отрисовка.

use anyhow::{Context, Result};
use tracing::{debug, info};

use super::action::Action;
use super::flows::{Flow, FlowKind};
use super::keyboard::navigation_row;
use super::state::ConversationState;
use super::step::Chain;
use crate::currency::RateSource;
use crate::query::Predicate;
use crate::store::{AnswerField, ListingStore, SessionStore, Subscription};
use crate::transport::{render, ChatTransport, RenderedMessage};

pub const LAST_MESSAGE_KEY: &str = "last_message";

/// Состояние диалога и последнее отрисованное сообщение, загруженные на время одного апдейта
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WizardSession {
    pub state: ConversationState,
    pub last_message: Option<RenderedMessage>,
}

impl WizardSession {
    pub fn new(is_subscription_mode: bool) -> Self {
        Self {
            state: ConversationState::new(is_subscription_mode),
            last_message: None,
        }
    }

    pub async fn load(store: &dyn SessionStore, user_id: i64, kind: FlowKind) -> Result<Self> {
        let state = store
            .load_session(user_id, kind.session_key())
            .await
            .context("Failed to load conversation state")?;
        let last_message = store
            .load_session(user_id, LAST_MESSAGE_KEY)
            .await
            .context("Failed to load last message")?
            .and_then(|raw| serde_json::from_str(&raw).ok());
        Ok(Self {
            state: ConversationState::load(state.as_deref()),
            last_message,
        })
    }

    pub async fn save(&self, store: &dyn SessionStore, user_id: i64, kind: FlowKind) -> Result<()> {
        store
            .save_session(user_id, kind.session_key(), &self.state.to_json())
            .await
            .context("Failed to save conversation state")?;
        match &self.last_message {
            Some(message) => {
                let raw = serde_json::to_string(message)?;
                store.save_session(user_id, LAST_MESSAGE_KEY, &raw).await?;
            }
            None => store.remove_session(user_id, LAST_MESSAGE_KEY).await?,
        }
        Ok(())
    }
}

/// Чем закончилась обработка действия
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Шаг перерисован (или уже был актуален)
    Rendered,
    /// Действие к текущему экрану не относится
    Ignored,
    /// Показать страницу результатов начиная с `offset`
    ShowResults { predicate: Predicate, offset: usize },
    /// Подписку нужно сохранить; состояние визарда уже сброшено
    Subscribed(Subscription),
    /// Анкета заполнена; состояние визарда уже сброшено
    Submitted { answers: Vec<AnswerField>, photos: Vec<String> },
    /// Выход в главное меню
    Exit,
}

pub struct WizardManager<'a> {
    flow: &'a Flow,
    store: &'a dyn ListingStore,
    rates: &'a dyn RateSource,
    transport: &'a dyn ChatTransport,
}

impl<'a> WizardManager<'a> {
    pub fn new(
        flow: &'a Flow,
        store: &'a dyn ListingStore,
        rates: &'a dyn RateSource,
        transport: &'a dyn ChatTransport,
    ) -> Self {
        Self {
            flow,
            store,
            rates,
            transport,
        }
    }

    /// Начинает поток с первого шага
    pub async fn start(&self, chat_id: i64, session: &mut WizardSession, anchor: Option<i32>) -> Result<Outcome> {
        let is_subscription_mode = session.state.is_subscription_mode;
        session.state = ConversationState::new(is_subscription_mode);
        session.state.fit(self.flow.steps.len());
        let chain = Chain::new(self.flow, self.store, self.rates);
        self.render(&chain, chat_id, session, anchor).await?;
        Ok(Outcome::Rendered)
    }

    pub async fn handle(
        &self,
        chat_id: i64,
        session: &mut WizardSession,
        action: Action,
        anchor: Option<i32>,
    ) -> Result<Outcome> {
        let mut chain = Chain::new(self.flow, self.store, self.rates);
        if chain.is_empty() {
            return Ok(Outcome::Exit);
        }
        session.state.fit(chain.len());
        debug!(
            "Wizard {:?}: {:?} at step {}",
            self.flow.kind, action, session.state.step_index
        );

        if let Some(offset) = session.state.result_page_offset {
            return self.handle_results(&chain, chat_id, session, action, anchor, offset).await;
        }

        let last = chain.len() - 1;
        match action {
            Action::MainMenu => {
                session.state.reset();
                Ok(Outcome::Exit)
            }
            Action::Back if session.state.step_index == 0 => Ok(Outcome::Exit),
            Action::Back => {
                let index = session.state.step_index;
                session.state.set_slot(index, None);
                session.state.step_index = index - 1;
                chain.invalidate_from(index);
                self.render(&chain, chat_id, session, anchor).await?;
                Ok(Outcome::Rendered)
            }
            // Устаревшая кнопка «вперёд» при невалидном ответе
            Action::Next if !chain.step(session.state.step_index).allow_next(session.state.slot(session.state.step_index)) => {
                Ok(Outcome::Ignored)
            }
            Action::Next if session.state.step_index < last => {
                session.state.step_index += 1;
                self.render(&chain, chat_id, session, anchor).await?;
                Ok(Outcome::Rendered)
            }
            Action::Next => self.finish(&chain, session).await,
            Action::Subscribe if session.state.step_index == last && self.flow.kind.is_search() => {
                self.subscribe(&chain, session).await
            }
            Action::ShowMore | Action::Subscribe => Ok(Outcome::Ignored),
            Action::Noop => {
                self.render(&chain, chat_id, session, anchor).await?;
                Ok(Outcome::Rendered)
            }
            action => {
                let index = session.state.step_index;
                let items = chain.items(&session.state, index).await?.to_vec();
                let slot = chain.step(index).apply(session.state.slot(index), &action, &items);
                session.state.set_slot(index, Some(slot));
                chain.invalidate_from(index);
                self.render(&chain, chat_id, session, anchor).await?;
                Ok(Outcome::Rendered)
            }
        }
    }

    /// Экран результатов: «ещё», подписка, возврат к последнему шагу
    async fn handle_results(
        &self,
        chain: &Chain<'_>,
        chat_id: i64,
        session: &mut WizardSession,
        action: Action,
        anchor: Option<i32>,
        offset: usize,
    ) -> Result<Outcome> {
        match action {
            Action::ShowMore => {
                let offset = offset + crate::pager::PAGE_SIZE;
                session.state.result_page_offset = Some(offset);
                let predicate = chain.query(&session.state).await?;
                Ok(Outcome::ShowResults { predicate, offset })
            }
            Action::Subscribe => self.subscribe(chain, session).await,
            Action::Back => {
                session.state.result_page_offset = None;
                self.render(chain, chat_id, session, anchor).await?;
                Ok(Outcome::Rendered)
            }
            Action::MainMenu => {
                session.state.reset();
                Ok(Outcome::Exit)
            }
            _ => Ok(Outcome::Ignored),
        }
    }

    async fn finish(&self, chain: &Chain<'_>, session: &mut WizardSession) -> Result<Outcome> {
        match self.flow.kind {
            FlowKind::AdSubmission => {
                let (answers, photos) = chain.answers(&session.state);
                session.state.reset();
                info!("Ad submission completed with {} answers", answers.len());
                Ok(Outcome::Submitted { answers, photos })
            }
            _ if session.state.is_subscription_mode => self.subscribe(chain, session).await,
            _ => {
                let predicate = chain.query(&session.state).await?;
                session.state.result_page_offset = Some(0);
                Ok(Outcome::ShowResults { predicate, offset: 0 })
            }
        }
    }

    async fn subscribe(&self, chain: &Chain<'_>, session: &mut WizardSession) -> Result<Outcome> {
        let subscription = self.subscription(chain, &session.state).await?;
        session.state.reset();
        Ok(Outcome::Subscribed(subscription))
    }

    /// Итоговый запрос и текст выбранных фильтров
    pub async fn subscription(&self, chain: &Chain<'_>, state: &ConversationState) -> Result<Subscription> {
        let predicate = chain.query(state).await?;
        let summary = chain.summary(state, chain.len().saturating_sub(1), None);
        Ok(Subscription { predicate, summary })
    }

    /// Перерисовывает активный шаг. Повторная отрисовка без изменений к API не обращается.
    async fn render(
        &self,
        chain: &Chain<'_>,
        chat_id: i64,
        session: &mut WizardSession,
        anchor: Option<i32>,
    ) -> Result<()> {
        let state = &session.state;
        let index = state.step_index;
        let step = chain.step(index);
        let slot = state.slot(index);

        let items = chain.items(state, index).await?;
        let mut keyboard = step.keyboard(slot, items);
        let next_label = if index + 1 == chain.len() {
            Some(self.flow.finish_label(state.is_subscription_mode))
        } else {
            step.next_label(slot)
        };
        keyboard.push(navigation_row(step.back_button(slot), next_label));
        let text = chain.summary(state, index, Some(index));

        render(self.transport, chat_id, &mut session.last_message, anchor, &text, keyboard).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::{Currency, FixedRates, RateSnapshot};
    use crate::query::Column;
    use crate::store::{Listing, ListingKind, MemoryStore};
    use crate::transport::RecordingTransport;
    use crate::wizard::filters::{ColumnStep, RangeMode, RangeStep, RoomsStep};
    use crate::wizard::flows;
    use crate::wizard::state::{RangeState, SelectState, StepState};
    use crate::wizard::step::StepKind;

    fn listing(district: &str, rooms: i64, price: f64, currency: Currency) -> Listing {
        Listing {
            id: 0,
            kind: ListingKind::Apartment,
            district: district.to_string(),
            street: None,
            residential_complex: None,
            rooms,
            rent_price: price,
            currency,
            living_area: None,
            territory_area: None,
            pets: false,
            kids: false,
            conditioner: false,
            furniture: false,
            latitude: None,
            longitude: None,
            link: "https://t.me/c/1/10".to_string(),
            media_group_size: 1,
            caption: None,
            created_at: chrono::Utc::now(),
        }
    }

    async fn fixtures() -> (MemoryStore, FixedRates, RecordingTransport) {
        let store = MemoryStore::with_listings(vec![
            listing("Сихівський", 1, 9000.0, Currency::Uah),
            listing("Франківський", 2, 15000.0, Currency::Uah),
            listing("Личаківський", 3, 400.0, Currency::Usd),
            Listing {
                kind: ListingKind::House,
                living_area: Some(120.0),
                ..listing("Брюховичі", 5, 30000.0, Currency::Uah)
            },
        ])
        .await;
        (store, FixedRates(RateSnapshot::new(40.0, 44.0)), RecordingTransport::new())
    }

    #[tokio::test]
    async fn back_at_first_step_exits_without_touching_state() {
        let (store, rates, transport) = fixtures().await;
        let flow = flows::apartments();
        let manager = WizardManager::new(&flow, &store, &rates, &transport);
        let mut session = WizardSession::new(false);
        manager.start(1, &mut session, None).await.unwrap();
        let before = session.clone();

        let outcome = manager.handle(1, &mut session, Action::Back, Some(101)).await.unwrap();

        assert_eq!(outcome, Outcome::Exit);
        assert_eq!(session, before);
    }

    #[tokio::test]
    async fn unchanged_state_is_rendered_once() {
        let (store, rates, transport) = fixtures().await;
        let flow = flows::apartments();
        let manager = WizardManager::new(&flow, &store, &rates, &transport);
        let mut session = WizardSession::new(false);
        manager.start(1, &mut session, None).await.unwrap();
        let anchor = session.last_message.as_ref().map(|m| m.message_id);

        manager.handle(1, &mut session, Action::Choose("d".to_string()), anchor).await.unwrap();
        manager.handle(1, &mut session, Action::Noop, anchor).await.unwrap();
        manager.handle(1, &mut session, Action::Noop, anchor).await.unwrap();

        assert_eq!(transport.edit_count().await, 1);
        assert_eq!(transport.messages_to(1).await.len(), 1);
    }

    #[tokio::test]
    async fn back_clears_the_step_being_left() {
        let (store, rates, transport) = fixtures().await;
        let flow = flows::houses();
        let manager = WizardManager::new(&flow, &store, &rates, &transport);
        let mut session = WizardSession::new(false);
        manager.start(1, &mut session, None).await.unwrap();

        manager.handle(1, &mut session, Action::Next, None).await.unwrap();
        manager.handle(1, &mut session, Action::SelectItem(0), None).await.unwrap();
        assert!(session.state.slot(1).is_some());

        manager.handle(1, &mut session, Action::Back, None).await.unwrap();
        assert_eq!(session.state.step_index, 0);
        assert!(session.state.slot(1).is_none());
    }

    #[tokio::test]
    async fn finishing_search_shows_first_page() {
        let (store, rates, transport) = fixtures().await;
        let flow = flows::houses();
        let manager = WizardManager::new(&flow, &store, &rates, &transport);
        let mut session = WizardSession::new(false);
        manager.start(1, &mut session, None).await.unwrap();
        for _ in 0..flow.steps.len() - 1 {
            manager.handle(1, &mut session, Action::Next, None).await.unwrap();
        }

        let outcome = manager.handle(1, &mut session, Action::Next, None).await.unwrap();
        assert_eq!(
            outcome,
            Outcome::ShowResults {
                predicate: flow.base.clone(),
                offset: 0
            }
        );

        let more = manager.handle(1, &mut session, Action::ShowMore, None).await.unwrap();
        assert!(matches!(more, Outcome::ShowResults { offset: 3, .. }));
        assert_eq!(session.state.step_index, flow.steps.len() - 1);

        // Первый «назад» только сворачивает результаты
        manager.handle(1, &mut session, Action::Back, None).await.unwrap();
        assert_eq!(session.state.result_page_offset, None);
        assert_eq!(session.state.step_index, flow.steps.len() - 1);
    }

    #[tokio::test]
    async fn subscription_matches_fresh_replay() {
        let (store, rates, transport) = fixtures().await;
        let flow = flows::apartments();
        let manager = WizardManager::new(&flow, &store, &rates, &transport);

        let script = vec![
            Action::Choose("d".to_string()),
            Action::SelectItem(0),
            Action::Next,
            Action::Next,
            Action::SelectItem(1),
            Action::Next,
            Action::FreeText("15000".to_string()),
            Action::Next,
            Action::Next,
        ];

        let mut session = WizardSession::new(true);
        manager.start(1, &mut session, None).await.unwrap();
        for action in script.clone() {
            manager.handle(1, &mut session, action, None).await.unwrap();
        }
        let replayed = session.state.clone();

        let outcome = manager.handle(1, &mut session, Action::Next, None).await.unwrap();
        let subscription = match outcome {
            Outcome::Subscribed(s) => s,
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(session.state, ConversationState::default());

        let fresh = Chain::new(&flow, &store, &rates);
        let live = fresh.query(&replayed).await.unwrap();
        assert_eq!(
            serde_json::to_string(&live).unwrap(),
            serde_json::to_string(&subscription.predicate).unwrap()
        );
        assert!(subscription.summary.starts_with(flows::FILTERS_HEADER));
    }

    #[tokio::test]
    async fn price_ceiling_covers_every_currency() {
        let (store, rates, transport) = fixtures().await;
        let flow = flows::apartments();
        let manager = WizardManager::new(&flow, &store, &rates, &transport);
        let mut session = WizardSession::new(false);
        manager.start(1, &mut session, None).await.unwrap();
        for action in [Action::Next, Action::Next, Action::Next] {
            manager.handle(1, &mut session, action, None).await.unwrap();
        }
        manager.handle(1, &mut session, Action::FreeText("15000".to_string()), None).await.unwrap();
        manager.handle(1, &mut session, Action::FreeText("500".to_string()), None).await.unwrap();

        let chain = Chain::new(&flow, &store, &rates);
        let query = chain.query(&session.state).await.unwrap();
        let matched: Vec<Listing> = store
            .listings()
            .await
            .into_iter()
            .filter(|l| query.matches(l))
            .collect();
        // 9000 и 15000 грн входят в [7500, 16500], 400$ = 16000 грн тоже
        assert_eq!(matched.len(), 3);
        assert!(!query.matches(&listing("Сихівський", 1, 6000.0, Currency::Uah)));
        assert!(query.matches(&listing("Сихівський", 1, 370.0, Currency::Eur)));
    }

    /// Шаг поиска и ответ на него: районы, комнаты, потолок цены
    fn step_with_answer(i: usize) -> (StepKind, StepState) {
        let selected = |labels: &[&str]| SelectState {
            selected: labels.iter().map(|l| (l.to_string(), true)).collect(),
            ..SelectState::default()
        };
        match i {
            0 => (
                StepKind::Column(ColumnStep::new("Райони", Column::District)),
                StepState::Select(selected(&["Сихівський", "Личаківський"])),
            ),
            1 => (
                StepKind::Rooms(RoomsStep::new("Кількість кімнат")),
                StepState::Select(selected(&["1", "3"])),
            ),
            _ => (
                StepKind::NumericRange(RangeStep {
                    title: "Ціна",
                    column: Column::RentPrice,
                    mode: RangeMode::Ceiling,
                }),
                StepState::Range(RangeState {
                    from: None,
                    to: Some(15000.0),
                }),
            ),
        }
    }

    #[tokio::test]
    async fn filter_order_does_not_change_matches() {
        let (store, rates, _) = fixtures().await;
        for extra in [
            listing("Сихівський", 3, 12000.0, Currency::Uah),
            listing("Личаківський", 1, 5000.0, Currency::Uah),
            listing("Франківський", 1, 10000.0, Currency::Uah),
            listing("Сихівський", 2, 10000.0, Currency::Uah),
        ] {
            store.insert_listing(&extra).await.unwrap();
        }
        let listings = store.listings().await;

        let mut matched_by_order = Vec::new();
        for order in [[0, 1, 2], [2, 1, 0], [1, 0, 2], [2, 0, 1]] {
            let mut state = ConversationState::new(false);
            let mut steps = Vec::new();
            for (index, step) in order.into_iter().enumerate() {
                let (kind, answer) = step_with_answer(step);
                steps.push(kind);
                state.set_slot(index, Some(answer));
            }
            let flow = Flow {
                kind: FlowKind::Apartments,
                header: flows::FILTERS_HEADER,
                base: flows::apartments().base,
                steps,
            };
            let chain = Chain::new(&flow, &store, &rates);
            let query = chain.query(&state).await.unwrap();
            let matched: Vec<bool> = listings.iter().map(|l| query.matches(l)).collect();
            matched_by_order.push(matched);
        }

        // Сихівський 1к 9000, Личаківський 3к 400$, Сихівський 3к 12000
        assert_eq!(matched_by_order[0].iter().filter(|m| **m).count(), 3);
        assert!(matched_by_order.iter().all(|m| *m == matched_by_order[0]));
    }

    #[tokio::test]
    async fn next_is_ignored_until_answer_is_valid() {
        let (store, rates, transport) = fixtures().await;
        let flow = flows::ad_submission();
        let manager = WizardManager::new(&flow, &store, &rates, &transport);
        let mut session = WizardSession::new(false);
        manager.start(7, &mut session, None).await.unwrap();

        let outcome = manager.handle(7, &mut session, Action::Next, None).await.unwrap();
        assert_eq!(outcome, Outcome::Ignored);
        assert_eq!(session.state.step_index, 0);

        manager.handle(7, &mut session, Action::SelectItem(1), None).await.unwrap();
        manager.handle(7, &mut session, Action::Next, None).await.unwrap();
        // Адрес пустой: дальше не пускает
        manager.handle(7, &mut session, Action::Next, None).await.unwrap();
        assert_eq!(session.state.step_index, 1);
    }

    #[tokio::test]
    async fn ad_submission_collects_answers() {
        let (store, rates, transport) = fixtures().await;
        let flow = flows::ad_submission();
        let manager = WizardManager::new(&flow, &store, &rates, &transport);
        let mut session = WizardSession::new(false);
        manager.start(7, &mut session, None).await.unwrap();

        let script = vec![
            Action::SelectItem(0),
            Action::Next,
            Action::FreeText("Шевченка 1".to_string()),
            Action::Next,
            Action::SelectItem(0),
            Action::Next,
            Action::FreeText("2".to_string()),
            Action::Next,
            Action::FreeText("50".to_string()),
            Action::Next,
            Action::FreeText("3/9".to_string()),
            Action::Next,
            Action::FreeText("15000 грн".to_string()),
            Action::Next,
            Action::Next,
            Action::Choose("hp".to_string()),
            Action::Photo("file-1".to_string()),
            Action::Next,
            Action::FreeText("Олена".to_string()),
            Action::Next,
            Action::FreeText("+380671234567".to_string()),
            Action::Next,
            Action::Next,
        ];
        let mut outcome = Outcome::Ignored;
        for action in script {
            outcome = manager.handle(7, &mut session, action, None).await.unwrap();
        }

        match outcome {
            Outcome::Submitted { answers, photos } => {
                assert_eq!(answers.len(), 11);
                assert_eq!(answers[0].value, "Власник");
                assert_eq!(answers[4].value, "50 м2");
                assert_eq!(answers[7].value, "Не надано");
                assert_eq!(photos, vec!["file-1".to_string()]);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
