//! Закрытый набор видов шагов и цепочка, которая сворачивает их запросы слева направо.

use std::sync::OnceLock;

use anyhow::Result;
use tracing::{debug, warn};

use super::action::Action;
use super::filters::{self, BucketStep, ColumnStep, GeoStep, RangeStep, ReviewStep, RoomsStep, StagedStep};
use super::flows::Flow;
use super::keyboard::{button, BACK_TEXT, NEXT_QUESTION_TEXT, NEXT_TEXT, SKIP_TEXT};
use super::questions::{ChoiceQuestion, PhotoQuestion, TextChoiceQuestion, TextQuestion};
use super::state::{ConversationState, StepState};
use crate::currency::{RateSnapshot, RateSource};
use crate::query::{Predicate, Value};
use crate::store::{AnswerField, ListingStore};
use crate::transport::{Button, Keyboard};

#[derive(Debug, Clone)]
pub enum StepKind {
    Column(ColumnStep),
    Rooms(RoomsStep),
    Buckets(BucketStep),
    NumericRange(RangeStep),
    Staged(StagedStep),
    Geo(GeoStep),
    Text(TextQuestion),
    Choice(ChoiceQuestion),
    TextChoice(TextChoiceQuestion),
    Photos(PhotoQuestion),
    Review(ReviewStep),
}

impl StepKind {
    /// Кандидаты шага под запросом предыдущих шагов
    pub async fn load_items(&self, store: &dyn ListingStore, upstream: &Predicate) -> Result<Vec<Value>> {
        let items = match self {
            StepKind::Column(s) => filters::distinct_sorted(store, s.column, upstream).await?,
            StepKind::Geo(_) => filters::distinct_sorted(store, crate::query::Column::District, upstream).await?,
            StepKind::Rooms(s) => s.load_items(store, upstream).await?,
            StepKind::Buckets(s) => s.items(),
            _ => Vec::new(),
        };
        Ok(items)
    }

    pub fn apply(&self, slot: Option<&StepState>, action: &Action, items: &[Value]) -> StepState {
        match self {
            StepKind::Column(s) => s.apply(slot, action, items),
            StepKind::Rooms(s) => s.apply(slot, action, items),
            StepKind::Buckets(s) => s.apply(slot, action, items),
            StepKind::NumericRange(s) => s.apply(slot, action),
            StepKind::Staged(s) => s.apply(slot, action),
            StepKind::Geo(s) => s.apply(slot, action, items),
            StepKind::Text(q) => q.apply(slot, action),
            StepKind::Choice(q) => q.apply(slot, action),
            StepKind::TextChoice(q) => q.apply(slot, action),
            StepKind::Photos(q) => q.apply(slot, action),
            StepKind::Review(_) => StepState::Review,
        }
    }

    pub fn keyboard(&self, slot: Option<&StepState>, items: &[Value]) -> Keyboard {
        match self {
            StepKind::Column(s) => s.keyboard(slot, items),
            StepKind::Rooms(s) => s.keyboard(slot, items),
            StepKind::Buckets(s) => s.keyboard(slot, items),
            StepKind::NumericRange(s) => s.keyboard(slot),
            StepKind::Staged(s) => s.keyboard(slot),
            StepKind::Geo(s) => s.keyboard(slot, items),
            StepKind::Choice(q) => q.keyboard(slot),
            StepKind::TextChoice(q) => q.keyboard(slot),
            StepKind::Photos(q) => q.keyboard(slot),
            StepKind::Text(_) | StepKind::Review(_) => Vec::new(),
        }
    }

    pub fn back_button(&self, slot: Option<&StepState>) -> Button {
        match self {
            StepKind::Photos(q) => q.back_button(slot),
            _ => button(BACK_TEXT, &Action::Back),
        }
    }

    pub fn text(&self, slot: Option<&StepState>, active: bool) -> String {
        match self {
            StepKind::Column(s) => s.text(slot),
            StepKind::Rooms(s) => s.text(slot),
            StepKind::Buckets(s) => s.text(slot),
            StepKind::NumericRange(s) => s.text(slot, active),
            StepKind::Staged(s) => s.text(slot),
            StepKind::Geo(s) => s.text(slot, active),
            StepKind::Text(q) => q.text(slot, active),
            StepKind::Choice(q) => q.text(slot, active),
            StepKind::TextChoice(q) => q.text(slot, active),
            StepKind::Photos(q) => q.text(slot),
            StepKind::Review(r) => r.text(active),
        }
    }

    /// Курсы нужны только заполненному шагу цены
    pub fn needs_rates(&self, slot: Option<&StepState>) -> bool {
        matches!(self, StepKind::NumericRange(s) if s.has_values(slot))
    }

    /// Сужает запрос предыдущих шагов. Вопросы анкеты и итоговый шаг его не меняют.
    pub fn query(&self, slot: Option<&StepState>, items: &[Value], upstream: Predicate, rates: &RateSnapshot) -> Predicate {
        match self {
            StepKind::Column(s) => s.query(slot, items, upstream),
            StepKind::Rooms(s) => s.query(slot, items, upstream),
            StepKind::Buckets(s) => s.query(slot, upstream),
            StepKind::NumericRange(s) => s.query(slot, upstream, rates),
            StepKind::Staged(s) => s.query(slot, upstream),
            StepKind::Geo(s) => s.query(slot, items, upstream),
            _ => upstream,
        }
    }

    pub fn allow_next(&self, slot: Option<&StepState>) -> bool {
        match self {
            StepKind::NumericRange(s) => s.allow_next(slot),
            StepKind::Staged(s) => s.allow_next(slot),
            StepKind::Text(q) => q.allow_next(slot),
            StepKind::Choice(q) => q.allow_next(slot),
            StepKind::TextChoice(q) => q.has_values(slot),
            StepKind::Photos(q) => q.has_values(slot),
            _ => true,
        }
    }

    pub fn has_values(&self, slot: Option<&StepState>) -> bool {
        match self {
            StepKind::Column(s) => s.has_values(slot),
            StepKind::Rooms(s) => s.has_values(slot),
            StepKind::Buckets(s) => s.has_values(slot),
            StepKind::NumericRange(s) => s.has_values(slot),
            StepKind::Staged(s) => s.has_values(slot),
            StepKind::Geo(s) => s.has_values(slot),
            StepKind::Text(q) => q.allow_next(slot),
            StepKind::Choice(q) => q.has_values(slot),
            StepKind::TextChoice(q) => q.has_values(slot),
            StepKind::Photos(q) => q.has_values(slot),
            StepKind::Review(_) => true,
        }
    }

    /// Подпись кнопки «вперёд» или `None`, если переход пока запрещён
    pub fn next_label(&self, slot: Option<&StepState>) -> Option<&'static str> {
        if !self.allow_next(slot) {
            return None;
        }
        match self {
            StepKind::Choice(q) => q.next_label(slot),
            StepKind::Text(_) | StepKind::TextChoice(_) | StepKind::Photos(_) => Some(NEXT_QUESTION_TEXT),
            _ if self.has_values(slot) => Some(NEXT_TEXT),
            _ => Some(SKIP_TEXT),
        }
    }

    /// Ответ для анкеты; у шагов поиска ответа нет
    pub fn answer(&self, slot: Option<&StepState>) -> Option<AnswerField> {
        let (name, value) = match self {
            StepKind::Text(q) => (q.name, q.answer(slot)),
            StepKind::Choice(q) => (q.name, q.answer(slot)),
            StepKind::TextChoice(q) => (q.name, q.answer(slot)),
            StepKind::Photos(q) => (q.name, q.answer(slot)),
            _ => return None,
        };
        Some(AnswerField {
            name: name.to_string(),
            value,
        })
    }

    pub fn photos(&self, slot: Option<&StepState>) -> Vec<String> {
        match self {
            StepKind::Photos(q) => q.photos(slot),
            _ => Vec::new(),
        }
    }
}

/// Шаги потока плюс кеш на время одного апдейта.
///
/// `composed[i]` это запрос после шага `i`, `items[i]` это кандидаты шага `i`. Шаг видит только запрос
/// предыдущего шага, поэтому после изменения среза `i` достаточно сбросить кеш начиная с `i`.
pub struct Chain<'a> {
    flow: &'a Flow,
    store: &'a dyn ListingStore,
    rates: &'a dyn RateSource,
    items: Vec<OnceLock<Vec<Value>>>,
    composed: Vec<OnceLock<Predicate>>,
    snapshot: OnceLock<RateSnapshot>,
}

impl<'a> Chain<'a> {
    pub fn new(flow: &'a Flow, store: &'a dyn ListingStore, rates: &'a dyn RateSource) -> Self {
        let len = flow.steps.len();
        Self {
            flow,
            store,
            rates,
            items: (0..len).map(|_| OnceLock::new()).collect(),
            composed: (0..len).map(|_| OnceLock::new()).collect(),
            snapshot: OnceLock::new(),
        }
    }

    pub fn flow(&self) -> &'a Flow {
        self.flow
    }

    pub fn len(&self) -> usize {
        self.flow.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flow.steps.is_empty()
    }

    pub fn step(&self, index: usize) -> &'a StepKind {
        &self.flow.steps[index]
    }

    pub fn invalidate_from(&mut self, index: usize) {
        for i in index..self.len() {
            // Кандидаты шага зависят только от предыдущих шагов
            if i > index {
                self.items[i] = OnceLock::new();
            }
            self.composed[i] = OnceLock::new();
        }
    }

    async fn rates(&self) -> &RateSnapshot {
        if let Some(snapshot) = self.snapshot.get() {
            return snapshot;
        }
        let snapshot = match self.rates.snapshot().await {
            Ok(s) => s,
            Err(e) => {
                warn!("Exchange rates unavailable, comparing prices in UAH only: {}", e);
                RateSnapshot::uah_only()
            }
        };
        self.snapshot.get_or_init(|| snapshot)
    }

    async fn items_under(&self, index: usize, upstream: &Predicate) -> Result<&[Value]> {
        if let Some(items) = self.items[index].get() {
            return Ok(items);
        }
        let loaded = self.step(index).load_items(self.store, upstream).await?;
        Ok(self.items[index].get_or_init(|| loaded))
    }

    /// Запрос после шага `index`: левая свёртка от базового предиката потока
    pub async fn composed(&self, state: &ConversationState, index: usize) -> Result<Predicate> {
        let mut acc = self.flow.base.clone();
        if self.is_empty() {
            return Ok(acc);
        }
        for i in 0..=index.min(self.len() - 1) {
            if let Some(done) = self.composed[i].get() {
                acc = done.clone();
                continue;
            }
            let step = self.step(i);
            let items = self.items_under(i, &acc).await?;
            let next = if step.needs_rates(state.slot(i)) {
                let rates = self.rates().await;
                step.query(state.slot(i), items, acc, rates)
            } else {
                step.query(state.slot(i), items, acc, &RateSnapshot::uah_only())
            };
            debug!("Step {} composed query: {:?}", i, next);
            acc = self.composed[i].get_or_init(|| next).clone();
        }
        Ok(acc)
    }

    pub async fn upstream(&self, state: &ConversationState, index: usize) -> Result<Predicate> {
        if index == 0 {
            Ok(self.flow.base.clone())
        } else {
            self.composed(state, index - 1).await
        }
    }

    pub async fn items(&self, state: &ConversationState, index: usize) -> Result<&[Value]> {
        if let Some(items) = self.items[index].get() {
            return Ok(items);
        }
        let upstream = self.upstream(state, index).await?;
        self.items_under(index, &upstream).await
    }

    /// Итоговый запрос всей цепочки
    pub async fn query(&self, state: &ConversationState) -> Result<Predicate> {
        self.composed(state, self.len().saturating_sub(1)).await
    }

    /// Текст выбранных фильтров/ответов до шага `upto` включительно
    pub fn summary(&self, state: &ConversationState, upto: usize, active: Option<usize>) -> String {
        let mut lines = vec![self.flow.header.to_string()];
        for i in 0..=upto.min(self.len().saturating_sub(1)) {
            let line = self.step(i).text(state.slot(i), active == Some(i));
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines.join("\n")
    }

    pub fn answers(&self, state: &ConversationState) -> (Vec<AnswerField>, Vec<String>) {
        let mut answers = Vec::new();
        let mut photos = Vec::new();
        for (i, step) in self.flow.steps.iter().enumerate() {
            if let Some(answer) = step.answer(state.slot(i)) {
                answers.push(answer);
            }
            photos.extend(step.photos(state.slot(i)));
        }
        (answers, photos)
    }
}
