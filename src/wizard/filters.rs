//! Шаги поиска: каждый хранит свой срез состояния, рисует клавиатуру и сужает предикат предыдущего шага.

use super::action::Action;
use super::keyboard::{self, button, mark, paged_items, rows, select_all_row};
use super::state::{GeoMode, GeoPoint, GeoState, RangeState, SelectState, StagedState, StepState};
use crate::currency::{Currency, RateSnapshot};
use crate::error::StoreError;
use crate::query::{Column, Predicate, Value};
use crate::store::ListingStore;
use crate::transport::Keyboard;
use crate::utils::escape_html;

pub const NOT_SPECIFIED: &str = "не вказано";
pub const ALL_VALUES: &str = "всі";
pub const RESET_TOKEN: &str = "reset";
const RESET_TEXT: &str = "Скинути ✖️";
const CLOSE_GROUP_TEXT: &str = "Далі";

/// Уникальные непустые значения колонки под фильтром, в стабильном порядке
pub async fn distinct_sorted(
    store: &dyn ListingStore,
    column: Column,
    upstream: &Predicate,
) -> Result<Vec<Value>, StoreError> {
    let mut values: Vec<Value> = store
        .distinct_values(column, upstream)
        .await?
        .into_iter()
        .filter(|v| !v.is_blank())
        .collect();
    values.sort_by(|a, b| a.display_cmp(b));
    values.dedup_by(|a, b| a.to_string() == b.to_string());
    Ok(values)
}

pub fn labels(items: &[Value]) -> Vec<String> {
    items.iter().map(Value::to_string).collect()
}

pub(crate) fn select_state(slot: Option<&StepState>) -> SelectState {
    match slot {
        Some(StepState::Select(s)) => s.clone(),
        _ => SelectState::default(),
    }
}

/// Выбор, «выбрать все» и листание для списка значений
pub(crate) fn apply_select(state: &mut SelectState, action: &Action, labels: &[String]) {
    match action {
        Action::SelectAll(on) => {
            state.select_all = *on;
            state.selected.clear();
        }
        Action::SelectItem(i) => {
            let Some(label) = labels.get(*i) else {
                return;
            };
            if state.select_all {
                // Снятие одного элемента из «всех» фиксирует текущий список без него
                state.select_all = false;
                state.selected = labels
                    .iter()
                    .filter(|l| *l != label)
                    .map(|l| (l.clone(), true))
                    .collect();
            } else {
                state.toggle(label);
            }
        }
        Action::Page(p) => {
            if *p < keyboard::page_count(labels.len()) {
                state.page = *p;
            }
        }
        _ => {}
    }
}

/// Пустой выбор и «выбрать все» не ограничивают запрос
pub(crate) fn select_query(state: &SelectState, column: Column, items: &[Value], upstream: Predicate) -> Predicate {
    if state.select_all {
        return upstream;
    }
    let values: Vec<Value> = items
        .iter()
        .filter(|v| state.selected.get(&v.to_string()).copied().unwrap_or(false))
        .cloned()
        .collect();
    if values.is_empty() {
        return upstream;
    }
    upstream.and(Predicate::is_in(column, values))
}

pub(crate) fn select_has_values(state: &SelectState) -> bool {
    state.select_all || state.selected_keys().next().is_some()
}

fn select_text(title: &str, state: &SelectState) -> String {
    if state.select_all {
        return format!("{} {}: {}", keyboard::CHECK_MARK, title, ALL_VALUES);
    }
    let chosen: Vec<String> = state.selected_keys().map(escape_html).collect();
    if chosen.is_empty() {
        format!("{}: {}", title, NOT_SPECIFIED)
    } else {
        format!("{} {}: {}", keyboard::CHECK_MARK, title, chosen.join(", "))
    }
}

/// Выбор из уникальных значений колонки (районы, ЖК)
#[derive(Debug, Clone)]
pub struct ColumnStep {
    pub title: &'static str,
    pub column: Column,
    pub has_select_all: bool,
}

impl ColumnStep {
    pub fn new(title: &'static str, column: Column) -> Self {
        Self {
            title,
            column,
            has_select_all: true,
        }
    }

    pub fn apply(&self, slot: Option<&StepState>, action: &Action, items: &[Value]) -> StepState {
        let mut state = select_state(slot);
        if matches!(action, Action::SelectAll(_)) && !self.has_select_all {
            return StepState::Select(state);
        }
        apply_select(&mut state, action, &labels(items));
        StepState::Select(state)
    }

    pub fn keyboard(&self, slot: Option<&StepState>, items: &[Value]) -> Keyboard {
        let state = select_state(slot);
        let mut kb = paged_items(&labels(items), state.page, |l| state.is_selected(l));
        if self.has_select_all && !items.is_empty() {
            kb.push(select_all_row(state.select_all));
        }
        kb
    }

    pub fn text(&self, slot: Option<&StepState>) -> String {
        select_text(self.title, &select_state(slot))
    }

    pub fn query(&self, slot: Option<&StepState>, items: &[Value], upstream: Predicate) -> Predicate {
        select_query(&select_state(slot), self.column, items, upstream)
    }

    pub fn has_values(&self, slot: Option<&StepState>) -> bool {
        select_has_values(&select_state(slot))
    }
}

/// Количество комнат: 1, 2, 3 и «4+» для всего, что больше
#[derive(Debug, Clone)]
pub struct RoomsStep {
    pub title: &'static str,
    pub max_rooms: i64,
}

impl RoomsStep {
    pub fn new(title: &'static str) -> Self {
        Self { title, max_rooms: 4 }
    }

    fn many_label(&self) -> String {
        format!("{}+", self.max_rooms)
    }

    pub async fn load_items(&self, store: &dyn ListingStore, upstream: &Predicate) -> Result<Vec<Value>, StoreError> {
        let counts: Vec<i64> = store
            .distinct_values(Column::Rooms, upstream)
            .await?
            .iter()
            .filter_map(Value::as_f64)
            .map(|v| v as i64)
            .collect();

        let mut items: Vec<Value> = (1..self.max_rooms)
            .filter(|r| counts.contains(r))
            .map(|r| Value::Text(r.to_string()))
            .collect();
        if counts.iter().any(|r| *r >= self.max_rooms) {
            items.push(Value::Text(self.many_label()));
        }
        Ok(items)
    }

    pub fn apply(&self, slot: Option<&StepState>, action: &Action, items: &[Value]) -> StepState {
        let mut state = select_state(slot);
        if !matches!(action, Action::SelectAll(_)) {
            apply_select(&mut state, action, &labels(items));
        }
        StepState::Select(state)
    }

    pub fn keyboard(&self, slot: Option<&StepState>, items: &[Value]) -> Keyboard {
        let state = select_state(slot);
        paged_items(&labels(items), 0, |l| state.is_selected(l))
    }

    pub fn text(&self, slot: Option<&StepState>) -> String {
        select_text(self.title, &select_state(slot))
    }

    pub fn query(&self, slot: Option<&StepState>, items: &[Value], upstream: Predicate) -> Predicate {
        let state = select_state(slot);
        let chosen: Vec<String> = labels(items)
            .into_iter()
            .filter(|l| state.is_selected(l))
            .collect();

        let exact: Vec<Value> = chosen
            .iter()
            .filter_map(|l| l.parse::<i64>().ok())
            .map(Value::Int)
            .collect();

        let mut parts = Vec::new();
        if !exact.is_empty() {
            parts.push(Predicate::is_in(Column::Rooms, exact));
        }
        if chosen.contains(&self.many_label()) {
            parts.push(Predicate::range(Column::Rooms, Some(self.max_rooms as f64), None));
        }
        upstream.and(Predicate::any(parts))
    }

    pub fn has_values(&self, slot: Option<&StepState>) -> bool {
        select_has_values(&select_state(slot))
    }
}

/// Фиксированные интервалы значения, например площади
#[derive(Debug, Clone)]
pub struct BucketStep {
    pub title: &'static str,
    pub column: Column,
    pub buckets: &'static [(&'static str, f64, Option<f64>)],
}

pub const LIVING_AREA_BUCKETS: &[(&str, f64, Option<f64>)] = &[
    ("< 100м2", 0.0, Some(100.0)),
    ("100-200м2", 100.0, Some(200.0)),
    ("200-300м2", 200.0, Some(300.0)),
    ("> 300м2", 300.0, None),
];

impl BucketStep {
    pub fn items(&self) -> Vec<Value> {
        self.buckets.iter().map(|(label, _, _)| Value::text(*label)).collect()
    }

    pub fn apply(&self, slot: Option<&StepState>, action: &Action, items: &[Value]) -> StepState {
        let mut state = select_state(slot);
        if !matches!(action, Action::SelectAll(_)) {
            apply_select(&mut state, action, &labels(items));
        }
        StepState::Select(state)
    }

    pub fn keyboard(&self, slot: Option<&StepState>, items: &[Value]) -> Keyboard {
        let state = select_state(slot);
        paged_items(&labels(items), 0, |l| state.is_selected(l))
    }

    pub fn text(&self, slot: Option<&StepState>) -> String {
        select_text(self.title, &select_state(slot))
    }

    pub fn query(&self, slot: Option<&StepState>, upstream: Predicate) -> Predicate {
        let state = select_state(slot);
        let parts = self
            .buckets
            .iter()
            .filter(|(label, _, _)| state.is_selected(label))
            .map(|(_, min, max)| Predicate::range(self.column, Some(*min), *max))
            .collect();
        upstream.and(Predicate::any(parts))
    }

    pub fn has_values(&self, slot: Option<&StepState>) -> bool {
        select_has_values(&select_state(slot))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeMode {
    /// Одно число: желаемая цена, ищем в диапазоне [0.5x, 1.1x]
    Ceiling,
    /// Два числа подряд: нижняя и верхняя граница
    Bounds,
}

const CEILING_LOWER: f64 = 0.5;
const CEILING_UPPER: f64 = 1.1;
const MAX_AMOUNT: f64 = 100_000_000.0;

/// Цена в гривнах; запрос сравнивает с ценой объявления в его валюте по текущему курсу
#[derive(Debug, Clone)]
pub struct RangeStep {
    pub title: &'static str,
    pub column: Column,
    pub mode: RangeMode,
}

fn range_state(slot: Option<&StepState>) -> RangeState {
    match slot {
        Some(StepState::Range(r)) => *r,
        _ => RangeState::default(),
    }
}

/// «15000», «15 000», «15000 грн». Всё остальное игнорируется.
pub fn parse_amount(text: &str) -> Option<f64> {
    let digits: String = text
        .trim()
        .trim_end_matches("грн")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let value: f64 = digits.replace(',', ".").parse().ok()?;
    (value.is_finite() && value > 0.0 && value <= MAX_AMOUNT).then_some(value)
}

fn amount(v: f64) -> String {
    format!("{}", v.round() as i64)
}

impl RangeStep {
    pub fn apply(&self, slot: Option<&StepState>, action: &Action) -> StepState {
        let mut state = range_state(slot);
        match action {
            Action::FreeText(text) => {
                if let Some(value) = parse_amount(text) {
                    match self.mode {
                        RangeMode::Ceiling => {
                            if state.to.is_none() {
                                state.to = Some(value);
                            }
                        }
                        RangeMode::Bounds => {
                            if state.from.is_none() {
                                state.from = Some(value);
                            } else if state.to.is_none() {
                                state.to = Some(value);
                            }
                        }
                    }
                }
            }
            Action::Choose(token) if token == RESET_TOKEN => state = RangeState::default(),
            _ => {}
        }
        StepState::Range(state)
    }

    pub fn keyboard(&self, slot: Option<&StepState>) -> Keyboard {
        let state = range_state(slot);
        if state.from.is_some() || state.to.is_some() {
            vec![vec![button(RESET_TEXT, &Action::Choose(RESET_TOKEN.to_string()))]]
        } else {
            Vec::new()
        }
    }

    pub fn text(&self, slot: Option<&StepState>, active: bool) -> String {
        let state = range_state(slot);
        let check = keyboard::CHECK_MARK;
        match (self.mode, state.from, state.to) {
            (RangeMode::Ceiling, _, Some(to)) => format!("{} {}: до {} грн", check, self.title, amount(to)),
            (RangeMode::Ceiling, _, None) if active => {
                format!("{}: введіть бажану ціну оренди в гривнях 👇", self.title)
            }
            (RangeMode::Bounds, Some(from), Some(to)) => {
                format!("{} {}: від {} до {} грн", check, self.title, amount(from), amount(to))
            }
            (RangeMode::Bounds, Some(from), None) if active => {
                format!("{}: від {} грн\nВведіть верхню межу ціни 👇", self.title, amount(from))
            }
            (RangeMode::Bounds, None, _) if active => format!("{}: введіть нижню межу ціни 👇", self.title),
            _ => format!("{}: {}", self.title, NOT_SPECIFIED),
        }
    }

    /// Границы в гривнах, если шаг заполнен
    pub fn bounds(&self, slot: Option<&StepState>) -> Option<(f64, f64)> {
        let state = range_state(slot);
        match self.mode {
            RangeMode::Ceiling => state.to.map(|to| (to * CEILING_LOWER, to * CEILING_UPPER)),
            RangeMode::Bounds => match (state.from, state.to) {
                (Some(a), Some(b)) => Some((a.min(b), a.max(b))),
                _ => None,
            },
        }
    }

    /// OR по валютам: для каждой валюты границы переводятся по курсу
    pub fn query(&self, slot: Option<&StepState>, upstream: Predicate, rates: &RateSnapshot) -> Predicate {
        let Some((low, high)) = self.bounds(slot) else {
            return upstream;
        };
        let parts: Vec<Predicate> = rates
            .iter()
            .filter_map(|(currency, _)| {
                let low = rates.from_uah(low, currency)?;
                let high = rates.from_uah(high, currency)?;
                Some(currency_range(self.column, currency, low, high))
            })
            .collect();
        if parts.is_empty() {
            // Без курсов остаётся только гривна
            return upstream.and(currency_range(self.column, Currency::Uah, low, high));
        }
        upstream.and(Predicate::any(parts))
    }

    pub fn allow_next(&self, slot: Option<&StepState>) -> bool {
        let state = range_state(slot);
        match self.mode {
            RangeMode::Ceiling => true,
            RangeMode::Bounds => state.from.is_some() == state.to.is_some(),
        }
    }

    pub fn has_values(&self, slot: Option<&StepState>) -> bool {
        self.bounds(slot).is_some()
    }
}

fn currency_range(column: Column, currency: Currency, low: f64, high: f64) -> Predicate {
    Predicate::eq(Column::Currency, Value::text(currency.as_str())).and(Predicate::range(column, Some(low), Some(high)))
}

#[derive(Debug, Clone)]
pub struct StagedGroup {
    pub title: &'static str,
    pub options: &'static [(&'static str, Column)],
}

/// Шаг с вложенными страницами: сначала группа, потом её опции
#[derive(Debug, Clone)]
pub struct StagedStep {
    pub title: &'static str,
    pub groups: &'static [StagedGroup],
}

pub const ADDITIONAL_GROUPS: &[StagedGroup] = &[
    StagedGroup {
        title: "Умови проживання",
        options: &[("Можна з тваринами", Column::Pets), ("Можна з дітьми", Column::Kids)],
    },
    StagedGroup {
        title: "Зручності",
        options: &[("Є кондиціонер", Column::Conditioner), ("Є меблі", Column::Furniture)],
    },
];

fn staged_state(slot: Option<&StepState>) -> StagedState {
    match slot {
        Some(StepState::Staged(s)) => s.clone(),
        _ => StagedState::default(),
    }
}

impl StagedStep {
    fn is_on(state: &StagedState, label: &str) -> bool {
        state.selected.get(label).copied().unwrap_or(false)
    }

    pub fn apply(&self, slot: Option<&StepState>, action: &Action) -> StepState {
        let mut state = staged_state(slot);
        match action {
            Action::OpenGroup(g) if *g < self.groups.len() => state.open = Some(*g),
            Action::CloseGroup => state.open = None,
            Action::SelectItem(i) => {
                if let Some((label, _)) = state.open.and_then(|g| self.groups.get(g)).and_then(|g| g.options.get(*i)) {
                    if Self::is_on(&state, label) {
                        state.selected.remove(*label);
                    } else {
                        state.selected.insert(label.to_string(), true);
                    }
                }
            }
            _ => {}
        }
        StepState::Staged(state)
    }

    pub fn keyboard(&self, slot: Option<&StepState>) -> Keyboard {
        let state = staged_state(slot);
        match state.open.and_then(|g| self.groups.get(g)) {
            Some(group) => {
                let mut kb: Keyboard = group
                    .options
                    .iter()
                    .enumerate()
                    .map(|(i, (label, _))| vec![button(mark(label, Self::is_on(&state, label)), &Action::SelectItem(i))])
                    .collect();
                kb.push(vec![button(CLOSE_GROUP_TEXT, &Action::CloseGroup)]);
                kb
            }
            None => {
                let buttons = self
                    .groups
                    .iter()
                    .enumerate()
                    .map(|(i, group)| {
                        let count = group.options.iter().filter(|(l, _)| Self::is_on(&state, l)).count();
                        let title = if count > 0 {
                            format!("{} ({})", group.title, count)
                        } else {
                            group.title.to_string()
                        };
                        button(title, &Action::OpenGroup(i))
                    })
                    .collect();
                rows(buttons, 1)
            }
        }
    }

    fn chosen(&self, state: &StagedState) -> Vec<(&'static str, Column)> {
        self.groups
            .iter()
            .flat_map(|g| g.options.iter())
            .filter(|(label, _)| Self::is_on(state, label))
            .copied()
            .collect()
    }

    pub fn text(&self, slot: Option<&StepState>) -> String {
        let chosen = self.chosen(&staged_state(slot));
        if chosen.is_empty() {
            return format!("{}: {}", self.title, NOT_SPECIFIED);
        }
        let labels: Vec<&str> = chosen.iter().map(|(l, _)| *l).collect();
        format!("{} {}: {}", keyboard::CHECK_MARK, self.title, labels.join(", "))
    }

    pub fn query(&self, slot: Option<&StepState>, upstream: Predicate) -> Predicate {
        self.chosen(&staged_state(slot))
            .into_iter()
            .fold(upstream, |acc, (_, column)| acc.and(Predicate::eq(column, Value::Int(1))))
    }

    /// Пока открыта группа, вперёд не пускаем: сначала «Далі»
    pub fn allow_next(&self, slot: Option<&StepState>) -> bool {
        staged_state(slot).open.is_none()
    }

    pub fn has_values(&self, slot: Option<&StepState>) -> bool {
        !self.chosen(&staged_state(slot)).is_empty()
    }
}

pub const DISTRICTS_TOKEN: &str = "d";
pub const LOCATION_TOKEN: &str = "l";
pub const RADII_M: &[f64] = &[500.0, 1000.0, 2000.0, 5000.0];
const DEFAULT_RADIUS: usize = 1;

/// Райони списком или точка на карте с радиусом. Переключение режима стирает данные другого режима.
#[derive(Debug, Clone)]
pub struct GeoStep {
    pub title: &'static str,
    pub districts_title: &'static str,
}

fn geo_state(slot: Option<&StepState>) -> GeoState {
    match slot {
        Some(StepState::Geo(g)) => g.clone(),
        _ => GeoState::default(),
    }
}

/// Индекс радиуса из состояния; чужой индекс из старой сессии заменяется радиусом по умолчанию
fn radius_index(state: &GeoState) -> usize {
    state.radius.filter(|r| *r < RADII_M.len()).unwrap_or(DEFAULT_RADIUS)
}

fn radius_label(m: f64) -> String {
    if m >= 1000.0 {
        format!("{} км", m / 1000.0)
    } else {
        format!("{} м", m)
    }
}

impl GeoStep {
    fn to_districts(state: &mut GeoState) {
        state.mode = Some(GeoMode::Districts);
        state.point = None;
        state.radius = None;
    }

    fn to_location(state: &mut GeoState) {
        state.mode = Some(GeoMode::Location);
        state.districts = SelectState::default();
    }

    pub fn apply(&self, slot: Option<&StepState>, action: &Action, items: &[Value]) -> StepState {
        let mut state = geo_state(slot);
        match action {
            Action::Choose(token) if token == DISTRICTS_TOKEN => Self::to_districts(&mut state),
            Action::Choose(token) if token == LOCATION_TOKEN => Self::to_location(&mut state),
            Action::Location { lat, lng } => {
                Self::to_location(&mut state);
                state.point = Some(GeoPoint { lat: *lat, lng: *lng });
                state.radius = None;
            }
            Action::Radius(r) => {
                if state.point.is_some() && *r < RADII_M.len() {
                    state.radius = Some(*r);
                }
            }
            Action::SelectAll(_) | Action::SelectItem(_) | Action::Page(_) => {
                if state.mode == Some(GeoMode::Districts) {
                    apply_select(&mut state.districts, action, &labels(items));
                }
            }
            _ => {}
        }
        StepState::Geo(state)
    }

    pub fn keyboard(&self, slot: Option<&StepState>, items: &[Value]) -> Keyboard {
        let state = geo_state(slot);
        let to_districts = button("🏘 Обрати райони", &Action::Choose(DISTRICTS_TOKEN.to_string()));
        let to_location = button("📍 Пошук біля точки", &Action::Choose(LOCATION_TOKEN.to_string()));
        match state.mode {
            None => vec![vec![to_districts], vec![to_location]],
            Some(GeoMode::Districts) => {
                let districts = &state.districts;
                let mut kb = paged_items(&labels(items), districts.page, |l| districts.is_selected(l));
                if !items.is_empty() {
                    kb.push(select_all_row(districts.select_all));
                }
                kb.push(vec![to_location]);
                kb
            }
            Some(GeoMode::Location) => {
                let mut kb = Vec::new();
                if state.point.is_some() {
                    let chosen = radius_index(&state);
                    let buttons = RADII_M
                        .iter()
                        .enumerate()
                        .map(|(i, m)| button(mark(&radius_label(*m), i == chosen), &Action::Radius(i)))
                        .collect();
                    kb.extend(rows(buttons, RADII_M.len()));
                }
                kb.push(vec![to_districts]);
                kb
            }
        }
    }

    pub fn text(&self, slot: Option<&StepState>, active: bool) -> String {
        let state = geo_state(slot);
        match (state.mode, state.point) {
            (Some(GeoMode::Districts), _) => select_text(self.districts_title, &state.districts),
            (Some(GeoMode::Location), Some(p)) => format!(
                "{} {}: {:.4}, {:.4}, радіус {}",
                keyboard::CHECK_MARK,
                self.title,
                p.lat,
                p.lng,
                radius_label(RADII_M[radius_index(&state)])
            ),
            (Some(GeoMode::Location), None) if active => {
                format!("{}: надішліть точку на мапі 📎", self.title)
            }
            (None, _) if active => format!("{}: оберіть райони або надішліть локацію 📍", self.title),
            _ => format!("{}: {}", self.title, NOT_SPECIFIED),
        }
    }

    pub fn query(&self, slot: Option<&StepState>, items: &[Value], upstream: Predicate) -> Predicate {
        let state = geo_state(slot);
        match (state.mode, state.point) {
            (Some(GeoMode::Districts), _) => select_query(&state.districts, Column::District, items, upstream),
            (Some(GeoMode::Location), Some(p)) => upstream.and(Predicate::Near {
                lat: p.lat,
                lng: p.lng,
                radius_m: RADII_M[radius_index(&state)],
            }),
            _ => upstream,
        }
    }

    pub fn has_values(&self, slot: Option<&StepState>) -> bool {
        let state = geo_state(slot);
        match state.mode {
            Some(GeoMode::Districts) => select_has_values(&state.districts),
            Some(GeoMode::Location) => state.point.is_some(),
            None => false,
        }
    }
}

/// Последний шаг: ничего не добавляет к запросу, только просит проверить выбор
#[derive(Debug, Clone)]
pub struct ReviewStep {
    pub prompt: &'static str,
}

impl ReviewStep {
    pub fn text(&self, active: bool) -> String {
        if active {
            self.prompt.to_string()
        } else {
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(values: &[&str]) -> Vec<Value> {
        values.iter().map(|v| Value::text(*v)).collect()
    }

    fn district_step() -> ColumnStep {
        ColumnStep::new("Райони", Column::District)
    }

    #[test]
    fn empty_selection_does_not_restrict() {
        let step = district_step();
        let items = items(&["Галицький", "Сихівський"]);
        assert_eq!(step.query(None, &items, Predicate::All), Predicate::All);
        assert!(!step.has_values(None));
    }

    #[test]
    fn selection_narrows_by_in() {
        let step = district_step();
        let items = items(&["Галицький", "Сихівський"]);
        let slot = step.apply(None, &Action::SelectItem(1), &items);
        assert_eq!(
            step.query(Some(&slot), &items, Predicate::All),
            Predicate::is_in(Column::District, vec![Value::text("Сихівський")])
        );
        assert!(step.text(Some(&slot)).contains("Сихівський"));
    }

    #[test]
    fn select_all_on_then_off_is_unrestricted() {
        let step = district_step();
        let items = items(&["A", "B", "C"]);
        let on = step.apply(None, &Action::SelectAll(true), &items);
        assert_eq!(step.query(Some(&on), &items, Predicate::All), Predicate::All);
        // Список поменялся, но «все» остаются «все»
        let grown = self::items(&["A", "B", "C", "D"]);
        assert_eq!(step.query(Some(&on), &grown, Predicate::All), Predicate::All);

        let off = step.apply(Some(&on), &Action::SelectAll(false), &items);
        let StepState::Select(state) = &off else { panic!("select state expected") };
        assert!(state.selected.is_empty());
        assert!(!state.select_all);
        assert_eq!(step.query(Some(&off), &items, Predicate::All), Predicate::All);
    }

    #[test]
    fn unchecking_one_of_all_keeps_the_rest() {
        let step = district_step();
        let items = items(&["A", "B", "C"]);
        let on = step.apply(None, &Action::SelectAll(true), &items);
        let slot = step.apply(Some(&on), &Action::SelectItem(0), &items);
        assert_eq!(
            step.query(Some(&slot), &items, Predicate::All),
            Predicate::is_in(Column::District, vec![Value::text("B"), Value::text("C")])
        );
    }

    #[test]
    fn out_of_range_index_is_ignored() {
        let step = district_step();
        let items = items(&["A"]);
        let slot = step.apply(None, &Action::SelectItem(5), &items);
        assert!(!step.has_values(Some(&slot)));
    }

    #[test]
    fn rooms_many_bucket_is_open_range() {
        let step = RoomsStep::new("Кількість кімнат");
        let items = items(&["1", "2", "4+"]);
        let slot = step.apply(None, &Action::SelectItem(0), &items);
        let slot = step.apply(Some(&slot), &Action::SelectItem(2), &items);
        assert_eq!(
            step.query(Some(&slot), &items, Predicate::All),
            Predicate::any(vec![
                Predicate::is_in(Column::Rooms, vec![Value::Int(1)]),
                Predicate::range(Column::Rooms, Some(4.0), None),
            ])
        );
    }

    #[test]
    fn ceiling_price_keeps_first_number_only() {
        let step = RangeStep {
            title: "Ціна",
            column: Column::RentPrice,
            mode: RangeMode::Ceiling,
        };
        let slot = step.apply(None, &Action::FreeText("15000".to_string()));
        let slot = step.apply(Some(&slot), &Action::FreeText("500".to_string()));
        assert_eq!(step.bounds(Some(&slot)), Some((15000.0 * 0.5, 15000.0 * 1.1)));

        let rates = RateSnapshot::new(40.0, 44.0);
        let q = step.query(Some(&slot), Predicate::All, &rates);
        let (sql, binds) = q.to_sql();
        assert_eq!(sql.matches("currency = ?").count(), 3);
        assert!(binds.contains(&Value::Real(7500.0)));
        assert!(binds.contains(&Value::Real(7500.0 / 40.0)));
    }

    #[test]
    fn garbage_text_is_silently_dropped() {
        let step = RangeStep {
            title: "Ціна",
            column: Column::RentPrice,
            mode: RangeMode::Bounds,
        };
        let slot = step.apply(None, &Action::FreeText("дешево".to_string()));
        assert_eq!(slot, StepState::Range(RangeState::default()));
        assert!(step.allow_next(Some(&slot)));

        let slot = step.apply(Some(&slot), &Action::FreeText("10 000".to_string()));
        assert!(!step.allow_next(Some(&slot)));
        let slot = step.apply(Some(&slot), &Action::FreeText("20000 грн".to_string()));
        assert!(step.allow_next(Some(&slot)));
        assert_eq!(step.bounds(Some(&slot)), Some((10000.0, 20000.0)));
    }

    #[test]
    fn staged_options_live_inside_groups() {
        let step = StagedStep {
            title: "Додаткові фільтри",
            groups: ADDITIONAL_GROUPS,
        };
        // Без открытой группы выбор опции ничего не делает
        let slot = step.apply(None, &Action::SelectItem(0));
        assert!(!step.has_values(Some(&slot)));

        let slot = step.apply(Some(&slot), &Action::OpenGroup(0));
        assert!(!step.allow_next(Some(&slot)));
        let slot = step.apply(Some(&slot), &Action::SelectItem(1));
        let slot = step.apply(Some(&slot), &Action::CloseGroup);
        assert!(step.allow_next(Some(&slot)));
        assert_eq!(
            step.query(Some(&slot), Predicate::All),
            Predicate::eq(Column::Kids, Value::Int(1))
        );
        assert_eq!(step.keyboard(Some(&slot))[0][0].text, "Умови проживання (1)");
    }

    #[test]
    fn geo_mode_switch_clears_other_mode() {
        let step = GeoStep {
            title: "Локація",
            districts_title: "Райони",
        };
        let items = items(&["Галицький"]);
        let slot = step.apply(None, &Action::Choose(DISTRICTS_TOKEN.to_string()), &items);
        let slot = step.apply(Some(&slot), &Action::SelectItem(0), &items);
        assert!(step.has_values(Some(&slot)));

        // Радиус без точки игнорируется
        let slot = step.apply(Some(&slot), &Action::Choose(LOCATION_TOKEN.to_string()), &items);
        let slot = step.apply(Some(&slot), &Action::Radius(2), &items);
        let StepState::Geo(state) = &slot else { panic!("geo state expected") };
        assert!(state.districts.selected.is_empty());
        assert_eq!(state.radius, None);

        let slot = step.apply(Some(&slot), &Action::Location { lat: 49.84, lng: 24.03 }, &items);
        let slot = step.apply(Some(&slot), &Action::Radius(2), &items);
        assert_eq!(
            step.query(Some(&slot), &items, Predicate::All),
            Predicate::Near { lat: 49.84, lng: 24.03, radius_m: 2000.0 }
        );

        let slot = step.apply(Some(&slot), &Action::Choose(DISTRICTS_TOKEN.to_string()), &items);
        let StepState::Geo(state) = &slot else { panic!("geo state expected") };
        assert_eq!(state.point, None);
        assert_eq!(step.query(Some(&slot), &items, Predicate::All), Predicate::All);
    }

    #[test]
    fn unknown_radius_in_saved_state_falls_back_to_default() {
        let step = GeoStep {
            title: "Локація",
            districts_title: "Райони",
        };
        let slot = StepState::Geo(GeoState {
            mode: Some(GeoMode::Location),
            point: Some(GeoPoint { lat: 49.84, lng: 24.03 }),
            radius: Some(9),
            ..GeoState::default()
        });
        assert_eq!(
            step.query(Some(&slot), &[], Predicate::All),
            Predicate::Near { lat: 49.84, lng: 24.03, radius_m: 1000.0 }
        );
        assert!(step.text(Some(&slot), false).ends_with("радіус 1 км"));
        assert!(step.keyboard(Some(&slot), &[])[0][DEFAULT_RADIUS].text.ends_with(keyboard::CHECK_MARK));
    }

    #[test]
    fn amounts_are_parsed_leniently() {
        assert_eq!(parse_amount(" 15 000 "), Some(15000.0));
        assert_eq!(parse_amount("15000грн"), Some(15000.0));
        assert_eq!(parse_amount("0"), None);
        assert_eq!(parse_amount("-5"), None);
        assert_eq!(parse_amount("abc"), None);
    }
}
