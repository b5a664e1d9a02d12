//! Вопросы анкеты для размещения объявления. Работают на том же движке, что и фильтры,
//! но к запросу ничего не добавляют: результат шага это ответ пользователя.

use once_cell::sync::Lazy;
use regex::Regex;

use super::action::Action;
use super::filters::{parse_amount, select_state};
use super::keyboard::{button, mark, rows, BACK_TEXT, CHECK_MARK, ITEMS_PER_ROW, NEXT_QUESTION_TEXT, SKIP_TEXT};
use super::state::{PhotoState, StepState, TextState};
use crate::transport::{Button, Keyboard};
use crate::utils::escape_html;

pub const HAVE_PHOTOS: &str = "hp";
pub const NEED_PHOTOGRAPHER: &str = "np";
pub const RESET_CHOICE: &str = "reset";
pub const NOT_PROVIDED: &str = "Не надано";
const HAVE_PHOTOS_TEXT: &str = "Маю фото";
const NEED_PHOTOGRAPHER_TEXT: &str = "Потрібен фотограф";
const WRONG_DATA_ALERT: &str = "❌ Введіть будь ласка коректні данні!";
const WRONG_PHONE_ALERT: &str = "❌ Введіть будь ласка коректний номер телефону!";
const PENDING: &str = "⏭";

static PHONE_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^(\+38)?\d{10}$").ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validator {
    Any,
    PositiveInt,
    Amount,
    /// «поверх/поверховість», поверх не вище будинку
    Floor,
    Phone,
}

impl Validator {
    pub fn check(&self, answer: &str) -> bool {
        match self {
            Validator::Any => true,
            Validator::PositiveInt => answer.trim().parse::<u32>().map_or(false, |n| n > 0),
            Validator::Amount => parse_amount(answer).is_some(),
            Validator::Floor => {
                let parts: Vec<&str> = answer.split('/').map(str::trim).collect();
                match parts.as_slice() {
                    [floor, height] => match (floor.parse::<u32>(), height.parse::<u32>()) {
                        (Ok(f), Ok(h)) => f >= 1 && f <= h,
                        _ => false,
                    },
                    _ => false,
                }
            }
            Validator::Phone => {
                let phone: String = answer.split_whitespace().collect();
                PHONE_RE.as_ref().map_or(false, |re| re.is_match(&phone))
            }
        }
    }

    fn alert(&self) -> &'static str {
        match self {
            Validator::Phone => WRONG_PHONE_ALERT,
            _ => WRONG_DATA_ALERT,
        }
    }
}

fn answered(name: &str, value: &str) -> String {
    format!("{} <b>{}</b>: {}", CHECK_MARK, name, value)
}

fn pending(name: &str, prompt: &str) -> String {
    format!("{} <b>{}</b>: {}", PENDING, name, prompt)
}

fn text_state(slot: Option<&StepState>) -> TextState {
    match slot {
        Some(StepState::Text(t)) => t.clone(),
        _ => TextState::default(),
    }
}

/// Свободный ответ текстом с проверкой формата
#[derive(Debug, Clone)]
pub struct TextQuestion {
    pub name: &'static str,
    pub prompt: &'static str,
    pub sample: &'static str,
    pub suffix: &'static str,
    pub validator: Validator,
}

impl TextQuestion {
    pub fn new(name: &'static str, prompt: &'static str, sample: &'static str) -> Self {
        Self {
            name,
            prompt,
            sample,
            suffix: "",
            validator: Validator::Any,
        }
    }

    pub fn suffix(mut self, suffix: &'static str) -> Self {
        self.suffix = suffix;
        self
    }

    pub fn validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    pub fn apply(&self, slot: Option<&StepState>, action: &Action) -> StepState {
        let mut state = text_state(slot);
        if let Action::FreeText(text) = action {
            let text = text.trim();
            if !text.is_empty() {
                state.answer = text.to_string();
            }
        }
        StepState::Text(state)
    }

    fn is_valid(&self, state: &TextState) -> bool {
        !state.answer.is_empty() && self.validator.check(&state.answer)
    }

    pub fn text(&self, slot: Option<&StepState>, active: bool) -> String {
        let state = text_state(slot);
        if self.is_valid(&state) {
            return answered(self.name, &self.value(&state));
        }
        let mut text = pending(self.name, self.prompt);
        if active && !self.sample.is_empty() {
            text.push('\n');
            text.push_str(self.sample);
        }
        if !state.answer.is_empty() {
            text.push_str("\n\n");
            text.push_str(self.validator.alert());
        }
        text
    }

    fn value(&self, state: &TextState) -> String {
        let answer = escape_html(&state.answer);
        if self.suffix.is_empty() {
            answer
        } else {
            format!("{} {}", answer, self.suffix)
        }
    }

    pub fn allow_next(&self, slot: Option<&StepState>) -> bool {
        self.is_valid(&text_state(slot))
    }

    pub fn answer(&self, slot: Option<&StepState>) -> String {
        let state = text_state(slot);
        if self.suffix.is_empty() {
            state.answer
        } else {
            format!("{} {}", state.answer, self.suffix)
        }
    }
}

/// Выбор из фиксированного списка: один вариант или несколько
#[derive(Debug, Clone)]
pub struct ChoiceQuestion {
    pub name: &'static str,
    pub prompt: &'static str,
    pub items: &'static [&'static str],
    pub multiple: bool,
    pub skippable: bool,
}

impl ChoiceQuestion {
    pub fn apply(&self, slot: Option<&StepState>, action: &Action) -> StepState {
        let mut state = select_state(slot);
        if let Action::SelectItem(i) = action {
            if let Some(item) = self.items.get(*i) {
                if self.multiple {
                    state.toggle(item);
                } else {
                    state.selected.clear();
                    state.selected.insert(item.to_string(), true);
                }
            }
        }
        StepState::Select(state)
    }

    pub fn keyboard(&self, slot: Option<&StepState>) -> Keyboard {
        let state = select_state(slot);
        let buttons = self
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| button(mark(item, state.is_selected(item)), &Action::SelectItem(i)))
            .collect();
        rows(buttons, ITEMS_PER_ROW)
    }

    fn chosen(&self, slot: Option<&StepState>) -> Vec<&'static str> {
        let state = select_state(slot);
        self.items.iter().copied().filter(|i| state.is_selected(i)).collect()
    }

    pub fn text(&self, slot: Option<&StepState>, active: bool) -> String {
        let chosen = self.chosen(slot);
        if !chosen.is_empty() {
            answered(self.name, &chosen.join(", "))
        } else if active || !self.skippable {
            pending(self.name, self.prompt)
        } else {
            answered(self.name, "Не вказано")
        }
    }

    pub fn has_values(&self, slot: Option<&StepState>) -> bool {
        !self.chosen(slot).is_empty()
    }

    pub fn allow_next(&self, slot: Option<&StepState>) -> bool {
        self.skippable || self.has_values(slot)
    }

    pub fn next_label(&self, slot: Option<&StepState>) -> Option<&'static str> {
        if self.has_values(slot) {
            Some(NEXT_QUESTION_TEXT)
        } else if self.skippable {
            Some(SKIP_TEXT)
        } else {
            None
        }
    }

    pub fn answer(&self, slot: Option<&StepState>) -> String {
        let chosen = self.chosen(slot);
        if chosen.is_empty() {
            NOT_PROVIDED.to_string()
        } else {
            chosen.join(", ")
        }
    }
}

/// Один вариант кнопкой или свой ответ текстом (например, ЖК или «Не знаю ЖК»)
#[derive(Debug, Clone)]
pub struct TextChoiceQuestion {
    pub name: &'static str,
    pub prompt: &'static str,
    pub sample: &'static str,
    pub items: &'static [&'static str],
}

impl TextChoiceQuestion {
    pub fn apply(&self, slot: Option<&StepState>, action: &Action) -> StepState {
        let mut state = select_state(slot);
        match action {
            Action::FreeText(text) if !text.trim().is_empty() => {
                state.selected.clear();
                state.text = Some(text.trim().to_string());
            }
            Action::SelectItem(i) => {
                if let Some(item) = self.items.get(*i) {
                    state.text = None;
                    state.selected.clear();
                    state.selected.insert(item.to_string(), true);
                }
            }
            _ => {}
        }
        StepState::Select(state)
    }

    pub fn keyboard(&self, slot: Option<&StepState>) -> Keyboard {
        let state = select_state(slot);
        let buttons = self
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| button(mark(item, state.is_selected(item)), &Action::SelectItem(i)))
            .collect();
        rows(buttons, ITEMS_PER_ROW)
    }

    fn value(&self, slot: Option<&StepState>) -> Option<String> {
        let state = select_state(slot);
        let chosen: Vec<&str> = self.items.iter().copied().filter(|i| state.is_selected(i)).collect();
        if !chosen.is_empty() {
            return Some(chosen.join(", "));
        }
        state.text.filter(|t| !t.is_empty())
    }

    pub fn text(&self, slot: Option<&StepState>, active: bool) -> String {
        match self.value(slot) {
            Some(value) => answered(self.name, &escape_html(&value)),
            None if active => format!("{}\n{}", pending(self.name, self.prompt), self.sample),
            None => pending(self.name, self.prompt),
        }
    }

    pub fn has_values(&self, slot: Option<&StepState>) -> bool {
        self.value(slot).is_some()
    }

    pub fn answer(&self, slot: Option<&StepState>) -> String {
        self.value(slot).unwrap_or_else(|| NOT_PROVIDED.to_string())
    }
}

fn photo_state(slot: Option<&StepState>) -> PhotoState {
    match slot {
        Some(StepState::Photos(p)) => p.clone(),
        _ => PhotoState::default(),
    }
}

/// «Маю фото» с загрузкой файлов или «Потрібен фотограф»
#[derive(Debug, Clone)]
pub struct PhotoQuestion {
    pub name: &'static str,
    pub prompt: &'static str,
    pub sample: &'static str,
}

impl PhotoQuestion {
    pub fn apply(&self, slot: Option<&StepState>, action: &Action) -> StepState {
        let mut state = photo_state(slot);
        match action {
            Action::Choose(token) if token == RESET_CHOICE => state.choice = None,
            Action::Choose(token) if state.choice.is_none() && (token == HAVE_PHOTOS || token == NEED_PHOTOGRAPHER) => {
                state.choice = Some(token.clone());
            }
            Action::Photo(file_id) => {
                if state.choice.as_deref() == Some(HAVE_PHOTOS) && !state.photos.contains(file_id) {
                    state.photos.push(file_id.clone());
                }
            }
            _ => {}
        }
        StepState::Photos(state)
    }

    pub fn keyboard(&self, slot: Option<&StepState>) -> Keyboard {
        if photo_state(slot).choice.is_some() {
            return Vec::new();
        }
        vec![
            vec![button(HAVE_PHOTOS_TEXT, &Action::Choose(HAVE_PHOTOS.to_string()))],
            vec![button(NEED_PHOTOGRAPHER_TEXT, &Action::Choose(NEED_PHOTOGRAPHER.to_string()))],
        ]
    }

    /// После выбора варианта «назад» возвращает к выбору, а не к предыдущему вопросу
    pub fn back_button(&self, slot: Option<&StepState>) -> Button {
        if photo_state(slot).choice.is_some() {
            button(BACK_TEXT, &Action::Choose(RESET_CHOICE.to_string()))
        } else {
            button(BACK_TEXT, &Action::Back)
        }
    }

    pub fn text(&self, slot: Option<&StepState>) -> String {
        let state = photo_state(slot);
        match state.choice.as_deref() {
            Some(HAVE_PHOTOS) if !state.photos.is_empty() => answered(self.name, &state.photos.len().to_string()),
            Some(HAVE_PHOTOS) => pending(self.name, self.sample),
            Some(NEED_PHOTOGRAPHER) => answered(self.name, NEED_PHOTOGRAPHER_TEXT),
            _ => pending(self.name, self.prompt),
        }
    }

    pub fn has_values(&self, slot: Option<&StepState>) -> bool {
        let state = photo_state(slot);
        match state.choice.as_deref() {
            Some(HAVE_PHOTOS) => !state.photos.is_empty(),
            Some(NEED_PHOTOGRAPHER) => true,
            _ => false,
        }
    }

    pub fn answer(&self, slot: Option<&StepState>) -> String {
        let state = photo_state(slot);
        match state.choice.as_deref() {
            Some(NEED_PHOTOGRAPHER) => NEED_PHOTOGRAPHER_TEXT.to_string(),
            Some(HAVE_PHOTOS) => format!("{} ({})", HAVE_PHOTOS_TEXT, state.photos.len()),
            _ => NOT_PROVIDED.to_string(),
        }
    }

    pub fn photos(&self, slot: Option<&StepState>) -> Vec<String> {
        photo_state(slot).photos
    }
}
