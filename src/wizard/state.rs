//! Состояние диалога, которое хранится в сессии пользователя между апдейтами.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Курсор визарда и срезы состояний шагов. Шаги не сохраняются, только их срезы.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    #[serde(default)]
    pub step_index: usize,
    #[serde(default)]
    pub step_states: Vec<Option<StepState>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_page_offset: Option<usize>,
    #[serde(default)]
    pub is_subscription_mode: bool,
}

impl ConversationState {
    pub fn new(is_subscription_mode: bool) -> Self {
        Self {
            is_subscription_mode,
            ..Self::default()
        }
    }

    /// Битое или отсутствующее состояние начинает диалог заново
    pub fn load(raw: Option<&str>) -> Self {
        match raw {
            Some(raw) => serde_json::from_str(raw).unwrap_or_else(|e| {
                warn!("Dropping unreadable conversation state: {}", e);
                Self::default()
            }),
            None => Self::default(),
        }
    }

    pub fn to_json(&self) -> String {
        // Сериализация структуры без map-ключей не падает
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Дополняет срезы до длины цепочки и держит курсор в её границах
    pub fn fit(&mut self, steps: usize) {
        if self.step_states.len() < steps {
            self.step_states.resize(steps, None);
        }
        if steps > 0 && self.step_index >= steps {
            self.step_index = steps - 1;
        }
    }

    pub fn slot(&self, index: usize) -> Option<&StepState> {
        self.step_states.get(index).and_then(Option::as_ref)
    }

    pub fn set_slot(&mut self, index: usize, value: Option<StepState>) {
        if self.step_states.len() <= index {
            self.step_states.resize(index + 1, None);
        }
        self.step_states[index] = value;
    }

    /// Полный сброс при выходе в главное меню; режим подписки тоже сбрасывается
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Срез состояния одного шага; форма зависит от вида шага
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "k", rename_all = "snake_case")]
pub enum StepState {
    Select(SelectState),
    Range(RangeState),
    Staged(StagedState),
    Geo(GeoState),
    Text(TextState),
    Photos(PhotoState),
    Review,
}

/// Выбор из списка. Ключ присутствует и равен `true`, значит элемент выбран.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SelectState {
    #[serde(rename = "v", default)]
    pub selected: BTreeMap<String, bool>,
    #[serde(rename = "s", default)]
    pub select_all: bool,
    #[serde(rename = "p", default)]
    pub page: usize,
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl SelectState {
    pub fn is_selected(&self, key: &str) -> bool {
        self.select_all || self.selected.get(key).copied().unwrap_or(false)
    }

    pub fn toggle(&mut self, key: &str) {
        if self.selected.get(key).copied().unwrap_or(false) {
            self.selected.remove(key);
        } else {
            self.selected.insert(key.to_string(), true);
        }
    }

    pub fn selected_keys(&self) -> impl Iterator<Item = &str> {
        self.selected.iter().filter(|(_, on)| **on).map(|(k, _)| k.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RangeState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StagedState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open: Option<usize>,
    #[serde(default)]
    pub selected: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoMode {
    Districts,
    Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<GeoMode>,
    #[serde(default)]
    pub districts: SelectState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TextState {
    #[serde(default)]
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PhotoState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choice: Option<String>,
    #[serde(default)]
    pub photos: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConversationState {
        let mut districts = SelectState::default();
        districts.toggle("Сихівський");
        let mut state = ConversationState::new(true);
        state.step_index = 3;
        state.step_states = vec![
            Some(StepState::Geo(GeoState {
                mode: Some(GeoMode::Districts),
                districts,
                point: None,
                radius: None,
            })),
            None,
            Some(StepState::Range(RangeState { from: None, to: Some(15000.0) })),
            Some(StepState::Review),
        ];
        state.result_page_offset = Some(3);
        state
    }

    #[test]
    fn json_round_trip_keeps_null_slots() {
        let state = sample();
        let json = state.to_json();
        assert!(json.contains("\"stepStates\":[{"));
        assert!(json.contains(",null,"));
        let back = ConversationState::load(Some(&json));
        assert_eq!(back, state);
        assert_eq!(back.to_json(), json);
    }

    #[test]
    fn external_blob_round_trips_byte_for_byte() {
        let raw = r#"{"stepIndex":1,"stepStates":[{"k":"select","v":{"2":true},"s":false,"p":0},null],"isSubscriptionMode":false}"#;
        let state = ConversationState::load(Some(raw));
        assert_eq!(state.step_index, 1);
        assert_eq!(state.to_json(), raw);
    }

    #[test]
    fn broken_blob_starts_over() {
        assert_eq!(ConversationState::load(Some("{oops")), ConversationState::default());
        assert_eq!(ConversationState::load(None), ConversationState::default());
    }

    #[test]
    fn fit_grows_slots_and_clamps_cursor() {
        let mut state = ConversationState::default();
        state.step_index = 9;
        state.fit(4);
        assert_eq!(state.step_states.len(), 4);
        assert_eq!(state.step_index, 3);
    }

    #[test]
    fn unselect_removes_key() {
        let mut s = SelectState::default();
        s.toggle("a");
        assert!(s.is_selected("a"));
        s.toggle("a");
        assert!(s.selected.is_empty());
    }
}
