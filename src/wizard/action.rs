//! Действия пользователя внутри визарда и их компактная запись в `callback_data`.
//!
//! Кнопки несут JSON-объект с однобуквенными ключами: `{"n":1}` вперёд, `{"v":3}` выбор элемента и т.д.
//! Нераспознанные данные превращаются в [`Action::Noop`], ошибкой они не считаются.

use serde_json::{json, Map, Value};

pub const KEY_NEXT: &str = "n";
pub const KEY_BACK: &str = "b";
pub const KEY_MAIN_MENU: &str = "m";
pub const KEY_SHOW_MORE: &str = "else";
pub const KEY_SUBSCRIBE: &str = "sub";
pub const KEY_ITEM: &str = "v";
pub const KEY_SELECT_ALL: &str = "s";
pub const KEY_PAGE: &str = "p";
pub const KEY_OPEN_GROUP: &str = "c";
pub const KEY_CLOSE_GROUP: &str = "u";
pub const KEY_OPTION: &str = "o";
pub const KEY_RADIUS: &str = "r";

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Next,
    Back,
    MainMenu,
    ShowMore,
    Subscribe,
    SelectItem(usize),
    SelectAll(bool),
    Page(usize),
    OpenGroup(usize),
    CloseGroup,
    Choose(String),
    Radius(usize),
    FreeText(String),
    Location { lat: f64, lng: f64 },
    Photo(String),
    Noop,
}

impl Action {
    /// Разбирает данные кнопки. Навигационные ключи имеют приоритет над данными шага.
    pub fn from_callback(data: &str) -> Action {
        let map: Map<String, Value> = match serde_json::from_str(data) {
            Ok(Value::Object(map)) => map,
            _ => return Action::Noop,
        };

        if map.contains_key(KEY_NEXT) {
            return Action::Next;
        }
        if map.contains_key(KEY_BACK) {
            return Action::Back;
        }
        if map.contains_key(KEY_MAIN_MENU) {
            return Action::MainMenu;
        }
        if map.contains_key(KEY_SHOW_MORE) {
            return Action::ShowMore;
        }
        if map.contains_key(KEY_SUBSCRIBE) {
            return Action::Subscribe;
        }
        if let Some(flag) = map.get(KEY_SELECT_ALL) {
            return match flag {
                Value::Bool(b) => Action::SelectAll(*b),
                Value::Number(n) => Action::SelectAll(n.as_u64().unwrap_or(0) != 0),
                _ => Action::Noop,
            };
        }
        if let Some(i) = index(&map, KEY_ITEM) {
            return Action::SelectItem(i);
        }
        if let Some(p) = index(&map, KEY_PAGE) {
            return Action::Page(p);
        }
        if let Some(c) = index(&map, KEY_OPEN_GROUP) {
            return Action::OpenGroup(c);
        }
        if map.contains_key(KEY_CLOSE_GROUP) {
            return Action::CloseGroup;
        }
        if let Some(Value::String(token)) = map.get(KEY_OPTION) {
            return Action::Choose(token.clone());
        }
        if let Some(r) = index(&map, KEY_RADIUS) {
            return Action::Radius(r);
        }
        Action::Noop
    }

    /// Обратная операция для кнопок. Текст, локация и фото приходят сообщениями, кнопок у них нет.
    pub fn to_payload(&self) -> String {
        let value = match self {
            Action::Next => json!({ KEY_NEXT: 1 }),
            Action::Back => json!({ KEY_BACK: 1 }),
            Action::MainMenu => json!({ KEY_MAIN_MENU: 1 }),
            Action::ShowMore => json!({ KEY_SHOW_MORE: 1 }),
            Action::Subscribe => json!({ KEY_SUBSCRIBE: 1 }),
            Action::SelectItem(i) => json!({ KEY_ITEM: i }),
            Action::SelectAll(on) => json!({ KEY_SELECT_ALL: *on as u8 }),
            Action::Page(p) => json!({ KEY_PAGE: p }),
            Action::OpenGroup(c) => json!({ KEY_OPEN_GROUP: c }),
            Action::CloseGroup => json!({ KEY_CLOSE_GROUP: 1 }),
            Action::Choose(token) => json!({ KEY_OPTION: token }),
            Action::Radius(r) => json!({ KEY_RADIUS: r }),
            Action::FreeText(_) | Action::Location { .. } | Action::Photo(_) | Action::Noop => json!({}),
        };
        value.to_string()
    }
}

fn index(map: &Map<String, Value>, key: &str) -> Option<usize> {
    map.get(key).and_then(Value::as_u64).map(|v| v as usize)
}
