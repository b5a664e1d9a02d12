//! Разметка кнопок: страницы элементов, навигация, отметки выбора.

use super::action::Action;
use crate::transport::{Button, Keyboard};

pub const ITEMS_PER_PAGE: usize = 20;
pub const ITEMS_PER_ROW: usize = 2;

pub const SELECT_ALL_TEXT: &str = "Обрати всі";
pub const UNSELECT_ALL_TEXT: &str = "Зняти виділення з усіх";
pub const NEXT_TEXT: &str = "➡️";
pub const SKIP_TEXT: &str = "Пропустити ➡";
pub const NEXT_QUESTION_TEXT: &str = "Далі ➡️";
pub const BACK_TEXT: &str = "⬅️";
pub const HOME_TEXT: &str = "🏠️";
pub const PREV_PAGE_TEXT: &str = "⏪";
pub const NEXT_PAGE_TEXT: &str = "⏩";
pub const CHECK_MARK: &str = "✅";

pub fn button(text: impl Into<String>, action: &Action) -> Button {
    Button::callback(text, action.to_payload())
}

pub fn mark(label: &str, selected: bool) -> String {
    if selected {
        format!("{} {}", label, CHECK_MARK)
    } else {
        label.to_string()
    }
}

pub fn page_count(len: usize) -> usize {
    (len + ITEMS_PER_PAGE - 1) / ITEMS_PER_PAGE
}

/// Раскладывает кнопки по рядам заданной ширины
pub fn rows(buttons: Vec<Button>, per_row: usize) -> Keyboard {
    buttons
        .chunks(per_row.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Одна страница списка. Индексы в кнопках глобальные, поэтому выбор не зависит от текущей страницы.
pub fn paged_items(labels: &[String], page: usize, is_selected: impl Fn(&str) -> bool) -> Keyboard {
    let pages = page_count(labels.len());
    let page = page.min(pages.saturating_sub(1));
    let start = page * ITEMS_PER_PAGE;

    let buttons = labels
        .iter()
        .enumerate()
        .skip(start)
        .take(ITEMS_PER_PAGE)
        .map(|(i, label)| button(mark(label, is_selected(label)), &Action::SelectItem(i)))
        .collect();
    let mut keyboard = rows(buttons, ITEMS_PER_ROW);

    if pages > 1 {
        let mut paging = Vec::new();
        if page > 0 {
            paging.push(button(PREV_PAGE_TEXT, &Action::Page(page - 1)));
        }
        if page + 1 < pages {
            paging.push(button(NEXT_PAGE_TEXT, &Action::Page(page + 1)));
        }
        keyboard.push(paging);
    }
    keyboard
}

pub fn select_all_row(select_all: bool) -> Vec<Button> {
    if select_all {
        vec![button(UNSELECT_ALL_TEXT, &Action::SelectAll(false))]
    } else {
        vec![button(SELECT_ALL_TEXT, &Action::SelectAll(true))]
    }
}

/// Ряд навигации под клавиатурой шага
pub fn navigation_row(back: Button, next_label: Option<&str>) -> Vec<Button> {
    let mut row = vec![back, button(HOME_TEXT, &Action::MainMenu)];
    if let Some(label) = next_label {
        row.push(button(label, &Action::Next));
    }
    row
}
