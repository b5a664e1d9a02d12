//! Главное меню, меню подписки, помощь и меню оператора.
//!
//! Кнопки меню несут простые строковые токены, а не JSON визарда, поэтому их нельзя спутать с действиями шагов.

use crate::store::{UserRecord, UserStats};
use crate::transport::{Button, Keyboard};
use crate::utils::escape_html;
use crate::wizard::keyboard::{rows, BACK_TEXT, HOME_TEXT};
use crate::wizard::FlowKind;

pub const APARTMENTS_STATE: &str = "APARTMENTS_STATE";
pub const HOUSES_STATE: &str = "HOUSES_STATE";
pub const SUBSCRIPTION_STATE: &str = "SUBSCRIPTION_STATE";
pub const SUB_APARTMENTS_STATE: &str = "SUB_APARTMENTS_STATE";
pub const SUB_HOUSES_STATE: &str = "SUB_HOUSES_STATE";
pub const CANCEL_SUBSCRIPTION: &str = "CANCEL_SUBSCRIPTION";
pub const ADS_STATE: &str = "ADS_STATE";
pub const HELP_STATE: &str = "HELP_STATE";
pub const SUBMIT_HELP: &str = "SUBMIT_HELP";
pub const MAIN_MENU_STATE: &str = "MAIN_MENU_STATE";
pub const ADMIN_MENU: &str = "admin_menu";
pub const TOTAL_USERS: &str = "TOTAL_USERS";
pub const RECENT_HOUR_USERS: &str = "RECENT_HOUR_USERS";
pub const TOTAL_SUBSCRIBED_USERS: &str = "TOTAL_SUBSCRIBED_USERS";
pub const REFRESH_DB: &str = "refresh_db";

pub const WELCOME_TEXT: &str = "Вітаємо вас в боті нерухомості. Оберіть бажану послугу.";
pub const SUBSCRIPTION_TEXT: &str = "Це меню для налаштування отримання нових повідомлень, \
                                     коли зʼявляються обʼекти по вашим критеріям пошуку. \
                                     Для того щоб додати критерії до пошуку оберіть потрібний тип нерухомості.";
pub const SUBSCRIBED_TEXT: &str = "Ви підписалися на нові оголошення 📩\n\
                                   Ми надішлемо їх, щойно вони зʼявляться.";
pub const AD_SAVED_TEXT: &str = "Дякуємо! Ваша заявка збережена ✅\n\
                                 Наш менеджер звʼяжеться з вами найближчим часом.";
pub const HELP_ASK_TEXT: &str = "Привіт! 😊 Це сервіс з оренди житла у Львові. \
                                 Напиши, в чому саме потрібна допомога або консультація!";
pub const HELP_SENT_TEXT: &str = "Наш менеджер отримав Ваше прохання про допомогу \
                                  та звʼяжется з вами найближчим часом.\n\
                                  Ви можете продовжити користування ботом Lviv City Estate";

const START_BUTTONS: &[(&str, &str)] = &[
    ("Оренда Квартир 🏢", APARTMENTS_STATE),
    ("Оренда Будинків 🏡", HOUSES_STATE),
    ("Повідомлення про нові оголошення 📩", SUBSCRIPTION_STATE),
    ("Здати нерухомість 🔑", ADS_STATE),
    ("Допомога 🆘", HELP_STATE),
];
const SUBSCRIPTION_BUTTONS: &[(&str, &str)] = &[("Квартири 🏢", SUB_APARTMENTS_STATE), ("Будинки 🏡", SUB_HOUSES_STATE)];
const ADMIN_BUTTONS: &[(&str, &str)] = &[
    ("Всього користувачів", TOTAL_USERS),
    ("За минулу годину", RECENT_HOUR_USERS),
    ("Всього з підпискою", TOTAL_SUBSCRIBED_USERS),
    ("Оновити базу", REFRESH_DB),
];
const ADMIN_MENU_TEXT: &str = "Меню Адміна";
const CANCEL_SUBSCRIPTION_TEXT: &str = "Відмінити підписку ❌";
const SUBMIT_HELP_TEXT: &str = "Попросити про допомогу";

/// Команды меню, которые не относятся к визарду
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuCommand {
    MainMenu,
    Search(FlowKind),
    SubscribeSearch(FlowKind),
    SubscriptionMenu,
    CancelSubscription,
    SubmitAd,
    Help,
    SubmitHelp,
    AdminMenu,
    TotalUsers,
    RecentHourUsers,
    TotalSubscribedUsers,
    Refresh,
}

impl MenuCommand {
    pub fn parse(data: &str) -> Option<Self> {
        let command = match data {
            MAIN_MENU_STATE => MenuCommand::MainMenu,
            APARTMENTS_STATE => MenuCommand::Search(FlowKind::Apartments),
            HOUSES_STATE => MenuCommand::Search(FlowKind::Houses),
            SUB_APARTMENTS_STATE => MenuCommand::SubscribeSearch(FlowKind::Apartments),
            SUB_HOUSES_STATE => MenuCommand::SubscribeSearch(FlowKind::Houses),
            SUBSCRIPTION_STATE => MenuCommand::SubscriptionMenu,
            CANCEL_SUBSCRIPTION => MenuCommand::CancelSubscription,
            ADS_STATE => MenuCommand::SubmitAd,
            HELP_STATE => MenuCommand::Help,
            SUBMIT_HELP => MenuCommand::SubmitHelp,
            ADMIN_MENU => MenuCommand::AdminMenu,
            TOTAL_USERS => MenuCommand::TotalUsers,
            RECENT_HOUR_USERS => MenuCommand::RecentHourUsers,
            TOTAL_SUBSCRIBED_USERS => MenuCommand::TotalSubscribedUsers,
            REFRESH_DB => MenuCommand::Refresh,
            _ => return None,
        };
        Some(command)
    }

    pub fn is_admin_only(&self) -> bool {
        matches!(
            self,
            MenuCommand::AdminMenu
                | MenuCommand::TotalUsers
                | MenuCommand::RecentHourUsers
                | MenuCommand::TotalSubscribedUsers
                | MenuCommand::Refresh
        )
    }
}

fn buttons(pattern: &[(&str, &str)], per_row: usize) -> Keyboard {
    rows(
        pattern
            .iter()
            .map(|(text, data)| Button::callback(*text, *data))
            .collect(),
        per_row,
    )
}

fn back_to_main() -> Vec<Button> {
    vec![Button::callback(BACK_TEXT, MAIN_MENU_STATE)]
}

pub fn main_menu(is_admin: bool) -> Keyboard {
    let mut keyboard = buttons(START_BUTTONS, 1);
    if is_admin {
        keyboard.push(vec![Button::callback(ADMIN_MENU_TEXT, ADMIN_MENU)]);
    }
    keyboard
}

/// Текущая подписка пользователя заменяет вводный текст
pub fn subscription_menu(user: &UserRecord) -> (String, Keyboard) {
    let mut keyboard = buttons(SUBSCRIPTION_BUTTONS, 2);
    let text = match &user.subscription {
        Some(subscription) => {
            keyboard.insert(0, vec![Button::callback(CANCEL_SUBSCRIPTION_TEXT, CANCEL_SUBSCRIPTION)]);
            subscription.summary.clone()
        }
        None => SUBSCRIPTION_TEXT.to_string(),
    };
    keyboard.push(back_to_main());
    (text, keyboard)
}

pub fn admin_menu(user: &UserRecord, text: Option<String>) -> (String, Keyboard) {
    let mut keyboard = buttons(ADMIN_BUTTONS, 2);
    keyboard.push(back_to_main());
    let text = text.unwrap_or_else(|| {
        format!(
            "Вітаємо {}, що адмінимо сьогодні?",
            escape_html(user.nickname.as_deref().unwrap_or(""))
        )
    });
    (text, keyboard)
}

pub fn admin_stat_text(command: MenuCommand, stats: &UserStats) -> Option<String> {
    match command {
        MenuCommand::TotalUsers => Some(format!("Всього користувачів: {}", stats.total)),
        MenuCommand::RecentHourUsers => Some(format!("Користувачів за останню годину: {}", stats.active_last_hour)),
        MenuCommand::TotalSubscribedUsers => Some(format!("Всього користувачів з підпискою: {}", stats.subscribed)),
        _ => None,
    }
}

pub fn help_prompt() -> (String, Keyboard) {
    (HELP_ASK_TEXT.to_string(), vec![back_to_main()])
}

pub fn help_confirm(message: &str) -> (String, Keyboard) {
    let text = format!(
        "Перевірте будь ласка ваше повідомлення.\nВаше повідомлення:\n▶️<b>{}</b>\n\n\
         ▪️ Якщо все гаразд, то натисніть кнопку <b><i>\"{}\"</i></b>\n\
         ▪️ Якщо бажаєте змінити повідомлення, то надішліть нове повідомлення.\n\
         ▪️ Щоб повернутися в головне меню, то натисніть кнопку {}",
        escape_html(message),
        SUBMIT_HELP_TEXT,
        HOME_TEXT
    );
    let keyboard = vec![
        vec![Button::callback(SUBMIT_HELP_TEXT, SUBMIT_HELP)],
        vec![Button::callback(HOME_TEXT, MAIN_MENU_STATE)],
    ];
    (text, keyboard)
}

pub fn help_request_text(user_id: i64, nickname: Option<&str>, message: &str) -> String {
    format!(
        "Користувач з Telegram ID: <b>{}</b>, Username: <b>@{}</b> потребує допомоги.\n\
         Повідомлення від користувача:\n{}",
        user_id,
        escape_html(nickname.unwrap_or("-")),
        escape_html(message)
    )
}

/// Экран после завершения анкеты или подписки: одна кнопка домой
pub fn home_only() -> Keyboard {
    vec![vec![Button::callback(HOME_TEXT, MAIN_MENU_STATE)]]
}
