//! Конкретные цепочки шагов: поиск квартир, поиск домов, анкета размещения.

use serde::{Deserialize, Serialize};

use super::filters::{
    BucketStep, ColumnStep, GeoStep, RangeMode, RangeStep, ReviewStep, RoomsStep, StagedStep, ADDITIONAL_GROUPS,
    LIVING_AREA_BUCKETS,
};
use super::questions::{ChoiceQuestion, PhotoQuestion, TextChoiceQuestion, TextQuestion, Validator};
use super::step::StepKind;
use crate::query::{Column, Predicate, Value};
use crate::store::ListingKind;

pub const FILTERS_HEADER: &str = "Обрані фільтри:";
pub const QUESTIONS_HEADER: &str = "📝 <b>Анкета для розміщення оголошення</b>\n";
pub const SHOW_RESULTS_TEXT: &str = "Показати результати 🔎";
pub const SUBSCRIBE_FINISH_TEXT: &str = "Підписатися 📩";
pub const SUBMIT_TEXT: &str = "Відправити ✅";

pub const FILTER_STATE_KEY: &str = "filter_state";
pub const QUESTION_STATE_KEY: &str = "question_state";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Apartments,
    Houses,
    AdSubmission,
}

impl FlowKind {
    pub fn flow(&self) -> Flow {
        match self {
            FlowKind::Apartments => apartments(),
            FlowKind::Houses => houses(),
            FlowKind::AdSubmission => ad_submission(),
        }
    }

    /// Поиск и анкета хранятся под разными ключами сессии
    pub fn session_key(&self) -> &'static str {
        match self {
            FlowKind::Apartments | FlowKind::Houses => FILTER_STATE_KEY,
            FlowKind::AdSubmission => QUESTION_STATE_KEY,
        }
    }

    pub fn is_search(&self) -> bool {
        !matches!(self, FlowKind::AdSubmission)
    }
}

pub struct Flow {
    pub kind: FlowKind,
    pub header: &'static str,
    /// Ограничение, с которого начинается свёртка (тип объекта)
    pub base: Predicate,
    pub steps: Vec<StepKind>,
}

impl Flow {
    pub fn finish_label(&self, subscription_mode: bool) -> &'static str {
        match self.kind {
            FlowKind::AdSubmission => SUBMIT_TEXT,
            _ if subscription_mode => SUBSCRIBE_FINISH_TEXT,
            _ => SHOW_RESULTS_TEXT,
        }
    }
}

fn kind_filter(kind: ListingKind) -> Predicate {
    Predicate::eq(Column::Kind, Value::text(kind.as_str()))
}

const REVIEW_FILTERS_PROMPT: &str = "Перевірте обрані фільтри 👆";

pub fn apartments() -> Flow {
    Flow {
        kind: FlowKind::Apartments,
        header: FILTERS_HEADER,
        base: kind_filter(ListingKind::Apartment),
        steps: vec![
            StepKind::Geo(GeoStep {
                title: "Локація",
                districts_title: "Райони",
            }),
            StepKind::Column(ColumnStep::new("ЖК", Column::ResidentialComplex)),
            StepKind::Rooms(RoomsStep::new("Кількість кімнат")),
            StepKind::NumericRange(RangeStep {
                title: "Ціна",
                column: Column::RentPrice,
                mode: RangeMode::Ceiling,
            }),
            StepKind::Staged(StagedStep {
                title: "Додаткові фільтри",
                groups: ADDITIONAL_GROUPS,
            }),
            StepKind::Review(ReviewStep {
                prompt: REVIEW_FILTERS_PROMPT,
            }),
        ],
    }
}

pub fn houses() -> Flow {
    Flow {
        kind: FlowKind::Houses,
        header: FILTERS_HEADER,
        base: kind_filter(ListingKind::House),
        steps: vec![
            StepKind::Column(ColumnStep::new("Райони", Column::District)),
            StepKind::Rooms(RoomsStep::new("Кількість кімнат")),
            StepKind::Buckets(BucketStep {
                title: "Площа",
                column: Column::LivingArea,
                buckets: LIVING_AREA_BUCKETS,
            }),
            StepKind::NumericRange(RangeStep {
                title: "Ціна",
                column: Column::RentPrice,
                mode: RangeMode::Bounds,
            }),
            StepKind::Review(ReviewStep {
                prompt: REVIEW_FILTERS_PROMPT,
            }),
        ],
    }
}

pub fn ad_submission() -> Flow {
    Flow {
        kind: FlowKind::AdSubmission,
        header: QUESTIONS_HEADER,
        base: Predicate::All,
        steps: vec![
            StepKind::Choice(ChoiceQuestion {
                name: "Ви",
                prompt: "Ви власник чи рієлтор?",
                items: &["Власник", "Рієлтор"],
                multiple: false,
                skippable: false,
            }),
            StepKind::Text(TextQuestion::new(
                "Адреса",
                "Вкажіть адресу Вашої квартири.",
                "<b>❗Відправляти повідомлення у форматі</b>: <i>\"Назва вулиці\" \"Номер будинку\"</i>\n\
                 Наприклад:\n--> <i>Трускавецька 2</i>\n--> <i>Княгині Ольги 125а</i>",
            )),
            StepKind::TextChoice(TextChoiceQuestion {
                name: "Жк",
                prompt: "Вкажіть Жк в якому знаходиться Ваша квартира.",
                sample: "❗<b>Наприклад:</b>\n--> <i>Парус Парк</i>\n--> <i>Львівський Дворик</i>\n\
                         Якщо Ви не знаєте назву ЖК, оберіть варіант <b>\"Не знаю ЖК\"</b> і натисніть <b>\"Далі\"</b>.",
                items: &["Не знаю ЖК"],
            }),
            StepKind::Text(
                TextQuestion::new(
                    "Кількість кімнат",
                    "Вкажіть кількість окремих кімнат.",
                    "❗<b>Наприклад:</b>\n--> <i>4</i>\n--> <i>2</i>",
                )
                .validator(Validator::PositiveInt),
            ),
            StepKind::Text(
                TextQuestion::new(
                    "Площа",
                    "Вкажіть площу Вашої квартири.",
                    "❗<b>Наприклад:</b>\n--> <i>50</i>",
                )
                .suffix("м2")
                .validator(Validator::Amount),
            ),
            StepKind::Text(
                TextQuestion::new(
                    "Поверх",
                    "Вкажіть поверх Вашої квартири, та поверхневість будинку.",
                    "❗️Поверх та поверхневість потрібно розділити знаком <b>\"/\"</b>\nНаприклад:\n--> <i>8/12</i>",
                )
                .validator(Validator::Floor),
            ),
            StepKind::Text(TextQuestion::new(
                "Ціна",
                "Напишіть ціну та валюту орендної плати.",
                "❗Наприклад:\n--> <i>15000 грн</i>\n--> <i>1000 євро</i>",
            )),
            StepKind::Choice(ChoiceQuestion {
                name: "Додаткова інформація",
                prompt: "Оберіть додаткову інформацію, яка допоможе швидше та якісніше здати квартиру\n\n\
                         ❗️Оберіть всі потрібні варіанти та натисніть кнопку <b>\"Далі\"</b>, \
                         або натисніть кнопку <b>\"Пропустити\"</b>",
                items: &["Можна з тваринами", "Можна з дітьми", "Є кондиціонер"],
                multiple: true,
                skippable: true,
            }),
            StepKind::Photos(PhotoQuestion {
                name: "Фотографії",
                prompt: "Якщо в вас є фотографії обʼєкта, натисніть кнопку <i>\"Маю фото\"</i>,\n\
                         або натисніть кнопку <i>\"Потрібен фотограф\"</i>",
                sample: "❗️Надішліть боту фотографії вашого обʼєкта.\n\
                         Можливо відправити фотографії як файлом, так і звичайним фото.",
            }),
            StepKind::Text(TextQuestion::new("Імʼя", "Як до Вас звертатись?", "❗Напишіть мені своє імʼя.")),
            StepKind::Text(
                TextQuestion::new("Номер телефону", "Вкажіть Ваш контактний номер телефону.", "")
                    .validator(Validator::Phone),
            ),
            StepKind::Review(ReviewStep {
                prompt: "\n❗️<b>Будь ласка, перевірте ваші відповіді!\n\
                         Якщо щось не правильно, то ви можете повернутися назад та змінити їх</b>\n\
                         Якщо всі дані надано правильно, натисніть кнопку <b>Відправити</b>.",
            }),
        ],
    }
}
