//! Пошаговый визард: фильтры поиска и вопросы анкеты на одном движке.
//!
//! Состояние диалога ([`ConversationState`]) хранится в сессии пользователя, шаги собираются заново
//! на каждом апдейте из описания потока ([`flows`]), а [`WizardManager`] решает, что делать с действием.

pub mod action;
pub mod filters;
pub mod flows;
pub mod keyboard;
pub mod manager;
pub mod questions;
pub mod state;
pub mod step;

pub use action::Action;
pub use flows::{Flow, FlowKind};
pub use manager::{Outcome, WizardManager, WizardSession};
pub use state::ConversationState;
pub use step::{Chain, StepKind};
