use crate::store::{AdSubmission, Listing, UserStats};

/// Строки подписи канала, которые не нужны в пересланном объявлении
const CAPTION_BOILERPLATE: &[&str] = &[
    "підписуйтесь",
    "підпишись на канал",
    "наш канал",
    "t.me/",
    "зв'язатися з рієлтором",
    "звʼязатися з рієлтором",
];

/// Убирает служебные строки и лишние пустые строки из подписи.
/// Возвращает `None`, если после чистки ничего не осталось.
pub fn clean_caption(caption: &str) -> Option<String> {
    let mut lines: Vec<&str> = Vec::new();
    for line in caption.lines() {
        let lower = line.to_lowercase();
        if CAPTION_BOILERPLATE.iter().any(|marker| lower.contains(marker)) {
            continue;
        }
        // Не больше одной пустой строки подряд
        if line.trim().is_empty() && lines.last().map_or(true, |l| l.trim().is_empty()) {
            continue;
        }
        lines.push(line.trim_end());
    }
    while lines.last().map_or(false, |l| l.trim().is_empty()) {
        lines.pop();
    }

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Текстовая ссылка вместо пересылки, когда сработал flood control
pub fn format_listing_link(listing: &Listing) -> String {
    let mut text = format!("🏠 {}", escape_html(&listing.district));
    if let Some(street) = &listing.street {
        text.push_str(&format!(", {}", escape_html(street)));
    }
    text.push_str(&format!(
        "\n💰 {} {}\n{}",
        listing.rent_price.round() as i64,
        listing.currency,
        listing.link
    ));
    text
}

pub fn format_stats(stats: &UserStats) -> String {
    format!(
        "👥 <b>Статистика</b>\n\nВсього користувачів: {}\nЗа минулу годину: {}\nВсього з підпискою: {}",
        stats.total, stats.active_last_hour, stats.subscribed
    )
}

/// Заявка для операторов
pub fn format_submission(submission: &AdSubmission, nickname: Option<&str>) -> String {
    let mut text = String::from("📝 <b>Нова заявка на розміщення</b>\n");
    match nickname {
        Some(nick) => text.push_str(&format!("Користувач: @{} ({})\n", escape_html(nick), submission.user_id)),
        None => text.push_str(&format!("Користувач: {}\n", submission.user_id)),
    }
    text.push('\n');
    for field in &submission.answers {
        text.push_str(&format!("<b>{}</b>: {}\n", escape_html(&field.name), escape_html(&field.value)));
    }
    if !submission.photos.is_empty() {
        text.push_str(&format!("\nФото: {}", submission.photos.len()));
    }
    text
}

pub fn format_error(error: &str) -> String {
    format!("❌ <b>Помилка:</b> {}", escape_html(error))
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
