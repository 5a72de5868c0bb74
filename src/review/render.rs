//! Notification text for finished reviews.

use super::ReviewAttempt;

/// Renders the message sent for one review.
///
/// Lesson title and URL are inserted verbatim; the message is plain text, so
/// no escaping is applied.
#[must_use]
pub fn render_attempt(attempt: &ReviewAttempt) -> String {
    let verdict = if attempt.is_negative {
        "К сожалению, в работе найдены ошибки."
    } else {
        "Преподавателю всё понравилось, можете приступать к следующему уроку!"
    };

    format!(
        "У Вас проверили работу «{title}».\n\n{verdict}\n\nСсылка на урок: {url}.",
        title = attempt.lesson_title,
        url = attempt.lesson_url,
    )
}
