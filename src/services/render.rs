//! Turns fetched grades and diaries into message text.

use chrono::{Datelike, NaiveDate};
use std::collections::BTreeSet;

use crate::database::models::{DateWindow, DisplayMode, GradeFilters, Grades, Mark, NotificationSettings};
use crate::error::ProviderError;
use crate::services::provider::{with_reauthentication, DataProvider, Lesson};

fn in_window(mark: &Mark, window: DateWindow, today: NaiveDate) -> bool {
    let Some(given) = mark.given_on() else {
        return false;
    };
    match window {
        DateWindow::Day => given == today,
        DateWindow::Week => given.iso_week() == today.iso_week(),
        DateWindow::Month => given.year() == today.year() && given.month() == today.month(),
    }
}

/// Keeps the selected lessons and the marks passing the value and date
/// filters. Lessons left without marks are dropped unless
/// `show_without_marks` is set.
pub fn apply_filters(grades: &Grades, filters: &GradeFilters, today: NaiveDate) -> Grades {
    grades
        .iter()
        .filter(|(lesson, _)| filters.lessons.includes(lesson))
        .map(|(lesson, marks)| {
            let kept: Vec<Mark> = marks
                .iter()
                .filter(|mark| filters.marks.contains(&mark.mark))
                .filter(|mark| filters.dates.map_or(true, |window| in_window(mark, window, today)))
                .cloned()
                .collect();
            (lesson.clone(), kept)
        })
        .filter(|(_, marks)| filters.show_without_marks || !marks.is_empty())
        .collect()
}

/// `lesson: m m m` per lesson
pub fn render_list(grades: &Grades) -> String {
    grades
        .iter()
        .map(|(lesson, marks)| {
            if marks.is_empty() {
                format!("{lesson}: нет оценок")
            } else {
                let marks: Vec<String> = marks.iter().map(|m| m.mark.to_string()).collect();
                format!("{lesson}: {}", marks.join(" "))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Average and per-mark counts per lesson, counts listed for every
/// selected mark value from highest to lowest
pub fn render_statistics(grades: &Grades, selected: &BTreeSet<i64>) -> String {
    grades
        .iter()
        .map(|(lesson, marks)| {
            if marks.is_empty() {
                return format!("{lesson}: нет оценок");
            }
            let sum: i64 = marks.iter().map(|m| m.mark).sum();
            let average = sum as f64 / marks.len() as f64;
            let counts: Vec<String> = selected
                .iter()
                .rev()
                .map(|value| {
                    let count = marks.iter().filter(|m| m.mark == *value).count();
                    format!("{value}: {count}")
                })
                .collect();
            format!("{lesson}: средний {average:.2} | {}", counts.join(", "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Full text of a grade notification
pub fn render_grades(settings: &NotificationSettings, grades: &Grades, today: NaiveDate) -> String {
    let filtered = apply_filters(grades, &settings.filters, today);
    if filtered.is_empty() {
        return format!("{}\nнет оценок по выбранным фильтрам", settings.name);
    }

    let body = match settings.display_mode {
        DisplayMode::List => render_list(&filtered),
        DisplayMode::Statistics => render_statistics(&filtered, &settings.filters.marks),
    };
    format!("{}\n{}", settings.name, body)
}

/// Timetable of one day: number, time range, name and homework per lesson
pub fn render_timetable(date: NaiveDate, lessons: &[Lesson]) -> String {
    let header = format!("расписание на {}", date.format("%d.%m.%Y"));
    if lessons.is_empty() {
        return format!("{header}\nуроков нет");
    }

    let mut lines = vec![header];
    for lesson in lessons {
        let mut line = format!("{}. ", lesson.number);
        if let (Some(start), Some(end)) = (&lesson.start_time, &lesson.end_time) {
            line.push_str(&format!("{start}-{end} "));
        }
        line.push_str(&lesson.name);
        if let Some(homework) = lesson.homework.as_deref().filter(|h| !h.trim().is_empty()) {
            line.push_str(&format!("\n   дз: {homework}"));
        }
        lines.push(line);
    }
    lines.join("\n")
}

/// Fetches the day's lessons and renders them, or the reason they could not
/// be fetched
pub async fn timetable_message(provider: &dyn DataProvider, user_id: i64, date: NaiveDate) -> String {
    match with_reauthentication(provider, user_id, || provider.schedule(user_id, date)).await {
        Ok(lessons) => render_timetable(date, &lessons),
        Err(e) => render_failure(&e),
    }
}

/// Short text telling the user why fresh data could not be fetched
pub fn render_failure(err: &ProviderError) -> String {
    match err {
        ProviderError::Registration { message, .. } => format!(
            "не удалось войти в электронный дневник: {message}\nобновите данные командой /register <логин> <пароль>"
        ),
        ProviderError::NotRegistered(_) => {
            "вы не зарегистрированы, используйте /register <логин> <пароль>".to_string()
        }
        ProviderError::DataProcess(message) => {
            format!("не удалось обработать данные дневника: {message}")
        }
        ProviderError::Store(_) => "внутренняя ошибка, попробуйте позже".to_string(),
    }
}
