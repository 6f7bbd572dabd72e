use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};

/// Natural-language due-date parsing over a closed vocabulary.
///
/// Recognized tokens: `aujourd'hui`/`today`, `demain`/`tomorrow`, and weekday
/// names in French or English, optionally prefixed with `prochain`/`next`.
/// A weekday resolves to its next occurrence strictly after `today`. The
/// result is always pinned to 23:59:59 of the target day; anything outside
/// the vocabulary returns `None`.
pub fn parse_due_date(text: &str, today: NaiveDate) -> Option<NaiveDateTime> {
    let normalized = normalize(text);
    let token = normalized
        .strip_prefix("prochain ")
        .or_else(|| normalized.strip_prefix("next "))
        .unwrap_or(&normalized);

    let target = match token {
        "aujourd'hui" | "aujourdhui" | "today" => today,
        "demain" | "tomorrow" => today + Duration::days(1),
        other => next_weekday(today, weekday_from_name(other)?),
    };

    Some(target.and_time(end_of_day()))
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase().replace('’', "'")
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 59).unwrap_or_default()
}

fn weekday_from_name(name: &str) -> Option<Weekday> {
    match name {
        "lundi" | "monday" => Some(Weekday::Mon),
        "mardi" | "tuesday" => Some(Weekday::Tue),
        "mercredi" | "wednesday" => Some(Weekday::Wed),
        "jeudi" | "thursday" => Some(Weekday::Thu),
        "vendredi" | "friday" => Some(Weekday::Fri),
        "samedi" | "saturday" => Some(Weekday::Sat),
        "dimanche" | "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

fn next_weekday(today: NaiveDate, target: Weekday) -> NaiveDate {
    let current = today.weekday().num_days_from_monday() as i64;
    let wanted = target.num_days_from_monday() as i64;
    let mut ahead = (wanted - current).rem_euclid(7);
    if ahead == 0 {
        ahead = 7;
    }
    today + Duration::days(ahead)
}
