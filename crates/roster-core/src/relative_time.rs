use chrono::{DateTime, Duration, Utc};

fn plural(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{count} {unit}s ago")
    }
}

/// Human phrase for an elapsed duration, e.g. "3 hours ago".
pub fn time_ago(elapsed: Duration) -> String {
    let elapsed = elapsed.max(Duration::zero());
    let minutes = elapsed.num_minutes();
    if minutes < 1 {
        return "moments ago".to_string();
    }
    if minutes < 60 {
        return plural(minutes, "minute");
    }
    let hours = elapsed.num_hours();
    if hours < 24 {
        return plural(hours, "hour");
    }
    let days = elapsed.num_days();
    if days < 7 {
        plural(days, "day")
    } else if days < 30 {
        plural(days / 7, "week")
    } else if days < 365 {
        plural(days / 30, "month")
    } else {
        plural(days / 365, "year")
    }
}

pub fn time_ago_since(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    time_ago(now - then)
}

pub fn last_online_text(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    format!("Last online {}", time_ago_since(then, now))
}

/// Banner shown while the network link is down.
pub fn disconnection_banner(since: Option<Duration>) -> String {
    match since {
        Some(elapsed) => format!("Disconnected {}", time_ago(elapsed)),
        None => "Steam Disconnected".to_string(),
    }
}
