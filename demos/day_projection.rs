//! Print a steps card every two hours across a spring-forward day

use chrono::{Duration, NaiveDate};
use chrono_tz::America::New_York;

use ontrack::calendar;
use ontrack::{MetricEngine, MetricType, Settings};

fn main() {
    let engine = MetricEngine::with_settings(MetricType::Steps, Settings::default());
    let Some(date) = NaiveDate::from_ymd_opt(2024, 3, 10) else {
        return;
    };

    let start = calendar::start_of_day(&New_York, date);
    for hour in (0..24).step_by(2) {
        let instant = (start + Duration::hours(hour)).with_timezone(&New_York);
        // Pretend the user walks 450 steps an hour
        let achieved = 450.0 * hour as f64;
        match engine.card_view(achieved, &instant) {
            Ok(card) => println!(
                "{}  {:>8}  {:>5}  {:?}",
                instant.format("%H:%M %Z"),
                card.ahead_string,
                card.ahead_percent_string,
                card.arc().tier
            ),
            Err(reason) => eprintln!("Error: {reason}"),
        }
    }
}
