//! Number formatting for display strings
//!
//! Values arrive in a metric's native unit and are converted with the user's
//! chosen unit multiplier before rounding. Rounding is half-to-even on the
//! converted value, so a near-tie such as 0.35 rounds by its binary value
//! (down, to 0.3) rather than as if it were exact.

use crate::settings::Settings;
use crate::types::{MetricProfile, MetricType};

/// Formatting rules for one metric under one set of unit choices
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumberFormat {
    pub precision: usize,
    /// Native unit to display unit
    pub multiplier: f64,
    pub unit_abbrev: Option<&'static str>,
}

impl NumberFormat {
    pub fn for_settings(profile: &MetricProfile, settings: &Settings) -> Self {
        let (multiplier, unit_abbrev) = match profile.units {
            Some(table) => {
                let choice = match profile.metric {
                    MetricType::Energy => usize::from(settings.is_kj),
                    MetricType::Distance => usize::from(settings.is_imperial),
                    _ => 0,
                };
                (table.multipliers[choice], Some(table.abbrevs[choice]))
            }
            None => (1.0, None),
        };
        Self {
            precision: profile.precision,
            multiplier,
            unit_abbrev,
        }
    }

    /// Format a native-unit value.
    ///
    /// `force_sign` prefixes non-negative results with "+".
    pub fn format(&self, value: f64, commas: bool, force_sign: bool) -> String {
        // Unit conversion runs at single precision; the product is then
        // rounded half-to-even on its exact binary value.
        let converted = f64::from(value as f32 * self.multiplier as f32);
        let mut text = format!("{:.*}", self.precision, converted);
        if is_negative_zero(&text) {
            text.remove(0);
        }
        if commas {
            text = group_thousands(&text);
        }
        if force_sign {
            text = prepend_plus(text);
        }
        text
    }

    /// Format with separators, followed by the unit abbreviation if any
    pub fn format_with_unit(&self, value: f64) -> String {
        let text = self.format(value, true, false);
        match self.unit_abbrev {
            Some(abbrev) => format!("{text} {abbrev}"),
            None => text,
        }
    }
}

/// "-0", "-0.00" and the like
fn is_negative_zero(text: &str) -> bool {
    text.strip_prefix('-')
        .is_some_and(|digits| digits.chars().all(|c| c == '0' || c == '.'))
}

/// Whole-number percentage of a proportion, rounded half up, e.g. "+12%"
pub fn format_percent(proportion: f64) -> String {
    let percent = (proportion * 100.0 + 0.5).floor() as i64;
    format!("{}%", prepend_plus(percent.to_string()))
}

/// Prefix "+" unless the text is already negative
pub fn prepend_plus(text: String) -> String {
    if text.starts_with('-') {
        text
    } else {
        format!("+{text}")
    }
}

/// Insert comma separators into the integer part of a formatted number
fn group_thousands(text: &str) -> String {
    let (sign, unsigned) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text),
    };
    let (integer, fraction) = match unsigned.find('.') {
        Some(dot) => unsigned.split_at(dot),
        None => (unsigned, ""),
    };

    let mut grouped = String::with_capacity(text.len() + integer.len() / 3);
    grouped.push_str(sign);
    for (i, digit) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    grouped.push_str(fraction);
    grouped
}
