//! Display helpers for market data.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// Split a unified `BASE/QUOTE` symbol. Returns `None` when there is no `/`.
pub fn parse_symbol(symbol: &str) -> Option<(&str, &str)> {
    let (base, quote) = symbol.split_once('/')?;
    if base.is_empty() || quote.is_empty() {
        return None;
    }
    Some((base, quote))
}

/// Fixed precision with thousands separators, e.g. `65,432.10`.
pub fn format_price(price: Decimal, precision: u32) -> String {
    let rounded = price.round_dp(precision);
    let text = format!("{:.*}", precision as usize, rounded);
    let (sign, digits) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text.as_str()),
    };
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    match frac_part {
        Some(f) => format!("{sign}{grouped}.{f}"),
        None => format!("{sign}{grouped}"),
    }
}

/// Signed percentage with two decimals, e.g. `+1.25%`.
pub fn format_change(change: Decimal) -> String {
    let sign = if change >= Decimal::ZERO { "+" } else { "" };
    format!("{sign}{:.2}%", change.round_dp(2))
}

/// Compact volume with K/M/B suffixes.
pub fn format_volume(volume: Decimal) -> String {
    let billion = Decimal::from(1_000_000_000u64);
    let million = Decimal::from(1_000_000u64);
    let thousand = Decimal::from(1_000u64);

    if volume >= billion {
        format!("{:.2}B", (volume / billion).round_dp(2))
    } else if volume >= million {
        format!("{:.2}M", (volume / million).round_dp(2))
    } else if volume >= thousand {
        format!("{:.2}K", (volume / thousand).round_dp(2))
    } else {
        volume.normalize().to_string()
    }
}

/// Data older than this is reported as a closed market.
pub const STALE_AFTER_MINUTES: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MarketStatus {
    Open,
    Closed { minutes_ago: i64 },
}

impl MarketStatus {
    pub fn message(&self) -> String {
        match self {
            MarketStatus::Open => "Market is open".to_string(),
            MarketStatus::Closed { minutes_ago } => {
                format!("Market data is {minutes_ago} minutes old")
            }
        }
    }
}

pub fn market_status(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> MarketStatus {
    let minutes_ago = (now - timestamp).num_minutes();
    if minutes_ago > STALE_AFTER_MINUTES {
        MarketStatus::Closed { minutes_ago }
    } else {
        MarketStatus::Open
    }
}

/// Join a base URL and an endpoint path with exactly one `/`.
pub fn api_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}
