//! Text helpers for Telegram HTML messages

use alloy_primitives::Address;

use crate::utils::constants::TELEGRAM_MAX_MESSAGE_LEN;

/// Escape the three characters Telegram's HTML parse mode cares about
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Lowercase 0x-prefixed hex, the form used in alerts and storage
pub fn addr_lower(address: &Address) -> String {
    format!("{:#x}", address)
}

/// `0x1234…abcd`
pub fn short_addr(address: &Address) -> String {
    let full = addr_lower(address);
    format!("{}…{}", &full[..6], &full[full.len() - 4..])
}

/// Whole dollars with thousands separators: 1234567.8 → "1,234,568"
pub fn format_usd(value: f64) -> String {
    let rounded = value.round().max(0.0) as u128;
    let digits = rounded.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Cut a message to Telegram's limit on a char boundary
pub fn truncate_message(text: &str) -> String {
    if text.len() <= TELEGRAM_MAX_MESSAGE_LEN {
        return text.to_string();
    }
    let mut end = TELEGRAM_MAX_MESSAGE_LEN - 3;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// `3h 12m`
pub fn format_uptime(secs: u64) -> String {
    format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
}
