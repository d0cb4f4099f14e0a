//! Parameter extraction from raw query text
//!
//! Pure string handling: no allocation-heavy parsing, no regexes, and the
//! same text always yields the same parameters.

use crate::models::{Capability, ToolParams};
use serde_json::{json, Value};

/// Uppercase words that look like tickers but are not
const TICKER_STOPLIST: &[&str] = &[
    "I", "A", "AM", "PM", "OK", "USD", "INR", "ETF", "CEO", "AI", "IPO", "GDP", "US", "UK",
    "EU", "THE", "AND", "SIP", "RSI", "EMI", "MY", "ME", "IT",
];

const CURRENCY_WORDS: &[&str] = &[
    "rupees", "rupee", "rs", "rs.", "inr", "dollars", "dollar", "usd", "bucks",
];

/// Words that never name an expense category
const CATEGORY_STOPWORDS: &[&str] = &[
    "the", "a", "an", "my", "this", "that", "last", "expense", "expenses", "today",
    "yesterday", "and", "of", "me", "it", "in", "at", "on", "for", "to", "was", "is",
];

const GOAL_PREFIXES: &[&str] = &[
    "set a goal to ",
    "set a goal of ",
    "set a goal: ",
    "set goal ",
    "add a goal to ",
    "add a goal: ",
    "add goal ",
    "new goal: ",
    "new goal ",
    "my goal is to ",
    "goal: ",
];

const SEARCH_PREFIXES: &[&str] = &[
    "search the web for ",
    "search for ",
    "search ",
    "look up ",
    "google ",
    "find ",
];

/// Facts carried over from earlier turns (or earlier segments of the same query)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hints {
    pub last_ticker: Option<String>,
    pub last_goal_id: Option<u64>,
}

/// Strip surrounding punctuation from a whitespace token.
fn trim_token(token: &str) -> &str {
    token.trim_matches(|c: char| matches!(c, '?' | ',' | '!' | ':' | ';' | '"' | '(' | ')' | '\''))
        .trim_end_matches('.')
}

/// Lowercased, punctuation-trimmed tokens used for keyword matching
pub fn tokens(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|t| trim_token(t).to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

pub fn extract_ticker(text: &str) -> Option<String> {
    for raw in text.split_whitespace() {
        let token = trim_token(raw);

        if let Some(tag) = token.strip_prefix('$') {
            if (1..=5).contains(&tag.len()) && tag.chars().all(|c| c.is_ascii_alphabetic()) {
                return Some(tag.to_ascii_uppercase());
            }
            continue;
        }

        let token = token.strip_suffix("'s").unwrap_or(token);
        if (1..=5).contains(&token.len())
            && token.chars().all(|c| c.is_ascii_uppercase())
            && !TICKER_STOPLIST.contains(&token)
        {
            return Some(token.to_string());
        }
    }
    None
}

fn parse_amount_token(token: &str) -> Option<f64> {
    let lower = token.to_lowercase();
    let stripped = lower
        .trim_start_matches('$')
        .trim_start_matches('₹')
        .trim_start_matches("rs.")
        .trim_start_matches("rs");

    if stripped.is_empty() || !stripped.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }

    let cleaned: String = stripped.chars().filter(|c| *c != ',').collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite() && *v > 0.0)
}

/// First monetary amount in the text and the index of its token
fn find_amount(words: &[&str]) -> Option<(usize, f64)> {
    words
        .iter()
        .enumerate()
        .find_map(|(i, w)| parse_amount_token(trim_token(w)).map(|v| (i, v)))
}

pub fn extract_amount(text: &str) -> Option<f64> {
    let words: Vec<&str> = text.split_whitespace().collect();
    find_amount(&words).map(|(_, v)| v)
}

fn category_candidate(word: &str) -> Option<String> {
    let word = trim_token(word).to_lowercase();
    if word.is_empty()
        || CATEGORY_STOPWORDS.contains(&word.as_str())
        || CURRENCY_WORDS.contains(&word.as_str())
        || !word.chars().all(|c| c.is_alphabetic() || c == '-')
    {
        None
    } else {
        Some(word)
    }
}

/// "on X" / "for X", the word after the amount otherwise.
pub fn extract_category(text: &str, allow_after_amount: bool) -> Option<String> {
    let words: Vec<&str> = text.split_whitespace().collect();

    for pair in words.windows(2) {
        let marker = trim_token(pair[0]).to_lowercase();
        if marker == "on" || marker == "for" {
            if let Some(category) = category_candidate(pair[1]) {
                return Some(category);
            }
        }
    }

    if !allow_after_amount {
        return None;
    }

    let (index, _) = find_amount(&words)?;
    words
        .iter()
        .skip(index + 1)
        .map(|w| trim_token(w).to_lowercase())
        .find(|w| !CURRENCY_WORDS.contains(&w.as_str()))
        .and_then(|w| category_candidate(&w))
}

pub fn extract_period_days(text: &str) -> Option<u64> {
    let words = tokens(text);

    for (i, word) in words.iter().enumerate() {
        if word == "days" || word == "day" {
            if let Some(n) = i
                .checked_sub(1)
                .and_then(|p| words[p].parse::<u64>().ok())
            {
                return Some(n.max(1));
            }
        }
    }

    let has = |w: &str| words.iter().any(|t| t == w);
    if has("today") {
        Some(1)
    } else if has("week") || has("weekly") {
        Some(7)
    } else if has("month") || has("monthly") {
        Some(30)
    } else if has("quarter") {
        Some(90)
    } else if has("year") || has("yearly") || has("annual") {
        Some(365)
    } else {
        None
    }
}

pub fn extract_goal_id(text: &str) -> Option<u64> {
    let words = tokens(text);
    words.iter().enumerate().find_map(|(i, word)| {
        if let Some(id) = word.strip_prefix('#') {
            return id.parse().ok();
        }
        if word == "goal" {
            return words
                .get(i + 1)
                .and_then(|next| next.trim_start_matches('#').parse().ok());
        }
        None
    })
}

fn strip_prefixes<'a>(text: &'a str, prefixes: &[&str]) -> &'a str {
    let lower = text.to_ascii_lowercase();
    prefixes
        .iter()
        .find(|p| lower.starts_with(*p))
        .map(|p| &text[p.len()..])
        .unwrap_or(text)
}

fn clean_phrase(text: &str) -> String {
    text.trim()
        .trim_end_matches(['?', '.', '!'])
        .trim()
        .to_string()
}

pub fn extract_goal_text(text: &str) -> Option<String> {
    let goal = clean_phrase(strip_prefixes(text.trim(), GOAL_PREFIXES));
    (!goal.is_empty()).then_some(goal)
}

pub fn extract_search_text(text: &str) -> Option<String> {
    let query = clean_phrase(strip_prefixes(text.trim(), SEARCH_PREFIXES));
    (!query.is_empty()).then_some(query)
}

/// Words a short answer may lead with before the value itself
const ANSWER_LEADS: &[&str] = &["for", "on", "under", "it's", "its", "it", "is", "just"];

/// Longest reply still taken as a bare answer to a free-text question
const MAX_ANSWER_WORDS: usize = 3;

/// A short reply such as "groceries" or "for eating out" that answers a
/// question about a single free-text field.
pub fn extract_bare_answer(text: &str) -> Option<String> {
    let words = tokens(text);
    let start = words
        .iter()
        .position(|w| !ANSWER_LEADS.contains(&w.as_str()))?;
    let answer = &words[start..];

    let plain = answer
        .iter()
        .all(|w| w.chars().all(|c| c.is_alphabetic() || c == '-'));
    (answer.len() <= MAX_ANSWER_WORDS && plain).then(|| answer.join(" "))
}

/// Extract the parameters `capability` understands from `text`.
pub fn extract_params(capability: Capability, text: &str, hints: &Hints) -> ToolParams {
    let mut params = ToolParams::new();
    let mut put = |name: &str, value: Option<Value>| {
        if let Some(value) = value {
            params.insert(name.to_string(), value);
        }
    };

    match capability {
        Capability::ExpenseAdd => {
            put("amount", extract_amount(text).map(|a| json!(a)));
            put("category", extract_category(text, true).map(Value::String));
        }
        Capability::ExpenseQuery => {
            put("category", extract_category(text, false).map(Value::String));
            put("period_days", extract_period_days(text).map(|d| json!(d)));
        }
        Capability::ExpenseSummary => {
            put("period_days", extract_period_days(text).map(|d| json!(d)));
        }
        Capability::GoalAdd => {
            put("goal_text", extract_goal_text(text).map(Value::String));
            put("target_amount", extract_amount(text).map(|a| json!(a)));
        }
        Capability::GoalProgress => {
            put(
                "goal_id",
                extract_goal_id(text).or(hints.last_goal_id).map(|id| json!(id)),
            );
        }
        Capability::MarketPrice | Capability::MarketNews => {
            put(
                "ticker",
                extract_ticker(text)
                    .or_else(|| hints.last_ticker.clone())
                    .map(Value::String),
            );
        }
        Capability::WebSearch => {
            put("text", extract_search_text(text).map(Value::String));
        }
        Capability::Clarify => {}
    }

    params
}
