//! Spending summaries and rule-based feedback
//!
//! Deterministic: the same ledger records always yield the same summary.

use crate::services::{LedgerEntry, LedgerRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Recommended maximum share of spending per category, in percent
const BUDGET_GUIDELINES: &[(&str, f64)] = &[
    ("food", 30.0),
    ("transport", 15.0),
    ("entertainment", 10.0),
    ("shopping", 20.0),
];
const DEFAULT_GUIDELINE: f64 = 25.0;
const DOMINANT_CATEGORY_SHARE: f64 = 0.4;
const HIGH_SPEND: f64 = 50_000.0;
const LOW_SPEND: f64 = 10_000.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpendingSummary {
    pub period_days: u32,
    pub total_spent: f64,
    pub average_daily_spend: f64,
    pub spending_by_category: BTreeMap<String, f64>,
    pub category_percentages: BTreeMap<String, f64>,
    pub transaction_count: usize,
    pub feedback: String,
}

fn guideline_for(category: &str) -> f64 {
    BUDGET_GUIDELINES
        .iter()
        .find(|(name, _)| *name == category)
        .map(|(_, pct)| *pct)
        .unwrap_or(DEFAULT_GUIDELINE)
}

pub fn summarize_spending(records: &[LedgerRecord], period_days: u32, currency: &str) -> SpendingSummary {
    let mut by_category: BTreeMap<String, f64> = BTreeMap::new();
    let mut count = 0;

    for record in records {
        if let LedgerEntry::Expense {
            amount, category, ..
        } = &record.entry
        {
            *by_category.entry(category.to_lowercase()).or_insert(0.0) += amount;
            count += 1;
        }
    }

    let total: f64 = by_category.values().sum();
    let percentages: BTreeMap<String, f64> = if total > 0.0 {
        by_category
            .iter()
            .map(|(cat, amount)| (cat.clone(), amount / total * 100.0))
            .collect()
    } else {
        BTreeMap::new()
    };

    let average_daily = if period_days > 0 {
        total / period_days as f64
    } else {
        0.0
    };

    let feedback = spending_feedback(total, &by_category, &percentages, period_days, currency);

    SpendingSummary {
        period_days,
        total_spent: total,
        average_daily_spend: average_daily,
        spending_by_category: by_category,
        category_percentages: percentages,
        transaction_count: count,
        feedback,
    }
}

pub fn spending_feedback(
    total: f64,
    by_category: &BTreeMap<String, f64>,
    percentages: &BTreeMap<String, f64>,
    period_days: u32,
    currency: &str,
) -> String {
    if total <= 0.0 {
        return format!(
            "You haven't recorded any expenses in the last {} days. Your savings must be growing!",
            period_days
        );
    }

    let mut points = Vec::new();

    for (category, pct) in percentages {
        let guideline = guideline_for(category);
        if *pct > guideline + 10.0 {
            points.push(format!(
                "You're spending {:.1}% on {}, which is quite high. Consider reducing {} expenses to stay within a healthy budget.",
                pct, category, category
            ));
        } else if *pct > guideline {
            points.push(format!(
                "Your {} spending is {:.1}%, slightly above the recommended {:.0}%. Keep an eye on this category.",
                category, pct, guideline
            ));
        } else if *pct < guideline / 2.0 {
            points.push(format!(
                "Great job keeping {} expenses low at {:.1}%, well under the {:.0}% guideline.",
                category, pct, guideline
            ));
        }
    }

    // Largest category; ties resolve to the alphabetically first name.
    let largest = by_category
        .iter()
        .fold(None::<(&String, f64)>, |best, (cat, amount)| match best {
            Some((_, top)) if top >= *amount => best,
            _ => Some((cat, *amount)),
        });
    if let Some((category, amount)) = largest {
        if amount > total * DOMINANT_CATEGORY_SHARE {
            points.push(format!(
                "{} is your largest expense category at {:.1}%. This might be worth reviewing for potential savings.",
                capitalize(category),
                percentages.get(category).copied().unwrap_or(0.0)
            ));
        }
    }

    if total > HIGH_SPEND {
        points.push(
            "You're spending quite significantly. Consider tracking specific budgets for each category."
                .to_string(),
        );
    } else if total < LOW_SPEND {
        points.push("Excellent budgeting! Your spending is very controlled and mindful.".to_string());
    }

    if points.is_empty() {
        points.push("Your spending patterns look healthy and balanced across categories.".to_string());
    }

    format!(
        "In the last {} days, you spent {}{:.2} across {} categories. {}",
        period_days,
        currency,
        total,
        by_category.len(),
        points.join(" ")
    )
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn expense(amount: f64, category: &str) -> LedgerRecord {
        LedgerRecord {
            id: 0,
            user_id: "u".into(),
            entry: LedgerEntry::Expense {
                amount,
                category: category.into(),
                description: None,
            },
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_summary_totals_and_percentages() {
        let records = vec![
            expense(300.0, "food"),
            expense(100.0, "transport"),
            expense(100.0, "Food"),
        ];
        let summary = summarize_spending(&records, 10, "₹");

        assert_eq!(summary.total_spent, 500.0);
        assert_eq!(summary.transaction_count, 3);
        assert_eq!(summary.spending_by_category["food"], 400.0);
        assert_eq!(summary.category_percentages["food"], 80.0);
        assert_eq!(summary.average_daily_spend, 50.0);
    }

    #[test]
    fn test_feedback_flags_dominant_category() {
        let records = vec![expense(900.0, "shopping"), expense(100.0, "food")];
        let summary = summarize_spending(&records, 30, "₹");

        assert!(summary.feedback.contains("quite high"));
        assert!(summary.feedback.contains("Shopping is your largest expense category"));
        assert!(summary.feedback.starts_with("In the last 30 days, you spent ₹1000.00"));
    }

    #[test]
    fn test_feedback_without_expenses() {
        let summary = summarize_spending(&[], 7, "₹");
        assert_eq!(summary.total_spent, 0.0);
        assert!(summary.feedback.contains("haven't recorded any expenses"));
    }
}
