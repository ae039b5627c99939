//! Monthly aggregation over a user's expenses.
//!
//! The store returns raw per-category sums and averages in cents; this module
//! derives each category's share of the result set. Shares are rounded to two
//! decimals and are all zero when the month is empty.

use rusqlite::Connection;
use serde::Serialize;

use crate::db;
use crate::error::Result;
use crate::models::{CategoryShare, MonthQuery};
use crate::money::{cents_to_major, round2};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlySummary {
    pub total_expenditure: f64,
    pub per_category_totals: Vec<CategoryShare>,
    pub per_category_averages: Vec<CategoryShare>,
}

pub fn compute_total_expenditure(conn: &Connection, query: &MonthQuery) -> Result<f64> {
    let cents = db::sum_amount_cents(conn, query)?;
    Ok(cents_to_major(cents))
}

pub fn compute_per_category_totals(conn: &Connection, query: &MonthQuery) -> Result<Vec<CategoryShare>> {
    let rows = db::sum_amount_cents_by_category(conn, query)?;
    Ok(shares_of_totals(rows))
}

pub fn compute_per_category_averages(conn: &Connection, query: &MonthQuery) -> Result<Vec<CategoryShare>> {
    let rows = db::average_amount_cents_by_category(conn, query)?;
    Ok(shares_of_averages(rows))
}

pub fn compute_monthly_summary(conn: &Connection, query: &MonthQuery) -> Result<MonthlySummary> {
    Ok(MonthlySummary {
        total_expenditure: compute_total_expenditure(conn, query)?,
        per_category_totals: compute_per_category_totals(conn, query)?,
        per_category_averages: compute_per_category_averages(conn, query)?,
    })
}

fn share(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        round2(part / whole * 100.0)
    } else {
        0.0
    }
}

pub fn shares_of_totals(rows: Vec<(String, i64)>) -> Vec<CategoryShare> {
    let total: i64 = rows.iter().map(|(_, cents)| cents).sum();
    rows.into_iter()
        .map(|(category, cents)| CategoryShare {
            category,
            value: cents,
            percentage: share(cents as f64, total as f64),
        })
        .collect()
}

/// Averages keep their raw value for the share; only the reported value is rounded to a cent.
pub fn shares_of_averages(rows: Vec<(String, f64)>) -> Vec<CategoryShare> {
    let total: f64 = rows.iter().map(|(_, average)| average).sum();
    rows.into_iter()
        .map(|(category, average)| CategoryShare {
            category,
            value: average.round() as i64,
            percentage: share(average, total),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::db::test_support::{seed_user, temp_pool};
    use crate::models::Expense;

    fn add(conn: &Connection, user_id: i64, date: &str, category: &str, cents: i64) {
        let expense = Expense {
            id: None,
            user_id,
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            category: category.to_string(),
            amount_cents: cents,
            description: format!("{category} {cents}"),
        };
        db::insert_expense(conn, &expense).unwrap();
    }

    #[test]
    fn empty_month_yields_empty_views_and_zero_total() {
        let (_dir, pool) = temp_pool();
        let alice = seed_user(&pool, "alice");
        let conn = pool.get().unwrap();

        let summary = compute_monthly_summary(&conn, &MonthQuery::new(alice, 2024, 3)).unwrap();
        assert_eq!(summary.total_expenditure, 0.0);
        assert!(summary.per_category_totals.is_empty());
        assert!(summary.per_category_averages.is_empty());
    }

    #[test]
    fn summarises_one_calendar_month() {
        let (_dir, pool) = temp_pool();
        let alice = seed_user(&pool, "alice");
        let conn = pool.get().unwrap();

        add(&conn, alice, "2024-01-01", "groceries", 1000);
        add(&conn, alice, "2024-01-31", "groceries", 2001);
        add(&conn, alice, "2024-01-15", "transport", 1000);
        add(&conn, alice, "2023-12-31", "transport", 50000);
        add(&conn, alice, "2024-02-01", "health", 50000);

        let summary = compute_monthly_summary(&conn, &MonthQuery::new(alice, 2024, 1)).unwrap();
        assert_eq!(summary.total_expenditure, 40.01);
        assert_eq!(
            summary.per_category_totals,
            vec![
                CategoryShare {
                    category: "groceries".to_string(),
                    value: 3001,
                    percentage: 75.01,
                },
                CategoryShare {
                    category: "transport".to_string(),
                    value: 1000,
                    percentage: 24.99,
                },
            ]
        );

        // groceries average 1500.5 rounds to 1501; share uses the raw 1500.5 / 2500.5.
        let averages = &summary.per_category_averages;
        assert_eq!(averages[0].value, 1501);
        assert_eq!(averages[0].percentage, 60.01);
        assert_eq!(averages[1].value, 1000);
        assert_eq!(averages[1].percentage, 39.99);
    }

    #[test]
    fn total_shares_sum_to_one_hundred_within_rounding() {
        let rows = vec![
            ("entertainment".to_string(), 333),
            ("groceries".to_string(), 333),
            ("health".to_string(), 334),
            ("transport".to_string(), 1),
            ("utilities".to_string(), 7919),
        ];
        let count = rows.len() as f64;
        let shares = shares_of_totals(rows);
        let sum: f64 = shares.iter().map(|s| s.percentage).sum();
        assert!((sum - 100.0).abs() <= 0.5 * count, "sum was {sum}");
    }

    #[test]
    fn even_split_sums_to_exactly_one_hundred() {
        let shares = shares_of_totals(vec![("groceries".to_string(), 2500), ("health".to_string(), 7500)]);
        assert_eq!(shares[0].percentage, 25.0);
        assert_eq!(shares[1].percentage, 75.0);
    }

    #[test]
    fn zero_totals_never_divide() {
        let shares = shares_of_totals(vec![("groceries".to_string(), 0)]);
        assert_eq!(shares[0].percentage, 0.0);

        let averages = shares_of_averages(vec![("groceries".to_string(), 0.0)]);
        assert_eq!(averages[0].percentage, 0.0);
        assert_eq!(averages[0].value, 0);
    }
}
