use chrono::{Datelike, Local, NaiveDate};
use serde::Serialize;

pub const CATEGORIES: [&str; 5] = ["groceries", "transport", "utilities", "entertainment", "health"];

pub fn is_known_category(name: &str) -> bool {
    CATEGORIES.contains(&name)
}

/// The authenticated user for the current request, resolved from the session cookie.
#[derive(Debug, Clone, Serialize)]
pub struct SessionUser {
    pub id: i64,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Expense {
    pub id: Option<i64>,
    pub user_id: i64,
    pub date: NaiveDate,
    pub category: String,
    pub amount_cents: i64,
    pub description: String,
}

/// Validated replacement values for an expense. Never carries an owner.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpenseInput {
    pub date: NaiveDate,
    pub category: String,
    pub amount_cents: i64,
    pub description: String,
}

impl Expense {
    pub fn new(user_id: i64, input: ExpenseInput) -> Self {
        Self {
            id: None,
            user_id,
            date: input.date,
            category: input.category,
            amount_cents: input.amount_cents,
            description: input.description,
        }
    }

    /// Returns a copy with every editable field replaced; id and owner are kept.
    pub fn replaced_with(&self, input: ExpenseInput) -> Self {
        Self {
            id: self.id,
            user_id: self.user_id,
            date: input.date,
            category: input.category,
            amount_cents: input.amount_cents,
            description: input.description,
        }
    }

    pub fn is_owned_by(&self, user_id: i64) -> bool {
        self.user_id == user_id
    }
}

/// Selects one user's expenses within a calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthQuery {
    pub user_id: i64,
    pub year: i32,
    pub month: u32,
}

impl MonthQuery {
    pub fn new(user_id: i64, year: i32, month: u32) -> Self {
        Self {
            user_id,
            year,
            month,
        }
    }

    pub fn current(user_id: i64) -> Self {
        let today = Local::now().date_naive();
        Self::new(user_id, today.year(), today.month())
    }

    pub fn is_current(&self) -> bool {
        let today = Local::now().date_naive();
        self.year == today.year() && self.month == today.month()
    }

    /// LIKE pattern matching `YYYY-MM-DD` dates of this month.
    pub fn like_pattern(&self) -> String {
        format!("{:04}-{:02}-%", self.year, self.month)
    }
}

/// Exact-match criteria used to spot an already persisted expense.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExpenseMatch {
    pub user_id: i64,
    pub date: NaiveDate,
    pub description: String,
    pub amount_cents: i64,
    pub category: String,
}

impl From<&Expense> for ExpenseMatch {
    fn from(expense: &Expense) -> Self {
        Self {
            user_id: expense.user_id,
            date: expense.date,
            description: expense.description.clone(),
            amount_cents: expense.amount_cents,
            category: expense.category.clone(),
        }
    }
}

/// One row of a monthly aggregate: a category's value in cents and its share of the result set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryShare {
    pub category: String,
    pub value: i64,
    pub percentage: f64,
}
