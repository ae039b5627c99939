use chrono::NaiveDate;
use log::info;
use rusqlite::Connection;
use serde::Serialize;

use crate::db;
use crate::error::{AppError, FieldErrors, Result};
use crate::models::{is_known_category, Expense, ExpenseInput, MonthQuery};
use crate::money::parse_amount_to_cents;

/// Raw expense form values as submitted.
pub struct ExpenseFields<'a> {
    pub date: &'a str,
    pub category: &'a str,
    pub amount: &'a str,
    pub description: &'a str,
}

pub fn validate(fields: &ExpenseFields<'_>, today: NaiveDate) -> std::result::Result<ExpenseInput, FieldErrors> {
    let mut errors = FieldErrors::new();

    let date = match NaiveDate::parse_from_str(fields.date.trim(), "%Y-%m-%d") {
        Ok(date) if date > today => {
            errors.insert("date", "Date must not be in the future.".to_string());
            None
        }
        Ok(date) => Some(date),
        Err(_) => {
            errors.insert("date", "Invalid date format.".to_string());
            None
        }
    };

    let category = fields.category.trim().to_lowercase();
    if category.is_empty() {
        errors.insert("category", "Category is required.".to_string());
    } else if !is_known_category(&category) {
        errors.insert("category", "Unknown category.".to_string());
    }

    let amount_cents = parse_amount_to_cents(fields.amount).filter(|cents| *cents > 0);
    if amount_cents.is_none() {
        errors.insert("amount", "Amount must be a number greater than 0.".to_string());
    }

    let description = fields.description.trim().to_string();
    if description.is_empty() {
        errors.insert("description", "Description is required.".to_string());
    }

    match (date, amount_cents) {
        (Some(date), Some(amount_cents)) if errors.is_empty() => Ok(ExpenseInput {
            date,
            category,
            amount_cents,
            description,
        }),
        _ => Err(errors),
    }
}

pub fn create(conn: &Connection, user_id: i64, input: ExpenseInput) -> Result<i64> {
    let expense = Expense::new(user_id, input);
    let id = db::insert_expense(conn, &expense)?;
    info!("user {user_id} created expense {id}");
    Ok(id)
}

/// Loads an expense the given user is allowed to touch.
///
/// A missing row is [`AppError::NotFound`]; a row owned by another user is
/// [`AppError::Forbidden`].
pub fn find_owned(conn: &Connection, user_id: i64, id: i64) -> Result<Expense> {
    let expense = db::find_expense_by_id(conn, id)?.ok_or(AppError::NotFound(id))?;
    if !expense.is_owned_by(user_id) {
        return Err(AppError::Forbidden(id));
    }
    Ok(expense)
}

pub fn update(conn: &Connection, user_id: i64, id: i64, input: ExpenseInput) -> Result<Expense> {
    let current = find_owned(conn, user_id, id)?;
    let replacement = current.replaced_with(input);
    if db::update_expense(conn, id, &replacement)? == 0 {
        return Err(AppError::NotFound(id));
    }
    info!("user {user_id} updated expense {id}");
    Ok(replacement)
}

pub fn delete(conn: &Connection, user_id: i64, id: i64) -> Result<()> {
    find_owned(conn, user_id, id)?;
    db::delete_expense(conn, id)?;
    info!("user {user_id} deleted expense {id}");
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct ExpensePage {
    pub expenses: Vec<Expense>,
    pub page: i64,
    pub page_size: i64,
    pub total_count: i64,
    pub total_pages: i64,
}

/// Upper bound on rows per page, whatever the client asks for.
pub const MAX_PAGE_SIZE: i64 = 100;

pub fn list_page(conn: &Connection, query: &MonthQuery, page: i64, page_size: i64) -> Result<ExpensePage> {
    let page = page.max(1);
    let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
    let offset = (page - 1).saturating_mul(page_size);
    let expenses = db::list_expenses_by_month(conn, query, page_size, offset)?;
    let total_count = db::count_expenses_by_month(conn, query)?;
    Ok(ExpensePage {
        expenses,
        page,
        page_size,
        total_count,
        total_pages: (total_count + page_size - 1) / page_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{seed_user, temp_pool};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    fn fields<'a>(date: &'a str, category: &'a str, amount: &'a str, description: &'a str) -> ExpenseFields<'a> {
        ExpenseFields {
            date,
            category,
            amount,
            description,
        }
    }

    fn input(amount_cents: i64, description: &str) -> ExpenseInput {
        ExpenseInput {
            date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            category: "groceries".to_string(),
            amount_cents,
            description: description.to_string(),
        }
    }

    #[test]
    fn valid_form_becomes_input() {
        let parsed = validate(&fields("2024-06-15", " Groceries", "12.5", "  Coffee "), today()).unwrap();
        assert_eq!(parsed.amount_cents, 1250);
        assert_eq!(parsed.category, "groceries");
        assert_eq!(parsed.description, "Coffee");
    }

    #[test]
    fn every_invalid_field_is_reported() {
        let errors = validate(&fields("2024-06-16", "", "0", "   "), today()).unwrap_err();
        assert_eq!(errors["date"], "Date must not be in the future.");
        assert_eq!(errors["category"], "Category is required.");
        assert_eq!(errors["amount"], "Amount must be a number greater than 0.");
        assert_eq!(errors["description"], "Description is required.");

        let errors = validate(&fields("yesterday", "pets", "abc", "x"), today()).unwrap_err();
        assert_eq!(errors["date"], "Invalid date format.");
        assert_eq!(errors["category"], "Unknown category.");
        assert!(errors.contains_key("amount"));
        assert!(!errors.contains_key("description"));

        let errors = validate(&fields("2024-06-15", "health", "1e300", "Yacht"), today()).unwrap_err();
        assert_eq!(errors["amount"], "Amount must be a number greater than 0.");
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn another_users_expense_is_forbidden_and_untouched() {
        let (_dir, pool) = temp_pool();
        let alice = seed_user(&pool, "alice");
        let bob = seed_user(&pool, "bobby");
        let conn = pool.get().unwrap();

        let id = create(&conn, alice, input(1250, "Coffee")).unwrap();

        assert!(matches!(update(&conn, bob, id, input(1, "Stolen")), Err(AppError::Forbidden(_))));
        assert!(matches!(delete(&conn, bob, id), Err(AppError::Forbidden(_))));

        let stored = db::find_expense_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(stored.amount_cents, 1250);
        assert_eq!(stored.description, "Coffee");
    }

    #[test]
    fn missing_expense_is_not_found() {
        let (_dir, pool) = temp_pool();
        let alice = seed_user(&pool, "alice");
        let conn = pool.get().unwrap();

        assert!(matches!(find_owned(&conn, alice, 404), Err(AppError::NotFound(404))));
    }

    #[test]
    fn owner_can_replace_and_delete() {
        let (_dir, pool) = temp_pool();
        let alice = seed_user(&pool, "alice");
        let conn = pool.get().unwrap();

        let id = create(&conn, alice, input(1250, "Coffee")).unwrap();
        let updated = update(&conn, alice, id, input(300, "Tea")).unwrap();
        assert_eq!(updated.id, Some(id));
        assert_eq!(updated.user_id, alice);

        let stored = db::find_expense_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(stored, updated);

        delete(&conn, alice, id).unwrap();
        assert!(db::find_expense_by_id(&conn, id).unwrap().is_none());
    }

    #[test]
    fn pages_split_the_month() {
        let (_dir, pool) = temp_pool();
        let alice = seed_user(&pool, "alice");
        let conn = pool.get().unwrap();
        for cents in 1..=5 {
            create(&conn, alice, input(cents, &format!("item {cents}"))).unwrap();
        }

        let query = MonthQuery::new(alice, 2024, 1);
        let first = list_page(&conn, &query, 1, 2).unwrap();
        assert_eq!(first.total_count, 5);
        assert_eq!(first.total_pages, 3);
        assert_eq!(first.expenses.len(), 2);

        let last = list_page(&conn, &query, 3, 2).unwrap();
        assert_eq!(last.expenses.len(), 1);

        let clamped = list_page(&conn, &query, 0, 0).unwrap();
        assert_eq!(clamped.page, 1);
        assert_eq!(clamped.page_size, 1);
    }

    #[test]
    fn huge_paging_values_are_bounded() {
        let (_dir, pool) = temp_pool();
        let alice = seed_user(&pool, "alice");
        let conn = pool.get().unwrap();
        for cents in 1..=3 {
            create(&conn, alice, input(cents, &format!("item {cents}"))).unwrap();
        }
        let query = MonthQuery::new(alice, 2024, 1);

        let far = list_page(&conn, &query, i64::MAX, 20).unwrap();
        assert!(far.expenses.is_empty());
        assert_eq!(far.total_count, 3);

        let wide = list_page(&conn, &query, 1, i64::MAX).unwrap();
        assert_eq!(wide.page_size, MAX_PAGE_SIZE);
        assert_eq!(wide.expenses.len(), 3);
        assert_eq!(wide.total_pages, 1);

        let both = list_page(&conn, &query, i64::MAX, i64::MAX).unwrap();
        assert!(both.expenses.is_empty());
    }
}
