use std::collections::BTreeSet;
use std::path::Path;

use chrono::{Datelike, Local};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, Result, Row};

use crate::error::AppError;
use crate::models::{Expense, ExpenseMatch, MonthQuery, SessionUser};

pub type DbPool = Pool<SqliteConnectionManager>;

pub fn init_db(path: &Path) -> std::result::Result<DbPool, AppError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let manager = SqliteConnectionManager::file(path)
        .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
    let pool = Pool::new(manager)?;
    {
        let conn = pool.get()?;
        run_migrations(&conn)?;
    }
    Ok(pool)
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            token TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS expenses (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            date TEXT NOT NULL,
            category TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            description TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_expenses_user_date ON expenses(user_id, date);
        ",
    )
}

pub fn insert_user(conn: &Connection, username: &str, password_hash: &str, created_at: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO users (username, password_hash, created_at) VALUES (?1, ?2, ?3)",
        params![username, password_hash, created_at],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn username_taken(conn: &Connection, username: &str) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1)",
        params![username],
        |row| row.get::<_, i64>(0),
    )
    .map(|value| value == 1)
}

pub fn user_credentials(conn: &Connection, username: &str) -> Result<Option<(i64, String)>> {
    let mut stmt = conn.prepare(
        "
        SELECT id, password_hash
        FROM users
        WHERE username = ?1
        ",
    )?;
    let mut rows = stmt.query(params![username])?;
    if let Some(row) = rows.next()? {
        Ok(Some((row.get(0)?, row.get(1)?)))
    } else {
        Ok(None)
    }
}

pub fn create_session(conn: &Connection, user_id: i64, token: &str, created_at: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO sessions (user_id, token, created_at) VALUES (?1, ?2, ?3)",
        params![user_id, token, created_at],
    )?;
    Ok(())
}

pub fn user_by_session(conn: &Connection, token: &str) -> Result<Option<SessionUser>> {
    let mut stmt = conn.prepare(
        "
        SELECT u.id, u.username
        FROM sessions s
        JOIN users u ON s.user_id = u.id
        WHERE s.token = ?1
        ",
    )?;
    let mut rows = stmt.query(params![token])?;
    if let Some(row) = rows.next()? {
        Ok(Some(SessionUser {
            id: row.get(0)?,
            username: row.get(1)?,
        }))
    } else {
        Ok(None)
    }
}

pub fn delete_session(conn: &Connection, token: &str) -> Result<()> {
    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(())
}

pub fn prune_sessions(conn: &Connection, user_id: i64, keep: i64) -> Result<()> {
    conn.execute(
        "
        DELETE FROM sessions
        WHERE user_id = ?1
          AND id NOT IN (
            SELECT id
            FROM sessions
            WHERE user_id = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT ?2
          )
        ",
        params![user_id, keep],
    )?;
    Ok(())
}

fn expense_from_row(row: &Row<'_>) -> Result<Expense> {
    Ok(Expense {
        id: row.get(0)?,
        user_id: row.get(1)?,
        date: row.get(2)?,
        category: row.get(3)?,
        amount_cents: row.get(4)?,
        description: row.get(5)?,
    })
}

pub fn insert_expense(conn: &Connection, expense: &Expense) -> Result<i64> {
    conn.execute(
        "
        INSERT INTO expenses (user_id, date, category, amount_cents, description)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ",
        params![
            expense.user_id,
            expense.date,
            expense.category,
            expense.amount_cents,
            expense.description
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Rewrites a persisted expense. The owner is part of the key, so a row owned
/// by someone else is left untouched. Returns the number of rows changed.
pub fn update_expense(conn: &Connection, id: i64, expense: &Expense) -> Result<usize> {
    conn.execute(
        "
        UPDATE expenses
        SET date = ?1, category = ?2, amount_cents = ?3, description = ?4
        WHERE id = ?5 AND user_id = ?6
        ",
        params![
            expense.date,
            expense.category,
            expense.amount_cents,
            expense.description,
            id,
            expense.user_id
        ],
    )
}

pub fn delete_expense(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM expenses WHERE id = ?1", params![id])?;
    Ok(())
}

pub fn find_expense_by_id(conn: &Connection, id: i64) -> Result<Option<Expense>> {
    let mut stmt = conn.prepare(
        "
        SELECT id, user_id, date, category, amount_cents, description
        FROM expenses
        WHERE id = ?1
        ",
    )?;
    let mut rows = stmt.query(params![id])?;
    if let Some(row) = rows.next()? {
        Ok(Some(expense_from_row(row)?))
    } else {
        Ok(None)
    }
}

pub fn list_expenses_by_month(
    conn: &Connection,
    query: &MonthQuery,
    limit: i64,
    offset: i64,
) -> Result<Vec<Expense>> {
    let mut stmt = conn.prepare(
        "
        SELECT id, user_id, date, category, amount_cents, description
        FROM expenses
        WHERE user_id = ?1 AND date LIKE ?2
        ORDER BY date DESC, id DESC
        LIMIT ?3 OFFSET ?4
        ",
    )?;
    let rows = stmt.query_map(
        params![query.user_id, query.like_pattern(), limit, offset],
        expense_from_row,
    )?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn count_expenses_by_month(conn: &Connection, query: &MonthQuery) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM expenses WHERE user_id = ?1 AND date LIKE ?2",
        params![query.user_id, query.like_pattern()],
        |row| row.get(0),
    )
}

pub fn find_expenses_matching(conn: &Connection, criteria: &ExpenseMatch, limit: i64) -> Result<Vec<Expense>> {
    let mut stmt = conn.prepare(
        "
        SELECT id, user_id, date, category, amount_cents, description
        FROM expenses
        WHERE user_id = ?1
          AND date = ?2
          AND description = ?3
          AND amount_cents = ?4
          AND category = ?5
        ORDER BY date DESC, id DESC
        LIMIT ?6
        ",
    )?;
    let rows = stmt.query_map(
        params![
            criteria.user_id,
            criteria.date,
            criteria.description,
            criteria.amount_cents,
            criteria.category,
            limit
        ],
        expense_from_row,
    )?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn sum_amount_cents_by_category(conn: &Connection, query: &MonthQuery) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn.prepare(
        "
        SELECT category, SUM(amount_cents) AS total_cents
        FROM expenses
        WHERE user_id = ?1 AND date LIKE ?2
        GROUP BY category
        ORDER BY category
        ",
    )?;
    let rows = stmt.query_map(params![query.user_id, query.like_pattern()], |row| {
        Ok((row.get(0)?, row.get(1)?))
    })?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn average_amount_cents_by_category(conn: &Connection, query: &MonthQuery) -> Result<Vec<(String, f64)>> {
    let mut stmt = conn.prepare(
        "
        SELECT category, AVG(amount_cents) AS average_cents
        FROM expenses
        WHERE user_id = ?1 AND date LIKE ?2
        GROUP BY category
        ORDER BY category
        ",
    )?;
    let rows = stmt.query_map(params![query.user_id, query.like_pattern()], |row| {
        Ok((row.get(0)?, row.get(1)?))
    })?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn sum_amount_cents(conn: &Connection, query: &MonthQuery) -> Result<i64> {
    conn.query_row(
        "
        SELECT COALESCE(SUM(amount_cents), 0)
        FROM expenses
        WHERE user_id = ?1 AND date LIKE ?2
        ",
        params![query.user_id, query.like_pattern()],
        |row| row.get(0),
    )
}

/// Years with at least one expense, newest first. The current year is always present.
pub fn list_distinct_expenditure_years(conn: &Connection, user_id: i64) -> Result<Vec<i32>> {
    let mut stmt = conn.prepare(
        "
        SELECT DISTINCT CAST(substr(date, 1, 4) AS INTEGER) AS year
        FROM expenses
        WHERE user_id = ?1
        ",
    )?;
    let rows = stmt.query_map(params![user_id], |row| row.get::<_, i32>(0))?;

    let mut set = BTreeSet::new();
    for row in rows {
        set.insert(row?);
    }
    set.insert(Local::now().date_naive().year());
    Ok(set.into_iter().rev().collect())
}
