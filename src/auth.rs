use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::Local;
use log::{info, warn};
use password_hash::SaltString;
use rand_core::OsRng;
use rusqlite::Connection;
use uuid::Uuid;

use crate::db;
use crate::error::{AppError, FieldErrors, Result};

pub const SESSION_COOKIE: &str = "session";

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    let parsed = match PasswordHash::new(hash) {
        Ok(parsed) => parsed,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

pub fn validate_registration(username: &str, password: &str, password_again: &str) -> FieldErrors {
    let mut errors = FieldErrors::new();
    if password != password_again {
        errors.insert("password_again", "Passwords do not match.".to_string());
    }
    if username.chars().count() < 4 {
        errors.insert("username", "Username must be at least 4 characters long.".to_string());
    }
    if password.chars().count() < 8 || !password.chars().any(|c| c.is_ascii_digit()) {
        errors.insert(
            "password",
            "Password must be at least 8 characters and contain at least one number.".to_string(),
        );
    }
    errors
}

/// Creates a user with a hashed credential. A taken username is [`AppError::Conflict`].
pub fn register(conn: &Connection, username: &str, password: &str) -> Result<i64> {
    if db::username_taken(conn, username)? {
        return Err(AppError::Conflict(format!("username {username:?} already exists")));
    }
    let password_hash = hash_password(password)?;
    let created_at = Local::now().to_rfc3339();
    let user_id = db::insert_user(conn, username, &password_hash, &created_at)?;
    info!("user registered: {username} (id {user_id})");
    Ok(user_id)
}

/// Returns the user id when the credentials match. Unknown usernames and wrong
/// passwords are indistinguishable to the caller.
pub fn attempt(conn: &Connection, username: &str, password: &str) -> Result<Option<i64>> {
    let Some((user_id, hash)) = db::user_credentials(conn, username)? else {
        warn!("login failed for {username}");
        return Ok(None);
    };
    if !verify_password(&hash, password) {
        warn!("login failed for {username}");
        return Ok(None);
    }
    info!("user logged in: {username}");
    Ok(Some(user_id))
}

/// Opens a new session for the user and returns its token, keeping at most
/// `max_sessions` per user.
pub fn start_session(conn: &Connection, user_id: i64, max_sessions: i64) -> Result<String> {
    let token = Uuid::new_v4().to_string();
    let created_at = Local::now().to_rfc3339();
    db::create_session(conn, user_id, &token, &created_at)?;
    db::prune_sessions(conn, user_id, max_sessions)?;
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_pool;

    #[test]
    fn hashed_password_verifies_only_itself() {
        let hash = hash_password("hunter2hunter2").unwrap();
        assert_ne!(hash, "hunter2hunter2");
        assert!(verify_password(&hash, "hunter2hunter2"));
        assert!(!verify_password(&hash, "hunter3hunter3"));
        assert!(!verify_password("garbage", "hunter2hunter2"));
    }

    #[test]
    fn registration_rules_are_keyed_by_field() {
        assert!(validate_registration("alice", "password1", "password1").is_empty());

        let errors = validate_registration("bob", "short", "other");
        assert!(errors.contains_key("username"));
        assert!(errors.contains_key("password"));
        assert!(errors.contains_key("password_again"));

        let errors = validate_registration("alice", "longpassword", "longpassword");
        assert_eq!(errors.len(), 1);
        assert!(errors.contains_key("password"));
    }

    #[test]
    fn duplicate_username_is_a_conflict() {
        let (_dir, pool) = temp_pool();
        let conn = pool.get().unwrap();

        register(&conn, "alice", "password1").unwrap();
        assert!(matches!(register(&conn, "alice", "password2"), Err(AppError::Conflict(_))));
        assert!(register(&conn, "Alice", "password2").is_ok());
    }

    #[test]
    fn attempt_checks_credentials() {
        let (_dir, pool) = temp_pool();
        let conn = pool.get().unwrap();
        let user_id = register(&conn, "alice", "password1").unwrap();

        assert_eq!(attempt(&conn, "alice", "password1").unwrap(), Some(user_id));
        assert_eq!(attempt(&conn, "alice", "password2").unwrap(), None);
        assert_eq!(attempt(&conn, "nobody", "password1").unwrap(), None);
    }

    #[test]
    fn sessions_are_capped_per_user() {
        let (_dir, pool) = temp_pool();
        let conn = pool.get().unwrap();
        let user_id = register(&conn, "alice", "password1").unwrap();

        let tokens: Vec<String> = (0..3).map(|_| start_session(&conn, user_id, 2).unwrap()).collect();
        let live: i64 = conn
            .query_row("SELECT COUNT(*) FROM sessions WHERE user_id = ?1", [user_id], |row| row.get(0))
            .unwrap();

        assert_eq!(live, 2);
        assert!(db::user_by_session(&conn, &tokens[2]).unwrap().is_some());
    }
}
