use std::collections::BTreeMap;

use log::{error, warn};
use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, Responder};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

/// Field name -> message, rendered next to the offending form input.
pub type FieldErrors = BTreeMap<&'static str, String>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database query failed: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("database pool unavailable: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("failed to read CSV input: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to hash credentials: {0}")]
    Credential(String),

    #[error("expense {0} belongs to another user")]
    Forbidden(i64),

    #[error("expense {0} not found")]
    NotFound(i64),

    #[error("{0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl AppError {
    pub fn status(&self) -> Status {
        match self {
            AppError::Forbidden(_) => Status::Forbidden,
            AppError::NotFound(_) => Status::NotFound,
            AppError::Conflict(_) => Status::Conflict,
            AppError::InvalidInput(_) => Status::BadRequest,
            _ => Status::InternalServerError,
        }
    }
}

impl From<password_hash::Error> for AppError {
    fn from(value: password_hash::Error) -> Self {
        AppError::Credential(value.to_string())
    }
}

impl<'r> Responder<'r, 'static> for AppError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        if status == Status::InternalServerError {
            error!("{} {} failed: {}", req.method(), req.uri(), self);
        } else {
            warn!("{} {} rejected: {}", req.method(), req.uri(), self);
        }
        Err(status)
    }
}
