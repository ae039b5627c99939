#[macro_use]
extern crate rocket;

mod alerts;
mod auth;
mod budget;
mod db;
mod error;
mod expenses;
mod import;
mod models;
mod money;
mod summary;

use std::path::PathBuf;

use chrono::Local;
use db::DbPool;
use error::{AppError, FieldErrors};
use expenses::ExpenseFields;
use log::{error, info};
use models::{CategoryShare, Expense, MonthQuery, SessionUser, CATEGORIES};
use money::format_money;
use rocket::fairing::AdHoc;
use rocket::figment::Figment;
use rocket::form::Form;
use rocket::fs::{FileServer, TempFile};
use rocket::http::{Cookie, CookieJar, SameSite};
use rocket::request::FlashMessage;
use rocket::response::{Flash, Redirect};
use rocket::tokio::io::AsyncReadExt;
use rocket::{Build, Rocket, State};
use rocket_dyn_templates::Template;
use serde::{Deserialize, Serialize};

use crate::budget::BudgetTable;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct AppConfig {
    database_path: PathBuf,
    /// JSON object of category -> ceiling in major units.
    category_budgets: String,
    page_size: i64,
    max_sessions: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/expenses.sqlite"),
            category_budgets: "{}".to_string(),
            page_size: 20,
            max_sessions: 5,
        }
    }
}

#[derive(Responder)]
enum Denied {
    Login(Redirect),
    Error(AppError),
}

impl From<Redirect> for Denied {
    fn from(value: Redirect) -> Self {
        Denied::Login(value)
    }
}

impl From<AppError> for Denied {
    fn from(value: AppError) -> Self {
        Denied::Error(value)
    }
}

impl From<r2d2::Error> for Denied {
    fn from(value: r2d2::Error) -> Self {
        Denied::Error(value.into())
    }
}

impl From<rusqlite::Error> for Denied {
    fn from(value: rusqlite::Error) -> Self {
        Denied::Error(value.into())
    }
}

#[derive(Responder)]
enum FormOutcome {
    Saved(Flash<Redirect>),
    Invalid(Template),
}

#[derive(FromForm)]
struct LoginForm {
    username: String,
    password: String,
}

#[derive(FromForm)]
struct RegisterForm {
    username: String,
    password: String,
    password_again: String,
}

#[derive(FromForm, Serialize)]
struct ExpenseForm {
    date: String,
    category: String,
    amount: String,
    description: String,
}

impl ExpenseForm {
    fn fields(&self) -> ExpenseFields<'_> {
        ExpenseFields {
            date: &self.date,
            category: &self.category,
            amount: &self.amount,
            description: &self.description,
        }
    }
}

#[derive(FromForm)]
struct ImportForm<'r> {
    csv_file: Option<TempFile<'r>>,
}

#[derive(Serialize)]
struct ExpenseView {
    id: Option<i64>,
    date: String,
    category: String,
    amount: String,
    description: String,
}

#[derive(Serialize)]
struct CategoryShareView {
    category: String,
    amount: String,
    percentage: String,
}

#[derive(Serialize)]
struct BudgetView {
    category: String,
    ceiling: String,
    spent: String,
}

#[derive(Serialize)]
struct FlashView {
    kind: String,
    message: String,
}

fn expense_view(expense: Expense) -> ExpenseView {
    ExpenseView {
        id: expense.id,
        date: expense.date.format("%Y-%m-%d").to_string(),
        category: expense.category,
        amount: format_money(expense.amount_cents),
        description: expense.description,
    }
}

fn category_share_view(share: &CategoryShare) -> CategoryShareView {
    CategoryShareView {
        category: share.category.clone(),
        amount: format_money(share.value),
        percentage: format!("{:.2}", share.percentage),
    }
}

fn flash_view(flash: Option<FlashMessage<'_>>) -> Option<FlashView> {
    flash.map(|flash| FlashView {
        kind: flash.kind().to_string(),
        message: flash.message().to_string(),
    })
}

fn today_ymd() -> String {
    Local::now().date_naive().format("%Y-%m-%d").to_string()
}

fn selected_month(user_id: i64, year: Option<i32>, month: Option<u32>) -> MonthQuery {
    let current = MonthQuery::current(user_id);
    MonthQuery::new(
        user_id,
        year.unwrap_or(current.year),
        month.filter(|m| (1..=12).contains(m)).unwrap_or(current.month),
    )
}

fn current_user(pool: &State<DbPool>, cookies: &CookieJar<'_>) -> Option<SessionUser> {
    let conn = pool.get().ok()?;
    let token = cookies.get(auth::SESSION_COOKIE)?.value().to_string();
    db::user_by_session(&conn, &token).ok().flatten()
}

fn require_user(pool: &State<DbPool>, cookies: &CookieJar<'_>) -> Result<SessionUser, Redirect> {
    current_user(pool, cookies).ok_or_else(|| Redirect::to("/login"))
}

fn set_session_cookie(cookies: &CookieJar<'_>, token: String) {
    let mut cookie = Cookie::new(auth::SESSION_COOKIE, token);
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookies.add(cookie);
}

fn render_login(username: &str, error: Option<&str>, flash: Option<FlashView>) -> Template {
    Template::render(
        "login",
        serde_json::json!({
            "username": username,
            "error": error,
            "flash": flash,
        }),
    )
}

fn render_register(username: &str, errors: &FieldErrors) -> Template {
    Template::render(
        "register",
        serde_json::json!({
            "username": username,
            "errors": errors,
        }),
    )
}

fn render_expense_form(
    template: &'static str,
    user: &SessionUser,
    values: serde_json::Value,
    errors: &FieldErrors,
    expense_id: Option<i64>,
) -> Template {
    Template::render(
        template,
        serde_json::json!({
            "user": user,
            "values": values,
            "errors": errors,
            "expense_id": expense_id,
            "categories": CATEGORIES,
            "today": today_ymd(),
        }),
    )
}

#[get("/register")]
fn register(pool: &State<DbPool>, cookies: &CookieJar<'_>) -> Result<Template, Redirect> {
    if current_user(pool, cookies).is_some() {
        return Err(Redirect::to("/"));
    }
    Ok(render_register("", &FieldErrors::new()))
}

#[post("/register", data = "<form>")]
fn register_post(pool: &State<DbPool>, form: Form<RegisterForm>) -> Result<Flash<Redirect>, Template> {
    let form = form.into_inner();
    let username = form.username.trim();
    let errors = auth::validate_registration(username, &form.password, &form.password_again);
    if !errors.is_empty() {
        return Err(render_register(username, &errors));
    }

    let registered = pool
        .get()
        .map_err(AppError::from)
        .and_then(|conn| auth::register(&conn, username, &form.password));
    match registered {
        Ok(_) => Ok(Flash::success(
            Redirect::to("/login"),
            "Account created. You can log in now.",
        )),
        Err(err) => {
            error!("registration failed for {username}: {err}");
            let mut errors = FieldErrors::new();
            errors.insert(
                "username",
                "Registration failed. Username might already exist.".to_string(),
            );
            Err(render_register(username, &errors))
        }
    }
}

#[get("/login")]
fn login(
    pool: &State<DbPool>,
    cookies: &CookieJar<'_>,
    flash: Option<FlashMessage<'_>>,
) -> Result<Template, Redirect> {
    if current_user(pool, cookies).is_some() {
        return Err(Redirect::to("/"));
    }
    Ok(render_login("", None, flash_view(flash)))
}

#[post("/login", data = "<form>")]
fn login_post(
    pool: &State<DbPool>,
    config: &State<AppConfig>,
    cookies: &CookieJar<'_>,
    form: Form<LoginForm>,
) -> Result<Redirect, Template> {
    let form = form.into_inner();
    let username = form.username.trim();
    let invalid = || render_login(username, Some("Invalid username or password"), None);

    let conn = pool.get().map_err(|err| {
        error!("login for {username} could not reach the database: {err}");
        invalid()
    })?;
    let user_id = match auth::attempt(&conn, username, &form.password) {
        Ok(Some(user_id)) => user_id,
        Ok(None) => return Err(invalid()),
        Err(err) => {
            error!("login for {username} failed: {err}");
            return Err(invalid());
        }
    };

    let token = auth::start_session(&conn, user_id, config.max_sessions).map_err(|err| {
        error!("could not start a session for {username}: {err}");
        invalid()
    })?;
    set_session_cookie(cookies, token);

    Ok(Redirect::to("/"))
}

#[get("/logout")]
fn logout(pool: &State<DbPool>, cookies: &CookieJar<'_>) -> Redirect {
    if let Some(cookie) = cookies.get(auth::SESSION_COOKIE) {
        if let Ok(conn) = pool.get() {
            let _ = db::delete_session(&conn, cookie.value());
        }
    }
    cookies.remove(auth::SESSION_COOKIE);
    info!("user logged out");
    Redirect::to("/login")
}

#[get("/?<year>&<month>")]
fn dashboard(
    pool: &State<DbPool>,
    budgets: &State<BudgetTable>,
    cookies: &CookieJar<'_>,
    year: Option<i32>,
    month: Option<u32>,
) -> Result<Template, Denied> {
    let user = require_user(pool, cookies)?;
    let query = selected_month(user.id, year, month);
    let conn = pool.get()?;

    let summary = summary::compute_monthly_summary(&conn, &query)?;
    let alerts = if query.is_current() {
        alerts::generate_alerts(&summary.per_category_totals, budgets)
    } else {
        Vec::new()
    };
    let years = db::list_distinct_expenditure_years(&conn, user.id)?;

    let budget_views = budgets
        .entries()
        .into_iter()
        .map(|entry| {
            let spent = summary
                .per_category_totals
                .iter()
                .find(|total| total.category == entry.category)
                .map(|total| total.value)
                .unwrap_or(0);
            BudgetView {
                category: entry.category,
                ceiling: format!("{:.2}", entry.ceiling),
                spent: format_money(spent),
            }
        })
        .collect::<Vec<_>>();

    let context = serde_json::json!({
        "user": user,
        "alerts": alerts,
        "total": format!("{:.2}", summary.total_expenditure),
        "totals": summary.per_category_totals.iter().map(category_share_view).collect::<Vec<_>>(),
        "averages": summary.per_category_averages.iter().map(category_share_view).collect::<Vec<_>>(),
        "has_budgets": !budgets.is_empty(),
        "budgets": budget_views,
        "years": years,
        "selected_year": query.year,
        "selected_month": query.month,
    });
    Ok(Template::render("dashboard", &context))
}

#[get("/expenses?<year>&<month>&<page>&<page_size>")]
#[allow(clippy::too_many_arguments)]
fn expense_list(
    pool: &State<DbPool>,
    config: &State<AppConfig>,
    cookies: &CookieJar<'_>,
    flash: Option<FlashMessage<'_>>,
    year: Option<i32>,
    month: Option<u32>,
    page: Option<i64>,
    page_size: Option<i64>,
) -> Result<Template, Denied> {
    let user = require_user(pool, cookies)?;
    let query = selected_month(user.id, year, month);
    let conn = pool.get()?;

    let listing = expenses::list_page(
        &conn,
        &query,
        page.unwrap_or(1),
        page_size.unwrap_or(config.page_size),
    )?;
    let years = db::list_distinct_expenditure_years(&conn, user.id)?;

    let context = serde_json::json!({
        "user": user,
        "flash": flash_view(flash),
        "expenses": listing.expenses.into_iter().map(expense_view).collect::<Vec<_>>(),
        "page": listing.page,
        "page_size": listing.page_size,
        "total_count": listing.total_count,
        "total_pages": listing.total_pages,
        "years": years,
        "selected_year": query.year,
        "selected_month": query.month,
    });
    Ok(Template::render("expenses/index", &context))
}

#[get("/expenses/create")]
fn expense_create(pool: &State<DbPool>, cookies: &CookieJar<'_>) -> Result<Template, Redirect> {
    let user = require_user(pool, cookies)?;
    let values = serde_json::json!({ "date": today_ymd() });
    Ok(render_expense_form("expenses/create", &user, values, &FieldErrors::new(), None))
}

#[post("/expenses", data = "<form>")]
fn expense_store(
    pool: &State<DbPool>,
    cookies: &CookieJar<'_>,
    form: Form<ExpenseForm>,
) -> Result<FormOutcome, Denied> {
    let user = require_user(pool, cookies)?;
    let form = form.into_inner();
    let input = match expenses::validate(&form.fields(), Local::now().date_naive()) {
        Ok(input) => input,
        Err(errors) => {
            let values = serde_json::to_value(&form).unwrap_or_default();
            return Ok(FormOutcome::Invalid(render_expense_form(
                "expenses/create",
                &user,
                values,
                &errors,
                None,
            )));
        }
    };

    let conn = pool.get()?;
    expenses::create(&conn, user.id, input)?;
    Ok(FormOutcome::Saved(Flash::success(Redirect::to("/expenses"), "Expense saved.")))
}

#[get("/expenses/<id>/edit")]
fn expense_edit(pool: &State<DbPool>, cookies: &CookieJar<'_>, id: i64) -> Result<Template, Denied> {
    let user = require_user(pool, cookies)?;
    let conn = pool.get()?;
    let expense = expenses::find_owned(&conn, user.id, id)?;

    let values = serde_json::json!({
        "date": expense.date.format("%Y-%m-%d").to_string(),
        "category": expense.category,
        "amount": format_money(expense.amount_cents),
        "description": expense.description,
    });
    Ok(render_expense_form("expenses/edit", &user, values, &FieldErrors::new(), Some(id)))
}

#[post("/expenses/<id>", data = "<form>")]
fn expense_update(
    pool: &State<DbPool>,
    cookies: &CookieJar<'_>,
    id: i64,
    form: Form<ExpenseForm>,
) -> Result<FormOutcome, Denied> {
    let user = require_user(pool, cookies)?;
    let conn = pool.get()?;
    expenses::find_owned(&conn, user.id, id)?;

    let form = form.into_inner();
    let input = match expenses::validate(&form.fields(), Local::now().date_naive()) {
        Ok(input) => input,
        Err(errors) => {
            let values = serde_json::to_value(&form).unwrap_or_default();
            return Ok(FormOutcome::Invalid(render_expense_form(
                "expenses/edit",
                &user,
                values,
                &errors,
                Some(id),
            )));
        }
    };

    expenses::update(&conn, user.id, id, input)?;
    Ok(FormOutcome::Saved(Flash::success(Redirect::to("/expenses"), "Expense updated.")))
}

#[post("/expenses/<id>/delete")]
fn expense_delete(pool: &State<DbPool>, cookies: &CookieJar<'_>, id: i64) -> Result<Flash<Redirect>, Denied> {
    let user = require_user(pool, cookies)?;
    let conn = pool.get()?;
    match expenses::delete(&conn, user.id, id) {
        Ok(()) => Ok(Flash::success(
            Redirect::to("/expenses"),
            "Expense deleted successfully.",
        )),
        Err(err @ (AppError::Forbidden(_) | AppError::NotFound(_))) => {
            info!("user {} could not delete expense {id}: {err}", user.id);
            Ok(Flash::error(Redirect::to("/expenses"), "Failed to delete expense."))
        }
        Err(err) => Err(err.into()),
    }
}

#[post("/expenses/import", data = "<form>")]
async fn expense_import(
    pool: &State<DbPool>,
    cookies: &CookieJar<'_>,
    form: Form<ImportForm<'_>>,
) -> Result<Flash<Redirect>, Denied> {
    let user = require_user(pool, cookies)?;
    let upload_failed = || Flash::error(Redirect::to("/expenses"), "Failed to upload CSV file.");

    let Some(file) = form.into_inner().csv_file.filter(|file| file.len() > 0) else {
        return Ok(upload_failed());
    };
    let mut bytes = Vec::new();
    let read = match file.open().await {
        Ok(stream) => {
            let mut stream = std::pin::pin!(stream);
            stream.read_to_end(&mut bytes).await.map(|_| ())
        }
        Err(err) => Err(err),
    };
    if let Err(err) = read {
        error!("could not read CSV upload for user {}: {err}", user.id);
        return Ok(upload_failed());
    }

    let pool = pool.inner().clone();
    let user_id = user.id;
    let outcome = rocket::tokio::task::spawn_blocking(move || -> error::Result<import::ImportSummary> {
        let mut conn = pool.get()?;
        import::import_csv(&mut conn, user_id, bytes.as_slice())
    })
    .await;
    match outcome {
        Ok(Ok(summary)) => Ok(Flash::success(
            Redirect::to("/expenses"),
            format!(
                "Successfully imported {} expenses ({} skipped).",
                summary.imported, summary.skipped
            ),
        )),
        Ok(Err(_)) => Ok(Flash::error(
            Redirect::to("/expenses"),
            "Import failed, no expenses were imported.",
        )),
        Err(err) => {
            error!("CSV import task for user {user_id} did not finish: {err}");
            Ok(Flash::error(
                Redirect::to("/expenses"),
                "Import failed, no expenses were imported.",
            ))
        }
    }
}

fn build_rocket(figment: Figment) -> Rocket<Build> {
    rocket::custom(figment)
        .attach(AdHoc::config::<AppConfig>())
        .attach(AdHoc::try_on_ignite("Database and budgets", |rocket| async move {
            let Some(config) = rocket.state::<AppConfig>().cloned() else {
                error!("application configuration missing");
                return Err(rocket);
            };
            let budgets = BudgetTable::from_json(&config.category_budgets);
            match db::init_db(&config.database_path) {
                Ok(pool) => {
                    info!("using database {}", config.database_path.display());
                    Ok(rocket.manage(pool).manage(budgets))
                }
                Err(err) => {
                    error!("failed to open database {}: {err}", config.database_path.display());
                    Err(rocket)
                }
            }
        }))
        .mount(
            "/",
            routes![
                register,
                register_post,
                login,
                login_post,
                logout,
                dashboard,
                expense_list,
                expense_create,
                expense_store,
                expense_edit,
                expense_update,
                expense_delete,
                expense_import
            ],
        )
        .mount("/static", FileServer::from("static"))
        .attach(Template::fairing())
}

#[launch]
fn rocket() -> _ {
    build_rocket(rocket::Config::figment())
}
