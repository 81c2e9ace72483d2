use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use rocket::form::Form;
use rocket::fs::{relative, FileServer};
use rocket::http::{ContentType, CookieJar, Header};
use rocket::response::Redirect;
use rocket::serde::json::Json;
use rocket::{Build, Rocket, State};
use rocket_dyn_templates::Template;
use serde::Serialize;
use tracing::{info, warn};

use crate::auth::{self, MIN_PASSWORD_LEN};
use crate::config::Config;
use crate::db::{self, DbPool, NewBook, NewExpense, NewTicket};
use crate::error::{AppError, AppResult};
use crate::models::{BookRecord, ExpenseRecord, TicketRecord, TicketStatus};
use crate::money::{format_money, format_total, parse_amount_to_cents};
use crate::report::{self, MonthlyReport, ReportFilters};
use crate::sorter::{self, TicketSummary};

#[derive(FromForm)]
struct LoginForm {
    username: String,
    password: String,
}

#[derive(FromForm)]
struct SetupForm {
    username: String,
    password: String,
    confirm_password: String,
}

#[derive(FromForm)]
struct ExpenseForm {
    name: String,
    amount: String,
    date: String,
    category: String,
    book_id: Option<i64>,
}

#[derive(FromForm)]
struct TicketForm {
    subject: String,
    description: Option<String>,
    priority: i64,
    expense_id: Option<i64>,
}

#[derive(FromForm)]
struct StatusForm {
    status: String,
}

#[derive(FromForm)]
struct BookForm {
    title: String,
    subtitle: Option<String>,
    author: String,
    category: Option<String>,
    publisher: Option<String>,
    publisher_location: Option<String>,
    published_date: Option<String>,
    distribution_expense: Option<String>,
}

#[derive(Serialize)]
struct TicketView {
    id: i64,
    subject: String,
    description: String,
    priority: i64,
    status: TicketStatus,
    timestamp: String,
    expense_id: Option<i64>,
}

#[derive(Serialize)]
struct ExpenseView {
    id: i64,
    name: String,
    amount: String,
    date: String,
    category: String,
    book_id: Option<i64>,
}

#[derive(Serialize)]
struct BookView {
    id: i64,
    title: String,
    subtitle: Option<String>,
    author_name: String,
    category_name: Option<String>,
    publisher_name: Option<String>,
    published_date: Option<String>,
    distribution_expense: String,
}

#[derive(Serialize)]
struct ReportRowView {
    label: String,
    total: String,
    ticket_count: i64,
}

/// Shared by the report page and `/api/reports`.
#[derive(Serialize)]
struct ReportContext {
    labels: Vec<String>,
    totals: Vec<f64>,
    ticket_counts: Vec<i64>,
    report_data: Vec<report::PeriodSummary>,
    rows: Vec<ReportRowView>,
    no_data: bool,
    months: Vec<String>,
    categories: Vec<String>,
    years: Vec<i32>,
    selected_month: String,
    selected_category: String,
    selected_year: String,
    active_year: Option<i32>,
}

#[derive(Serialize)]
struct SortResponse {
    sorted_ticket_ids: Vec<i64>,
}

/// Raw query values, echoed back as the current selection.
struct ReportQuery {
    month: Option<String>,
    category: Option<String>,
    year: Option<String>,
}

impl ReportQuery {
    fn filters(&self) -> ReportFilters {
        ReportFilters::from_query(
            self.month.as_deref(),
            self.category.as_deref(),
            self.year.as_deref(),
        )
    }
}

#[derive(Responder)]
struct CsvDownload {
    body: Vec<u8>,
    content_type: ContentType,
    disposition: Header<'static>,
}

fn ticket_view(record: TicketRecord) -> TicketView {
    TicketView {
        id: record.id,
        subject: record.subject,
        description: record.description,
        priority: record.priority,
        status: record.status,
        timestamp: record.timestamp.format("%Y-%m-%d %H:%M").to_string(),
        expense_id: record.expense_id,
    }
}

fn expense_view(record: ExpenseRecord) -> ExpenseView {
    ExpenseView {
        id: record.id,
        name: record.name,
        amount: format_money(record.amount_cents),
        date: record.date.format("%Y-%m-%d").to_string(),
        category: record.category,
        book_id: record.book_id,
    }
}

fn book_view(record: BookRecord) -> BookView {
    BookView {
        id: record.id,
        title: record.title,
        subtitle: record.subtitle,
        author_name: record.author_name,
        category_name: record.category_name,
        publisher_name: record.publisher_name,
        published_date: record.published_date.map(|d| d.format("%Y-%m-%d").to_string()),
        distribution_expense: format_money(record.distribution_expense_cents),
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_form_date(raw: &str) -> AppResult<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Utc::now().date_naive());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest(format!("invalid date: {raw}")))
}

/// Tickets in `(priority, timestamp, id)` order, or the exact reverse.
fn order_tickets(tickets: Vec<TicketRecord>, descending: bool) -> Vec<TicketRecord> {
    let keys: Vec<TicketSummary> = tickets
        .iter()
        .map(|t| TicketSummary {
            id: t.id,
            priority: t.priority,
            timestamp: t.timestamp,
        })
        .collect();
    let mut by_id: HashMap<i64, TicketRecord> = tickets.into_iter().map(|t| (t.id, t)).collect();
    let mut ordered: Vec<TicketRecord> = sorter::sorted_ids(&keys)
        .into_iter()
        .filter_map(|id| by_id.remove(&id))
        .collect();
    if descending {
        ordered.reverse();
    }
    ordered
}

fn report_context(pool: &DbPool, query: &ReportQuery) -> AppResult<ReportContext> {
    let conn = pool.get()?;
    let filters = query.filters();
    let report = MonthlyReport::generate(&*conn, &filters)?;
    let view = report.view();
    let rows = view
        .rows
        .iter()
        .map(|row| ReportRowView {
            label: row.label.clone(),
            total: format_total(row.total_amount),
            ticket_count: row.ticket_count,
        })
        .collect();
    Ok(ReportContext {
        labels: view.labels(),
        totals: view.totals(),
        ticket_counts: view.ticket_counts(),
        rows,
        no_data: view.no_data,
        report_data: view.rows,
        months: report.vocabulary.months,
        categories: report.vocabulary.categories,
        years: report.vocabulary.years,
        selected_month: query.month.clone().unwrap_or_default(),
        selected_category: query.category.clone().unwrap_or_default(),
        selected_year: query.year.clone().unwrap_or_default(),
        active_year: filters.year,
    })
}

fn render_login(error: Option<&str>) -> Template {
    Template::render("login", serde_json::json!({ "error": error }))
}

fn render_setup(error: Option<&str>) -> Template {
    Template::render("setup", serde_json::json!({ "error": error }))
}

#[get("/setup")]
fn setup(pool: &State<DbPool>) -> Result<Template, Redirect> {
    let conn = pool.get().map_err(|_| Redirect::to("/login"))?;
    if db::has_users(&conn).unwrap_or(false) {
        return Err(Redirect::to("/login"));
    }
    Ok(render_setup(None))
}

#[post("/setup", data = "<form>")]
fn setup_post(
    pool: &State<DbPool>,
    config: &State<Config>,
    cookies: &CookieJar<'_>,
    form: Form<SetupForm>,
) -> Result<Redirect, Template> {
    let conn = pool
        .get()
        .map_err(|_| render_setup(Some("Could not connect to the database")))?;
    if db::has_users(&conn).unwrap_or(false) {
        return Ok(Redirect::to("/login"));
    }

    let form = form.into_inner();
    let username = form.username.trim();
    if username.is_empty() {
        return Err(render_setup(Some("Enter a username")));
    }
    if form.password.len() < MIN_PASSWORD_LEN {
        return Err(render_setup(Some("Password must be at least 6 characters")));
    }
    if form.password != form.confirm_password {
        return Err(render_setup(Some("Passwords do not match")));
    }

    let password_hash = auth::hash_password(&form.password)
        .map_err(|_| render_setup(Some("Could not store the password")))?;
    let user_id = db::insert_user(&conn, username, &password_hash, Utc::now())
        .map_err(|_| render_setup(Some("That username is taken")))?;
    auth::start_session(&conn, cookies, user_id, config.max_sessions)
        .map_err(|_| render_setup(Some("Could not create a session")))?;
    info!(user_id, %username, "initial account created");

    Ok(Redirect::to("/dashboard"))
}

#[get("/login")]
fn login(pool: &State<DbPool>, cookies: &CookieJar<'_>) -> Result<Template, Redirect> {
    let conn = pool.get().map_err(|_| Redirect::to("/login"))?;
    if !db::has_users(&conn).unwrap_or(false) {
        return Err(Redirect::to("/setup"));
    }
    if auth::current_user(&conn, cookies).is_some() {
        return Err(Redirect::to("/dashboard"));
    }
    Ok(render_login(None))
}

#[post("/login", data = "<form>")]
fn login_post(
    pool: &State<DbPool>,
    config: &State<Config>,
    cookies: &CookieJar<'_>,
    form: Form<LoginForm>,
) -> Result<Redirect, Template> {
    let conn = pool
        .get()
        .map_err(|_| render_login(Some("Could not connect to the database")))?;
    let form = form.into_inner();
    let username = form.username.trim();
    if username.is_empty() || form.password.is_empty() {
        return Err(render_login(Some("Enter a username and password")));
    }

    let user_id = auth::authenticate(&conn, username, &form.password)
        .map_err(|_| render_login(Some("Could not look up the user")))?;
    let Some(user_id) = user_id else {
        warn!(%username, "failed login");
        return Err(render_login(Some("Invalid username or password")));
    };
    auth::start_session(&conn, cookies, user_id, config.max_sessions)
        .map_err(|_| render_login(Some("Could not create a session")))?;

    Ok(Redirect::to("/dashboard"))
}

#[get("/logout")]
fn logout(pool: &State<DbPool>, cookies: &CookieJar<'_>) -> Redirect {
    auth::end_session(pool, cookies);
    Redirect::to("/login")
}

#[get("/")]
fn home(pool: &State<DbPool>, cookies: &CookieJar<'_>) -> AppResult<Template> {
    let conn = pool.get()?;
    let user = auth::current_user(&conn, cookies);
    let context = serde_json::json!({
        "username": user.map(|u| u.username),
        "book_count": db::list_books(&conn)?.len(),
        "expense_count": db::list_expenses(&conn, &ReportFilters::default())?.len(),
        "ticket_count": db::list_tickets(&conn)?.len(),
    });
    Ok(Template::render("home", &context))
}

fn ticket_dashboard(pool: &DbPool, cookies: &CookieJar<'_>, sort: Option<&str>) -> AppResult<Template> {
    let conn = pool.get()?;
    let user = auth::current_user(&conn, cookies);
    let descending = sort.is_some_and(|s| s.eq_ignore_ascii_case("desc"));
    let tickets = order_tickets(db::list_tickets(&conn)?, descending)
        .into_iter()
        .map(ticket_view)
        .collect::<Vec<_>>();
    let statuses = TicketStatus::ALL.iter().map(|s| s.as_str()).collect::<Vec<_>>();

    let context = serde_json::json!({
        "username": user.map(|u| u.username),
        "sort": if descending { "desc" } else { "asc" },
        "tickets": tickets,
        "statuses": statuses,
    });
    Ok(Template::render("dashboard", &context))
}

#[get("/dashboard?<sort>")]
fn dashboard(pool: &State<DbPool>, cookies: &CookieJar<'_>, sort: Option<&str>) -> AppResult<Template> {
    ticket_dashboard(pool, cookies, sort)
}

#[get("/tickets?<sort>")]
fn tickets(pool: &State<DbPool>, cookies: &CookieJar<'_>, sort: Option<&str>) -> AppResult<Template> {
    ticket_dashboard(pool, cookies, sort)
}

#[post("/tickets", data = "<form>")]
fn add_ticket(pool: &State<DbPool>, cookies: &CookieJar<'_>, form: Form<TicketForm>) -> AppResult<Redirect> {
    let user = match auth::require_user(pool, cookies) {
        Ok(user) => user,
        Err(redirect) => return Ok(redirect),
    };
    let form = form.into_inner();
    let subject = form.subject.trim();
    if subject.is_empty() {
        return Err(AppError::BadRequest("subject is required".to_string()));
    }

    let conn = pool.get()?;
    if let Some(expense_id) = form.expense_id {
        if !db::expense_exists(&conn, expense_id)? {
            return Err(AppError::BadRequest(format!("no expense with id {expense_id}")));
        }
    }
    let ticket = NewTicket {
        subject,
        description: form.description.as_deref().unwrap_or("").trim(),
        expense_id: form.expense_id,
        submitted_by: Some(user.id),
        priority: form.priority,
    };
    let id = db::insert_ticket(&conn, &ticket, Utc::now())?;
    info!(ticket_id = id, user_id = user.id, "ticket submitted");
    Ok(Redirect::to("/dashboard"))
}

#[post("/tickets/<id>/status", data = "<form>")]
fn update_ticket_status(
    pool: &State<DbPool>,
    cookies: &CookieJar<'_>,
    id: i64,
    form: Form<StatusForm>,
) -> AppResult<Redirect> {
    if let Err(redirect) = auth::require_user(pool, cookies) {
        return Ok(redirect);
    }
    let status: TicketStatus = form
        .status
        .parse()
        .map_err(|e: crate::models::UnknownStatus| AppError::BadRequest(e.to_string()))?;
    let conn = pool.get()?;
    db::update_ticket_status(&conn, id, status)?;
    info!(ticket_id = id, %status, "ticket status changed");
    Ok(Redirect::to("/dashboard"))
}

#[post("/sort-tickets", data = "<body>")]
fn sort_tickets(body: String) -> AppResult<Json<SortResponse>> {
    let tickets = sorter::parse_payload(&body).inspect_err(|e| warn!(error = %e, "rejected sort request"))?;
    Ok(Json(SortResponse {
        sorted_ticket_ids: sorter::sorted_ids(&tickets),
    }))
}

#[get("/expenses")]
fn expenses(pool: &State<DbPool>, cookies: &CookieJar<'_>) -> AppResult<Template> {
    let conn = pool.get()?;
    let user = auth::current_user(&conn, cookies);
    let list = db::list_expenses(&conn, &ReportFilters::default())?
        .into_iter()
        .map(expense_view)
        .collect::<Vec<_>>();
    let books = db::list_books(&conn)?.into_iter().map(book_view).collect::<Vec<_>>();

    let context = serde_json::json!({
        "username": user.map(|u| u.username),
        "today": Utc::now().date_naive().format("%Y-%m-%d").to_string(),
        "expenses": list,
        "books": books,
    });
    Ok(Template::render("expenses", &context))
}

#[post("/expenses", data = "<form>")]
fn add_expense(pool: &State<DbPool>, cookies: &CookieJar<'_>, form: Form<ExpenseForm>) -> AppResult<Redirect> {
    let user = match auth::require_user(pool, cookies) {
        Ok(user) => user,
        Err(redirect) => return Ok(redirect),
    };
    let form = form.into_inner();
    let amount_cents = parse_amount_to_cents(&form.amount)
        .ok_or_else(|| AppError::BadRequest(format!("invalid amount: {}", form.amount)))?;
    let date = parse_form_date(&form.date)?;
    let (name, category) = (form.name.trim(), form.category.trim());
    if name.is_empty() || category.is_empty() {
        return Err(AppError::BadRequest("name and category are required".to_string()));
    }

    let conn = pool.get()?;
    if let Some(book_id) = form.book_id {
        if !db::book_exists(&conn, book_id)? {
            return Err(AppError::BadRequest(format!("no book with id {book_id}")));
        }
    }
    let expense = NewExpense {
        name,
        amount_cents,
        date,
        category,
        book_id: form.book_id,
    };
    let id = db::insert_expense(&conn, &expense, Utc::now())?;
    info!(expense_id = id, user_id = user.id, amount_cents, "expense recorded");
    Ok(Redirect::to("/expenses"))
}

#[get("/books")]
fn books(pool: &State<DbPool>, cookies: &CookieJar<'_>) -> AppResult<Template> {
    let conn = pool.get()?;
    let user = auth::current_user(&conn, cookies);
    let list = db::list_books(&conn)?.into_iter().map(book_view).collect::<Vec<_>>();
    let context = serde_json::json!({
        "username": user.map(|u| u.username),
        "books": list,
        "authors": db::list_authors(&conn)?,
        "categories": db::list_categories(&conn)?,
        "publishers": db::list_publishers(&conn)?,
    });
    Ok(Template::render("books", &context))
}

#[post("/books", data = "<form>")]
fn add_book(pool: &State<DbPool>, cookies: &CookieJar<'_>, form: Form<BookForm>) -> AppResult<Redirect> {
    if let Err(redirect) = auth::require_user(pool, cookies) {
        return Ok(redirect);
    }
    let form = form.into_inner();
    let (title, author) = (form.title.trim(), form.author.trim());
    if title.is_empty() || author.is_empty() {
        return Err(AppError::BadRequest("title and author are required".to_string()));
    }
    let distribution_expense_cents = match trimmed(form.distribution_expense) {
        Some(raw) => parse_amount_to_cents(&raw)
            .ok_or_else(|| AppError::BadRequest(format!("invalid amount: {raw}")))?,
        None => 0,
    };
    let published_date = trimmed(form.published_date)
        .map(|raw| parse_form_date(&raw))
        .transpose()?;

    let conn = pool.get()?;
    let (author_id, _) = db::find_or_create_author(&conn, author)?;
    let category_id = trimmed(form.category)
        .map(|name| db::find_or_create_category(&conn, &name))
        .transpose()?;
    let publisher_id = match trimmed(form.publisher) {
        Some(name) => {
            let location = trimmed(form.publisher_location).unwrap_or_default();
            Some(db::insert_publisher(&conn, &name, &location)?)
        }
        None => None,
    };
    let subtitle = trimmed(form.subtitle);
    let id = db::insert_book(
        &conn,
        &NewBook {
            title,
            subtitle: subtitle.as_deref(),
            author_id,
            category_id,
            publisher_id,
            published_date,
            distribution_expense_cents,
        },
    )?;
    info!(book_id = id, %title, "book added");
    Ok(Redirect::to("/books"))
}

#[get("/reports?<month>&<category>&<year>")]
fn reports(
    pool: &State<DbPool>,
    month: Option<String>,
    category: Option<String>,
    year: Option<String>,
) -> AppResult<Template> {
    let context = report_context(pool, &ReportQuery { month, category, year })?;
    Ok(Template::render("report", &context))
}

#[get("/api/reports?<month>&<category>&<year>")]
fn reports_json(
    pool: &State<DbPool>,
    month: Option<String>,
    category: Option<String>,
    year: Option<String>,
) -> AppResult<Json<ReportContext>> {
    report_context(pool, &ReportQuery { month, category, year }).map(Json)
}

#[get("/reports/export?<month>&<category>&<year>")]
fn export_report_csv(
    pool: &State<DbPool>,
    month: Option<String>,
    category: Option<String>,
    year: Option<String>,
) -> AppResult<CsvDownload> {
    let query = ReportQuery { month, category, year };
    let conn = pool.get()?;
    let report = MonthlyReport::generate(&*conn, &query.filters())?;
    let mut body = Vec::new();
    report::write_csv(&report.periods, &mut body)?;
    info!(rows = report.periods.len(), "report exported");
    Ok(CsvDownload {
        body,
        content_type: ContentType::CSV,
        disposition: Header::new("Content-Disposition", "attachment; filename=\"report.csv\""),
    })
}

pub fn build(config: Config) -> AppResult<Rocket<Build>> {
    std::fs::create_dir_all(&config.data_dir)?;
    let pool = db::init_db(&config.database_path())?;

    Ok(rocket::build()
        .manage(pool)
        .manage(config)
        .mount(
            "/",
            routes![
                setup,
                setup_post,
                login,
                login_post,
                logout,
                home,
                dashboard,
                tickets,
                add_ticket,
                update_ticket_status,
                sort_tickets,
                expenses,
                add_expense,
                books,
                add_book,
                reports,
                reports_json,
                export_report_csv
            ],
        )
        .mount("/static", FileServer::from(relative!("static")))
        .attach(Template::fairing()))
}
