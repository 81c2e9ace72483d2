use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::models::{
    Author, BookRecord, Category, ExpenseRecord, Publisher, TicketRecord, TicketStatus, User,
};
use crate::report::{ReportFilters, ReportSource};

pub type DbPool = Pool<SqliteConnectionManager>;

pub fn init_db(path: &Path) -> AppResult<DbPool> {
    let manager = SqliteConnectionManager::file(path)
        .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
    let pool = Pool::new(manager)?;
    run_migrations(&*pool.get()?)?;
    info!(path = %path.display(), "database ready");
    Ok(pool)
}

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS authors (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            bio TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS publishers (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            location TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS books (
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            subtitle TEXT,
            author_id INTEGER NOT NULL,
            category_id INTEGER,
            publisher_id INTEGER,
            published_date TEXT,
            distribution_expense_cents INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(author_id) REFERENCES authors(id) ON DELETE CASCADE,
            FOREIGN KEY(category_id) REFERENCES categories(id) ON DELETE SET NULL,
            FOREIGN KEY(publisher_id) REFERENCES publishers(id) ON DELETE SET NULL
        );

        CREATE TABLE IF NOT EXISTS expenses (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            date TEXT NOT NULL,
            category TEXT NOT NULL,
            book_id INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(book_id) REFERENCES books(id) ON DELETE SET NULL
        );

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

        CREATE TABLE IF NOT EXISTS tickets (
            id INTEGER PRIMARY KEY,
            subject TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            expense_id INTEGER,
            submitted_by INTEGER,
            priority INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK(status IN ('pending', 'in_progress', 'approved', 'resolved')),
            timestamp TEXT NOT NULL,
            FOREIGN KEY(expense_id) REFERENCES expenses(id) ON DELETE CASCADE,
            FOREIGN KEY(submitted_by) REFERENCES users(id) ON DELETE SET NULL
        );
        ",
    )
}

// Users and sessions

pub fn has_users(conn: &Connection) -> Result<bool> {
    conn.query_row("SELECT EXISTS(SELECT 1 FROM users)", [], |row| {
        row.get::<_, i64>(0)
    })
    .map(|value| value == 1)
}

pub fn insert_user(conn: &Connection, username: &str, password_hash: &str, created_at: DateTime<Utc>) -> Result<i64> {
    conn.execute(
        "INSERT INTO users (username, password_hash, created_at) VALUES (?1, ?2, ?3)",
        params![username, password_hash, created_at],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn user_credentials(conn: &Connection, username: &str) -> Result<Option<(i64, String)>> {
    conn.query_row(
        "SELECT id, password_hash FROM users WHERE username = ?1",
        params![username],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
}

pub fn create_session(conn: &Connection, user_id: i64, token: &str, created_at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT INTO sessions (user_id, token, created_at) VALUES (?1, ?2, ?3)",
        params![user_id, token, created_at],
    )?;
    Ok(())
}

pub fn user_by_session(conn: &Connection, token: &str) -> Result<Option<User>> {
    conn.query_row(
        "
        SELECT u.id, u.username
        FROM sessions s
        JOIN users u ON s.user_id = u.id
        WHERE s.token = ?1
        ",
        params![token],
        |row| {
            Ok(User {
                id: row.get(0)?,
                username: row.get(1)?,
            })
        },
    )
    .optional()
}

pub fn delete_session(conn: &Connection, token: &str) -> Result<()> {
    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(())
}

pub fn session_count(conn: &Connection, user_id: i64) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM sessions WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )
}

/// Keeps only the `keep` newest sessions of a user.
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

// Catalogue

pub fn find_or_create_author(conn: &Connection, name: &str) -> Result<(i64, bool)> {
    let existing = conn
        .query_row("SELECT id FROM authors WHERE name = ?1", params![name], |row| row.get(0))
        .optional()?;
    if let Some(id) = existing {
        return Ok((id, false));
    }
    conn.execute("INSERT INTO authors (name) VALUES (?1)", params![name])?;
    Ok((conn.last_insert_rowid(), true))
}

pub fn list_authors(conn: &Connection) -> Result<Vec<Author>> {
    let mut stmt = conn.prepare("SELECT id, name, bio FROM authors ORDER BY name")?;
    let rows = stmt.query_map([], |row| {
        Ok(Author {
            id: row.get(0)?,
            name: row.get(1)?,
            bio: row.get(2)?,
        })
    })?;
    rows.collect()
}

pub fn find_or_create_category(conn: &Connection, name: &str) -> Result<i64> {
    let existing = conn
        .query_row("SELECT id FROM categories WHERE name = ?1", params![name], |row| row.get(0))
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    conn.execute("INSERT INTO categories (name) VALUES (?1)", params![name])?;
    Ok(conn.last_insert_rowid())
}

pub fn list_categories(conn: &Connection) -> Result<Vec<Category>> {
    let mut stmt = conn.prepare("SELECT id, name FROM categories ORDER BY name")?;
    let rows = stmt.query_map([], |row| {
        Ok(Category {
            id: row.get(0)?,
            name: row.get(1)?,
        })
    })?;
    rows.collect()
}

pub fn insert_publisher(conn: &Connection, name: &str, location: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO publishers (name, location) VALUES (?1, ?2)",
        params![name, location],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_publishers(conn: &Connection) -> Result<Vec<Publisher>> {
    let mut stmt = conn.prepare("SELECT id, name, location FROM publishers ORDER BY name")?;
    let rows = stmt.query_map([], |row| {
        Ok(Publisher {
            id: row.get(0)?,
            name: row.get(1)?,
            location: row.get(2)?,
        })
    })?;
    rows.collect()
}

pub struct NewBook<'a> {
    pub title: &'a str,
    pub subtitle: Option<&'a str>,
    pub author_id: i64,
    pub category_id: Option<i64>,
    pub publisher_id: Option<i64>,
    pub published_date: Option<NaiveDate>,
    pub distribution_expense_cents: i64,
}

pub fn insert_book(conn: &Connection, book: &NewBook<'_>) -> Result<i64> {
    conn.execute(
        "
        INSERT INTO books (title, subtitle, author_id, category_id, publisher_id, published_date, distribution_expense_cents)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ",
        params![
            book.title,
            book.subtitle,
            book.author_id,
            book.category_id,
            book.publisher_id,
            book.published_date,
            book.distribution_expense_cents
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_books(conn: &Connection) -> Result<Vec<BookRecord>> {
    let mut stmt = conn.prepare(
        "
        SELECT b.id, b.title, b.subtitle, a.name, c.name, p.name, b.published_date, b.distribution_expense_cents
        FROM books b
        JOIN authors a ON b.author_id = a.id
        LEFT JOIN categories c ON b.category_id = c.id
        LEFT JOIN publishers p ON b.publisher_id = p.id
        ORDER BY b.title, b.id
        ",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(BookRecord {
            id: row.get(0)?,
            title: row.get(1)?,
            subtitle: row.get(2)?,
            author_name: row.get(3)?,
            category_name: row.get(4)?,
            publisher_name: row.get(5)?,
            published_date: row.get(6)?,
            distribution_expense_cents: row.get(7)?,
        })
    })?;
    rows.collect()
}

pub fn book_exists(conn: &Connection, book_id: i64) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM books WHERE id = ?1)",
        params![book_id],
        |row| row.get(0),
    )
}

// Expenses and tickets

pub fn expense_exists(conn: &Connection, expense_id: i64) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM expenses WHERE id = ?1)",
        params![expense_id],
        |row| row.get(0),
    )
}

pub struct NewExpense<'a> {
    pub name: &'a str,
    pub amount_cents: i64,
    pub date: NaiveDate,
    pub category: &'a str,
    pub book_id: Option<i64>,
}

pub fn insert_expense(conn: &Connection, expense: &NewExpense<'_>, now: DateTime<Utc>) -> Result<i64> {
    conn.execute(
        "
        INSERT INTO expenses (name, amount_cents, date, category, book_id, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
        ",
        params![
            expense.name,
            expense.amount_cents,
            expense.date,
            expense.category,
            expense.book_id,
            now
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn expense_from_row(row: &Row<'_>) -> Result<ExpenseRecord> {
    Ok(ExpenseRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        amount_cents: row.get(2)?,
        date: row.get(3)?,
        category: row.get(4)?,
        book_id: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Month and year are matched in SQL on the stored `YYYY-MM-DD` date. The
/// category is compared afterwards with [`ReportFilters::matches`], since
/// SQLite's `lower()` folds ASCII only.
pub fn list_expenses(conn: &Connection, filters: &ReportFilters) -> Result<Vec<ExpenseRecord>> {
    let mut stmt = conn.prepare(
        "
        SELECT id, name, amount_cents, date, category, book_id, created_at, updated_at
        FROM expenses
        WHERE (?1 IS NULL OR CAST(strftime('%m', date) AS INTEGER) = ?1)
          AND (?2 IS NULL OR CAST(strftime('%Y', date) AS INTEGER) = ?2)
        ORDER BY date DESC, id DESC
        ",
    )?;
    let rows = stmt.query_map(params![filters.month, filters.year], expense_from_row)?;
    let mut expenses = Vec::new();
    for expense in rows {
        let expense = expense?;
        if filters.matches(&expense) {
            expenses.push(expense);
        }
    }
    Ok(expenses)
}

pub struct NewTicket<'a> {
    pub subject: &'a str,
    pub description: &'a str,
    pub expense_id: Option<i64>,
    pub submitted_by: Option<i64>,
    pub priority: i64,
}

pub fn insert_ticket(conn: &Connection, ticket: &NewTicket<'_>, timestamp: DateTime<Utc>) -> Result<i64> {
    conn.execute(
        "
        INSERT INTO tickets (subject, description, expense_id, submitted_by, priority, status, timestamp)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ",
        params![
            ticket.subject,
            ticket.description,
            ticket.expense_id,
            ticket.submitted_by,
            ticket.priority,
            TicketStatus::Pending,
            timestamp
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_tickets(conn: &Connection) -> Result<Vec<TicketRecord>> {
    let mut stmt = conn.prepare(
        "
        SELECT id, subject, description, expense_id, submitted_by, priority, status, timestamp
        FROM tickets
        ORDER BY id
        ",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(TicketRecord {
            id: row.get(0)?,
            subject: row.get(1)?,
            description: row.get(2)?,
            expense_id: row.get(3)?,
            submitted_by: row.get(4)?,
            priority: row.get(5)?,
            status: row.get(6)?,
            timestamp: row.get(7)?,
        })
    })?;
    rows.collect()
}

pub fn update_ticket_status(conn: &Connection, ticket_id: i64, status: TicketStatus) -> AppResult<()> {
    let changed = conn.execute(
        "UPDATE tickets SET status = ?1 WHERE id = ?2",
        params![status, ticket_id],
    )?;
    if changed == 0 {
        return Err(AppError::ticket_not_found(ticket_id));
    }
    Ok(())
}

impl ReportSource for Connection {
    fn fetch_expenses(&self, filters: &ReportFilters) -> AppResult<Vec<ExpenseRecord>> {
        Ok(list_expenses(self, filters)?)
    }

    fn fetch_tickets(&self) -> AppResult<Vec<TicketRecord>> {
        Ok(list_tickets(self)?)
    }
}
