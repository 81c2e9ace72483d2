use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Author {
    pub id: i64,
    pub name: String,
    pub bio: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Publisher {
    pub id: i64,
    pub name: String,
    pub location: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookRecord {
    pub id: i64,
    pub title: String,
    pub subtitle: Option<String>,
    pub author_name: String,
    pub category_name: Option<String>,
    pub publisher_name: Option<String>,
    pub published_date: Option<NaiveDate>,
    pub distribution_expense_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpenseRecord {
    pub id: i64,
    pub name: String,
    pub amount_cents: i64,
    pub date: NaiveDate,
    pub category: String,
    pub book_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Pending,
    InProgress,
    Approved,
    Resolved,
}

impl TicketStatus {
    pub const ALL: [TicketStatus; 4] = [
        TicketStatus::Pending,
        TicketStatus::InProgress,
        TicketStatus::Approved,
        TicketStatus::Resolved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Pending => "pending",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Approved => "approved",
            TicketStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown ticket status: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for TicketStatus {
    type Err = UnknownStatus;

    /// Accepts the older `open` and `completed` spellings as well.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" | "open" => Ok(TicketStatus::Pending),
            "in_progress" => Ok(TicketStatus::InProgress),
            "approved" => Ok(TicketStatus::Approved),
            "resolved" | "completed" => Ok(TicketStatus::Resolved),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl ToSql for TicketStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TicketStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketRecord {
    pub id: i64,
    pub subject: String,
    pub description: String,
    pub expense_id: Option<i64>,
    pub submitted_by: Option<i64>,
    pub priority: i64,
    pub status: TicketStatus,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_legacy_names() {
        assert_eq!("open".parse::<TicketStatus>(), Ok(TicketStatus::Pending));
        assert_eq!("Completed".parse::<TicketStatus>(), Ok(TicketStatus::Resolved));
        assert_eq!("in_progress".parse::<TicketStatus>(), Ok(TicketStatus::InProgress));
        assert!("closed".parse::<TicketStatus>().is_err());
    }

    #[test]
    fn status_display_matches_storage_name() {
        for status in TicketStatus::ALL {
            assert_eq!(status.to_string().parse::<TicketStatus>(), Ok(status));
        }
    }
}
