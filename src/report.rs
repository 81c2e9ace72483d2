//! Monthly expense report: expenses grouped by (month, year) and joined
//! against the number of tickets raised in the same month.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;

use chrono::{Datelike, Month};
use serde::Serialize;

use crate::error::AppResult;
use crate::models::{ExpenseRecord, TicketRecord};
use crate::money::{cents_to_f64, format_total};

pub const NO_DATA_LABEL: &str = "No data";
pub const CSV_HEADER: [&str; 3] = ["Month", "Total Expenses", "Ticket Count"];

/// Aggregation key. Field order gives the (year, month) ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn of(date: impl Datelike) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// `"Aug 2025"`
    pub fn label(&self) -> String {
        let abbrev = month_from_number(self.month)
            .map(|m| &m.name()[..3])
            .unwrap_or("???");
        format!("{abbrev} {:04}", self.year)
    }
}

fn month_from_number(number: u32) -> Option<Month> {
    u8::try_from(number).ok().and_then(|n| Month::try_from(n).ok())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodSummary {
    /// `None` only for the synthetic no-data row.
    pub period: Option<Period>,
    pub label: String,
    pub total_amount: f64,
    pub ticket_count: i64,
}

impl PeriodSummary {
    pub fn no_data() -> Self {
        Self {
            period: None,
            label: NO_DATA_LABEL.to_string(),
            total_amount: 0.0,
            ticket_count: 0,
        }
    }
}

/// Expense filters. Any field that failed to parse is simply `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportFilters {
    pub month: Option<u32>,
    pub category: Option<String>,
    pub year: Option<i32>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl ReportFilters {
    pub fn from_query(month: Option<&str>, category: Option<&str>, year: Option<&str>) -> Self {
        Self {
            month: non_empty(month)
                .and_then(|m| m.parse::<Month>().ok())
                .map(|m| m.number_from_month()),
            category: non_empty(category).map(str::to_string),
            year: non_empty(year).and_then(|y| y.parse::<i32>().ok()),
        }
    }

    pub fn matches(&self, expense: &ExpenseRecord) -> bool {
        self.month.is_none_or(|m| expense.date.month() == m)
            && self.year.is_none_or(|y| expense.date.year() == y)
            && self
                .category
                .as_deref()
                .is_none_or(|c| expense.category.to_lowercase() == c.to_lowercase())
    }
}

/// Read-only access to the records a report is built from.
pub trait ReportSource {
    fn fetch_expenses(&self, filters: &ReportFilters) -> AppResult<Vec<ExpenseRecord>>;
    fn fetch_tickets(&self) -> AppResult<Vec<TicketRecord>>;

    fn fetch_all_expenses(&self) -> AppResult<Vec<ExpenseRecord>> {
        self.fetch_expenses(&ReportFilters::default())
    }
}

/// Counts every ticket by the month of its timestamp. Report filters never
/// apply here.
pub fn ticket_counts(tickets: &[TicketRecord]) -> HashMap<Period, i64> {
    let mut counts = HashMap::new();
    for ticket in tickets {
        *counts.entry(Period::of(ticket.timestamp)).or_insert(0) += 1;
    }
    counts
}

/// Periods come only from `expenses`; months with tickets but no expenses
/// are left out.
pub fn aggregate(expenses: &[ExpenseRecord], tickets: &[TicketRecord]) -> Vec<PeriodSummary> {
    let mut totals: BTreeMap<Period, i64> = BTreeMap::new();
    for expense in expenses {
        let total = totals.entry(Period::of(expense.date)).or_insert(0);
        *total = total.saturating_add(expense.amount_cents);
    }
    let counts = ticket_counts(tickets);

    totals
        .into_iter()
        .map(|(period, cents)| PeriodSummary {
            period: Some(period),
            label: period.label(),
            total_amount: cents_to_f64(cents),
            ticket_count: counts.get(&period).copied().unwrap_or(0),
        })
        .collect()
}

/// On-screen form of a report. An empty report shows a single synthetic row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportView {
    pub rows: Vec<PeriodSummary>,
    pub no_data: bool,
}

impl ReportView {
    pub fn from_periods(periods: &[PeriodSummary]) -> Self {
        if periods.is_empty() {
            return Self {
                rows: vec![PeriodSummary::no_data()],
                no_data: true,
            };
        }
        Self {
            rows: periods.to_vec(),
            no_data: false,
        }
    }

    pub fn labels(&self) -> Vec<String> {
        self.rows.iter().map(|row| row.label.clone()).collect()
    }

    pub fn totals(&self) -> Vec<f64> {
        self.rows.iter().map(|row| row.total_amount).collect()
    }

    pub fn ticket_counts(&self) -> Vec<i64> {
        self.rows.iter().map(|row| row.ticket_count).collect()
    }
}

/// Writes the export table. Unlike [`ReportView`], an empty report produces
/// just the header.
pub fn write_csv<W: Write>(periods: &[PeriodSummary], writer: W) -> AppResult<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(CSV_HEADER)?;
    for period in periods {
        csv.write_record([
            period.label.clone(),
            format_total(period.total_amount),
            period.ticket_count.to_string(),
        ])?;
    }
    csv.flush()?;
    Ok(())
}

/// `str.title()` casing: a letter is upper-cased when the character before it
/// is not a letter, lower-cased otherwise.
fn title_case(value: &str) -> String {
    let mut cased = String::with_capacity(value.len());
    let mut after_letter = false;
    for c in value.trim().chars() {
        if after_letter {
            cased.extend(c.to_lowercase());
        } else {
            cased.extend(c.to_uppercase());
        }
        after_letter = c.is_alphabetic();
    }
    cased
}

/// Dropdown choices, always drawn from the unfiltered expense set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Vocabulary {
    /// Full month names in calendar order.
    pub months: Vec<String>,
    pub categories: Vec<String>,
    pub years: Vec<i32>,
}

impl Vocabulary {
    pub fn from_expenses(expenses: &[ExpenseRecord]) -> Self {
        let months: BTreeSet<u32> = expenses.iter().map(|e| e.date.month()).collect();
        let categories: BTreeSet<String> = expenses
            .iter()
            .map(|e| title_case(&e.category))
            .filter(|c| !c.is_empty())
            .collect();
        let years: BTreeSet<i32> = expenses.iter().map(|e| e.date.year()).collect();

        Self {
            months: months
                .into_iter()
                .filter_map(month_from_number)
                .map(|m| m.name().to_string())
                .collect(),
            categories: categories.into_iter().collect(),
            years: years.into_iter().collect(),
        }
    }
}

/// Everything one report request produces.
#[derive(Debug, Clone)]
pub struct MonthlyReport {
    pub periods: Vec<PeriodSummary>,
    pub vocabulary: Vocabulary,
}

impl MonthlyReport {
    pub fn generate(source: &impl ReportSource, filters: &ReportFilters) -> AppResult<Self> {
        let expenses = source.fetch_expenses(filters)?;
        let tickets = source.fetch_tickets()?;
        let all_expenses = source.fetch_all_expenses()?;
        Ok(Self {
            periods: aggregate(&expenses, &tickets),
            vocabulary: Vocabulary::from_expenses(&all_expenses),
        })
    }

    pub fn view(&self) -> ReportView {
        ReportView::from_periods(&self.periods)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    use crate::models::TicketStatus;

    struct MemorySource {
        expenses: Vec<ExpenseRecord>,
        tickets: Vec<TicketRecord>,
    }

    impl ReportSource for MemorySource {
        fn fetch_expenses(&self, filters: &ReportFilters) -> AppResult<Vec<ExpenseRecord>> {
            Ok(self
                .expenses
                .iter()
                .filter(|e| filters.matches(e))
                .cloned()
                .collect())
        }

        fn fetch_tickets(&self) -> AppResult<Vec<TicketRecord>> {
            Ok(self.tickets.clone())
        }
    }

    fn expense(id: i64, name: &str, amount: i64, date: (i32, u32, u32), category: &str) -> ExpenseRecord {
        let stamp = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        ExpenseRecord {
            id,
            name: name.to_string(),
            amount_cents: amount * 100,
            date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            category: category.to_string(),
            book_id: None,
            created_at: stamp,
            updated_at: stamp,
        }
    }

    fn ticket(id: i64, date: (i32, u32, u32)) -> TicketRecord {
        TicketRecord {
            id,
            subject: format!("ticket {id}"),
            description: String::new(),
            expense_id: None,
            submitted_by: None,
            priority: 1,
            status: TicketStatus::Pending,
            timestamp: Utc.with_ymd_and_hms(date.0, date.1, date.2, 12, 0, 0).unwrap(),
        }
    }

    fn august_source() -> MemorySource {
        MemorySource {
            expenses: vec![
                expense(1, "Printing", 5000, (2025, 8, 1), "Production"),
                expense(2, "Marketing", 3000, (2025, 8, 15), "Promotion"),
            ],
            tickets: vec![ticket(1, (2025, 8, 10))],
        }
    }

    #[test]
    fn groups_august_expenses_with_ticket_count() {
        let report = MonthlyReport::generate(&august_source(), &ReportFilters::default()).unwrap();
        let view = report.view();
        assert!(!view.no_data);
        assert_eq!(view.labels(), vec!["Aug 2025"]);
        assert_eq!(view.totals(), vec![8000.0]);
        assert_eq!(view.ticket_counts(), vec![1]);
    }

    #[test]
    fn periods_are_in_year_then_month_order() {
        let expenses = vec![
            expense(1, "a", 10, (2025, 1, 5), "x"),
            expense(2, "b", 20, (2024, 12, 5), "x"),
            expense(3, "c", 30, (2024, 2, 5), "x"),
            expense(4, "d", 5, (2025, 1, 20), "x"),
        ];
        let labels: Vec<_> = aggregate(&expenses, &[]).into_iter().map(|p| p.label).collect();
        assert_eq!(labels, vec!["Feb 2024", "Dec 2024", "Jan 2025"]);
    }

    #[test]
    fn ticket_only_months_are_not_periods() {
        let expenses = vec![expense(1, "a", 10, (2025, 8, 1), "x")];
        let tickets = vec![ticket(1, (2025, 8, 3)), ticket(2, (2025, 9, 3)), ticket(3, (2025, 9, 4))];
        let periods = aggregate(&expenses, &tickets);
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].ticket_count, 1);
    }

    #[test]
    fn months_without_tickets_count_zero() {
        let expenses = vec![expense(1, "a", 10, (2025, 7, 1), "x")];
        let periods = aggregate(&expenses, &[ticket(1, (2025, 8, 3))]);
        assert_eq!(periods[0].ticket_count, 0);
    }

    #[test]
    fn tickets_ignore_expense_filters() {
        let mut source = august_source();
        source.tickets.push(ticket(2, (2025, 8, 20)));
        let filters = ReportFilters::from_query(None, Some("promotion"), None);
        let report = MonthlyReport::generate(&source, &filters).unwrap();
        assert_eq!(report.periods.len(), 1);
        assert_eq!(report.periods[0].total_amount, 3000.0);
        assert_eq!(report.periods[0].ticket_count, 2);
    }

    #[test]
    fn no_match_yields_synthetic_row() {
        let filters = ReportFilters::from_query(Some("March"), None, None);
        let view = MonthlyReport::generate(&august_source(), &filters).unwrap().view();
        assert!(view.no_data);
        assert_eq!(view.rows, vec![PeriodSummary::no_data()]);
        assert_eq!(view.labels(), vec![NO_DATA_LABEL]);
        assert_eq!(view.totals(), vec![0.0]);
        assert_eq!(view.ticket_counts(), vec![0]);
    }

    #[test]
    fn unknown_month_name_disables_month_filter() {
        let filters = ReportFilters::from_query(Some("Frobtember"), None, None);
        assert_eq!(filters, ReportFilters::default());
        let view = MonthlyReport::generate(&august_source(), &filters).unwrap().view();
        assert_eq!(view.labels(), vec!["Aug 2025"]);
    }

    #[test]
    fn month_names_parse_case_insensitively() {
        assert_eq!(ReportFilters::from_query(Some("august"), None, None).month, Some(8));
        assert_eq!(ReportFilters::from_query(Some("AUGUST"), None, None).month, Some(8));
    }

    #[test]
    fn non_numeric_year_disables_year_filter() {
        let filters = ReportFilters::from_query(None, None, Some("20x5"));
        assert_eq!(filters.year, None);
        assert_eq!(ReportFilters::from_query(None, None, Some("2025")).year, Some(2025));
    }

    #[test]
    fn year_filter_excludes_other_years() {
        let mut source = august_source();
        source.expenses.push(expense(3, "Old", 100, (2024, 8, 1), "Production"));
        let filters = ReportFilters::from_query(Some("August"), Some(""), Some("2024"));
        let report = MonthlyReport::generate(&source, &filters).unwrap();
        let labels: Vec<_> = report.periods.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["Aug 2024"]);
    }

    #[test]
    fn csv_has_one_row_per_period() {
        let report = MonthlyReport::generate(&august_source(), &ReportFilters::default()).unwrap();
        let mut out = Vec::new();
        write_csv(&report.periods, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Month,Total Expenses,Ticket Count\nAug 2025,8000.0,1\n"
        );
    }

    #[test]
    fn csv_of_empty_report_has_no_synthetic_row() {
        let mut out = Vec::new();
        write_csv(&[], &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Month,Total Expenses,Ticket Count\n");
    }

    #[test]
    fn vocabulary_deduplicates_categories_case_insensitively() {
        let expenses = vec![
            expense(1, "a", 1, (2025, 8, 1), "food"),
            expense(2, "b", 1, (2025, 8, 2), "Food"),
            expense(3, "c", 1, (2025, 8, 3), "office supplies"),
        ];
        let vocabulary = Vocabulary::from_expenses(&expenses);
        assert_eq!(vocabulary.categories, vec!["Food", "Office Supplies"]);
    }

    #[test]
    fn vocabulary_months_follow_calendar_order() {
        let expenses = vec![
            expense(1, "a", 1, (2025, 8, 1), "x"),
            expense(2, "b", 1, (2024, 4, 1), "x"),
            expense(3, "c", 1, (2025, 12, 1), "x"),
            expense(4, "d", 1, (2023, 8, 9), "x"),
        ];
        let vocabulary = Vocabulary::from_expenses(&expenses);
        assert_eq!(vocabulary.months, vec!["April", "August", "December"]);
        assert_eq!(vocabulary.years, vec![2023, 2024, 2025]);
    }

    #[test]
    fn vocabulary_ignores_active_filters() {
        let filters = ReportFilters::from_query(None, Some("Promotion"), None);
        let report = MonthlyReport::generate(&august_source(), &filters).unwrap();
        assert_eq!(report.vocabulary.categories, vec!["Production", "Promotion"]);
    }

    #[test]
    fn category_casing_restarts_after_non_letters() {
        assert_eq!(title_case("o'brien"), "O'Brien");
        assert_eq!(title_case("food&drink"), "Food&Drink");
        assert_eq!(title_case("3d printing"), "3D Printing");
        assert_eq!(title_case("  église  "), "Église");
    }

    #[test]
    fn period_totals_saturate_instead_of_overflowing() {
        let mut big = expense(1, "a", 0, (2025, 8, 1), "x");
        big.amount_cents = i64::MAX - 1;
        let mut other = big.clone();
        other.id = 2;
        let periods = aggregate(&[big, other], &[]);
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].total_amount, cents_to_f64(i64::MAX));
    }
}
