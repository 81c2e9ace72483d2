//! Book catalogue and expense tracker.
//!
//! Expenses and support tickets are recorded through server-rendered forms.
//! The monthly report groups expenses by calendar month and joins the number of
//! tickets raised in the same month; it is served as a page, as JSON and as a
//! CSV download. `/sort-tickets` orders ticket summaries by priority, then
//! timestamp, then id.

#[macro_use]
extern crate rocket;

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod models;
pub mod money;
pub mod report;
pub mod routes;
pub mod sorter;
