pub mod db;
pub mod evaluator;
pub mod ics;
pub mod models;
pub mod reminders;
pub mod service;
pub mod template;
