//! Integration tests against a real SQLite file and a mock API

mod background_test;
mod reconciliation_test;
