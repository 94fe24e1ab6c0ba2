//! Test suite for campo-sync
//!
//! This module organizes all tests

pub mod common;
pub mod integration;
