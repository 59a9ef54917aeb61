//! Integration tests for Neb-Harvest
//!
//! These tests use wiremock to stand in for the remote library and
//! tempfile directories for checkpoints and downloads.

mod crawl_tests;
mod download_tests;
mod state_tests;
