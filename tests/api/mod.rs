//! HTTP API Tests

mod health_tests;
mod presence_tests;
