//! WebSocket Tests

mod client_tests;
mod session_tests;
