//! HTTP/1.1 wire handling for the proxy front end.
//!
//! # Architecture
//!
//! - **`connection`**: Per-client state machine feeding parsed requests to the proxy
//! - **`parser`**: Parses incoming HTTP requests from byte buffers
//! - **`request`**: HTTP request representation and header helpers
//! - **`response`**: Locally generated responses (429, 502, ...) with a builder
//! - **`writer`**: Serializes and writes local responses to the client
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for incoming request data
//!        └──────┬──────┘
//!               │ Request received          Malformed request
//!               ▼                                  │
//!        ┌──────────────────┐                      ▼
//!        │   Processing     │             ┌──────────────────┐
//!        └──────┬───────────┘             │    Writing       │ ← 400/413/501
//!               │                         └──────┬───────────┘
//!               ├─ Rejected + keep-alive → Reading
//!               └─ Forwarded / Bad gateway → Closed
//! ```

pub mod request;
pub mod response;
pub mod parser;
pub mod connection;
pub mod writer;
