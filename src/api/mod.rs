//! API module
//!
//! HTTP client for the spreadsheet web app endpoint.

mod client;

pub use client::{DispatchReceipt, Dispatcher, SheetClient, TransportError, TransportErrorKind};
