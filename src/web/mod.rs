//! HTTP API for the record server
//!
//! One endpoint: `POST {prefix}/v1/do`. The handler runs authorization
//! synchronously and hands execution to a background thread, so a `200`
//! means "authorized and planned", not "applied".

pub mod server;
