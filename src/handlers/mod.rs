//! HTTP handlers for the operator API.

pub mod dlq;
