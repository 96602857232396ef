//! HTTP handlers for the orders API.

pub mod order;
