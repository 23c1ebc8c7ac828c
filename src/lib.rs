//! STK push payment service: initiation, callback reconciliation and status
//! lookup for M-Pesa mobile payments.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
