//! Invoice Engine - period resolution, billing eligibility, reconciliation
//! and bulk invoice generation for care agencies.

pub mod config;
pub mod dtos;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
