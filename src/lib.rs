//! Recurring Jobs: discovery and cancellation of recurring ERC20 transfer
//! jobs held on a recurring-transactions contract.

pub mod chain;
pub mod config;
pub mod error;
pub mod jobs;
