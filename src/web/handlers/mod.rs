pub mod accounts;
pub mod appservice;
pub mod content;
pub mod health;
pub mod links;
pub mod metrics;
