pub mod auth;
pub mod balance;
pub mod config;
pub mod events;
pub mod invite;
pub mod ledger;
pub mod money;
pub mod routes;
pub mod schemas;
pub mod settlement;
pub mod store;
