pub mod background;
pub mod config;
pub mod error;
pub mod gateway;
pub mod ids;
pub mod metadata;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
