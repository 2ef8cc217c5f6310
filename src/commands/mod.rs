pub mod chat;
pub mod fetch;
pub mod index;
pub mod query;
pub mod status;
