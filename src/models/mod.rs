pub mod requests;
pub mod schema;
