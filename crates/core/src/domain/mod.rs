pub mod codes;
pub mod schema;
pub mod session;
pub mod values;
