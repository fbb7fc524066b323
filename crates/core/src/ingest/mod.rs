pub mod history;
pub mod provider;
pub mod types;
pub mod yahoo;
