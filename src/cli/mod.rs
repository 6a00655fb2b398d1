pub mod counts;
pub mod migrate;
