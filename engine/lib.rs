#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod batch;
pub mod config;
pub mod data;
pub mod linalg;
pub mod matrix;
pub mod progress;
pub mod root;
pub mod schema;
#[cfg(test)]
mod test_fixtures;
pub mod writer;
