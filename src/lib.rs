// src/lib.rs
pub mod clustering;
pub mod consolidation;
pub mod db;
pub mod matching;
pub mod models;
pub mod utils;
