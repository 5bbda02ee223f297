#![forbid(unsafe_code)]

pub mod list_file;
pub mod repository;
pub mod sqlite;
