//! Infrastructure layer - database access

pub mod db;
