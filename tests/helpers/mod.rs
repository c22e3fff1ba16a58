#![allow(dead_code)]

pub mod builders;
pub mod stores;

pub use builders::UserBuilder;
pub use stores::{TestFiles, TestWarden};
