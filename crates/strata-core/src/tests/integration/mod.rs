#![cfg(test)]

pub mod common;
pub mod platform_tests;
pub mod queue_tests;
