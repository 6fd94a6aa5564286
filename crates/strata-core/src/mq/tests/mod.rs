pub mod backoff_tests;
pub mod factory_tests;
