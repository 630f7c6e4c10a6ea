#![allow(dead_code)]

mod harness;
pub use harness::*;

mod publish_quota_tests;
mod stream_tests;
