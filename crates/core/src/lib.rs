//! Core types and rules for driving a ChromeOS device under test

pub mod domain;
