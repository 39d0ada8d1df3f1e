#![allow(dead_code)]

pub mod support;
