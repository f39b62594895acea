#[macro_use]
extern crate log;

pub mod config;
pub mod controller;
pub mod hal;
