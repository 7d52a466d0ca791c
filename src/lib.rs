#[macro_use]
extern crate error_chain;

pub mod clock;
pub mod container;
pub mod domain;
pub mod errors;
pub mod lifecycle;
pub mod manager;
pub mod reconcile;
pub mod replicas;
pub mod resources;
pub mod status;
pub mod traffic;
