#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod association;
pub mod config;
pub mod pipeline;
pub mod predict;
pub mod refine;
pub mod risk;
pub mod types;
pub mod variables;

#[path = "../shared/mod.rs"]
pub mod shared;

#[path = "../validate/mod.rs"]
pub mod validate;
