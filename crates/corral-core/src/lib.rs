pub mod engine;
pub mod entity;
pub mod policy;
pub mod token;
