pub mod controller;
pub mod relay;
