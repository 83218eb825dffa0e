pub mod chunk;
pub mod config;
pub mod coords;
pub mod heightfield;
pub mod noise_field;
