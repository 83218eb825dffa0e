pub mod events;
pub mod frame;
pub mod loader;
pub mod params;
pub mod promoter;
pub mod store;
pub mod viewpoint;
