pub mod app;
pub mod camera3d;
pub mod cli;
pub mod config;
pub mod controller;
pub mod decode;
pub mod error;
pub mod input;
pub mod instancing;
pub mod loader;
pub mod material;
pub mod mesh;
pub mod metadata;
pub mod renderer;
pub mod texture;
pub mod time;

pub use app::{run, App};
pub use error::{VatError, VatResult};
