//! Shared fixtures for unit tests: synthetic PE images and nettrace streams.


pub use image::*;
pub use nettrace::*;
