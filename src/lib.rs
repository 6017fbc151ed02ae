pub mod aggregate;
pub mod config;
pub mod db;
pub mod export;
pub mod logging;
pub mod pipeline;
pub mod raster;
pub mod vector;
