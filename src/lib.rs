pub mod config;
pub mod db;
pub mod images;
pub mod model;
pub mod remote;
pub mod render;
pub mod state;
pub mod sync;
pub mod userpics;
