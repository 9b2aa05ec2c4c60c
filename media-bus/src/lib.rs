pub mod buffer;
pub mod bus;
pub mod caps;
pub mod catalog;
pub mod controller;
pub mod element;
pub mod error;
pub mod graph;
pub mod linker;
pub mod muxer;
pub mod node;
pub mod recorder;
pub mod router;
pub mod sink;
pub mod source;
pub mod tee;

pub use error::{Error, Result};
