//! Classification seam for the faultline pipeline.
//!
//! The pipeline treats classification as an injectable policy: anything
//! implementing [`ExceptionHandler`] can turn a raw error plus caller
//! context into a classified [`faultline_core::ExceptionRecord`]. The
//! [`DefaultHandler`] ships a heuristic policy; [`StaticHandler`] is a
//! fixed-output fallback for tests and offline use.

pub mod default;
pub mod fallback;
pub mod handler;

pub use default::DefaultHandler;
pub use fallback::StaticHandler;
pub use handler::ExceptionHandler;
