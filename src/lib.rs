//! Turn loosely structured patch requests into verified, reversible
//! instructions for a live-coding audio runtime.

pub mod audit;
pub mod command;
pub mod emitter;
pub mod error;
pub mod llm;
pub mod logging;
pub mod normalizer;
pub mod paths;
pub mod pyrepr;
pub mod revert;
pub mod safety;
pub mod sandbox;
pub mod session;
pub mod settings;
pub mod sink;
pub mod turn;
pub mod validation;
