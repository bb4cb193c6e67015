//! Build context assembly
//!
//! Structured build scripts, run-scoped context directories and the assembler
//! that ties a validated request to both.

pub mod assembler;
pub mod script;
pub mod workspace;

pub use assembler::{assemble, build_script};
pub use script::{BuildScript, BuildStep};
pub use workspace::BuildContext;
