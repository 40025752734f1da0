//! Rhai guest binding for the function runner.
//!
//! A guest is a `.rhai` script defining `fn Main(req)`. The script is
//! compiled and its top level run once; `Main` is then called for every
//! request with `req` as an object map. Returning `respond(value, status)`
//! or `respond(value, #{ status: n })` attaches a status code.

pub mod convert;
pub mod limits;
pub mod reply;
pub mod script;

pub use limits::RhaiLimits;
pub use script::{RhaiGuest, RhaiLoader, SCRIPT_EXTENSION, create_engine};
