//! sga-core: Shared types for the sound group arbiter
//!
//! Ids, the error type, the engine clock and small value types used by every
//! crate in the workspace.

mod error;
mod ids;
mod params;
mod position;
mod time;

pub use error::*;
pub use ids::*;
pub use params::*;
pub use position::*;
pub use time::*;
