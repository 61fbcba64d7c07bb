//! Import / bound-import / delay-import / IAT directory family (spec §4.3
//! through §4.5), the single largest component of this crate.

pub mod bound;
pub mod delay;
pub mod descriptor;
pub mod iat;
pub mod imphash;
pub mod ordinals;
pub mod thunk;
