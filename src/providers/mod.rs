//! Concrete provider registries
//!
//! Each provider adapts one hosted DNS API to the `Registry` trait. The
//! builders are registered by name at startup; registry definitions pick
//! one through their `builder` key.

pub mod powerdns;

use crate::ddns::registry::BuilderSet;

/// Register every provider this build ships.
pub fn register_builtin(builders: &mut BuilderSet) {
    builders.register("powerdns", powerdns::build);
}
