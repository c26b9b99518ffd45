//! Opaque identifier generation. Every aggregate id, transaction id, plan
//! id, etc. is a v4 UUID formatted as a string at the boundary.

use uuid::Uuid;

pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4())
}
