/*!
 * Services
 * Long-running helpers with an explicit lifecycle
 */

pub mod idle;

pub use idle::{IdleClient, IdleTracker};
