/*!
 * Monitoring
 * Tracing subscriber setup
 */

pub mod tracer;

pub use tracer::{generate_trace_id, init_tracing, try_init_tracing};
