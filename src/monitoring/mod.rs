/*!
 * Monitoring
 * Tracing setup for the tracker
 */

mod tracer;

pub use tracer::{init_tracing, BaselineSpan, TRACE_JSON_ENV};
