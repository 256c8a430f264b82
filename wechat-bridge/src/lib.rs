//! Native-messaging host library: wire framing, the dispatch loop, and
//! the action handlers. Split from the binary so integration tests can
//! drive the host over in-memory streams.

pub mod handlers;
pub mod host;
pub mod transport;
