//! End-to-end scenarios over the in-process simulated replica pool.
//!
//! Each scenario runs the full coordinator: scheduling, monitoring, crash
//! injection and verification against real `SimReplica`s.

mod scenario_tests;
