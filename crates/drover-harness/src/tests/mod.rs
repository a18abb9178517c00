//! Test infrastructure shared by the harness unit tests.


pub use mocks::{MockReplica, MockReplicaFactory, mock_pool};
