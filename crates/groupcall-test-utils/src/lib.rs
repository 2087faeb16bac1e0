//! # Group Call Test Utilities
//!
//! Mock implementations and fixtures for testing the group call service
//! without a media server or real WebSocket clients.
//!
//! ## Modules
//!
//! - `mock_media` - In-memory media engine that records every call
//! - `mock_transport` - Signaling transport that captures outbound messages
//! - `fixtures` - Message builders and a scripted signaling client
//!
//! ## Usage
//!
//! ```rust,ignore
//! use groupcall_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let engine = MockMediaEngine::builder().reject_offer("bad-offer").build();
//!     let (router, _registry) = test_router(&engine);
//!
//!     let mut alice = TestClient::connect(&router, "alice-session");
//!     alice.send(join("alice", "R1")).await;
//!     assert_eq!(alice.messages().await, vec![existing(&[])]);
//! }
//! ```
//!
//! ## Widening races
//!
//! ```rust,ignore
//! let engine = MockMediaEngine::builder()
//!     .creation_delay(Duration::from_millis(50))
//!     .build();
//! // Two concurrent receiveVideoFrom calls now overlap inside endpoint creation.
//! ```

pub mod fixtures;
pub mod mock_media;
pub mod mock_transport;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_media::*;
pub use mock_transport::*;
