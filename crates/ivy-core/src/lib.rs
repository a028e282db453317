//! # ivy Core
//!
//! Core protocol implementation for the ivy local-network overlay.
//!
//! This crate provides:
//! - Node identity and peer IDs
//! - Length-prefixed framing and the wire message codec
//! - The signed ephemeral handshake
//! - Encrypted sessions with a background read pump
//! - Connection and peer registries
//! - Per-connection handlers and the node that runs them
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Node / ConnectionHandler                      │
//! │   (accept, dial, register, read loop, teardown)                  │
//! ├─────────────────────────────────────────────────────────────────┤
//! │        Handshake           │          SecureSession              │
//! │   (signed X25519 setup)    │   (sealed PeerMessages)             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                  WireMessage codec + Framing                     │
//! │   (CBOR map by variant, u64 LE length prefix)                    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod frame;
pub mod handler;
pub mod handshake;
pub mod identity;
pub mod message;
pub mod node;
pub mod registry;
pub mod session;

pub use error::{Error, FramingError, Result};
pub use handler::{ConnectionHandler, NodeEvent};
pub use handshake::{Handshake, HandshakePhase, Role, Session};
pub use identity::{Identity, PeerId};
pub use message::{EncryptedPayload, HandshakeMessage, PeerMessage, WireMessage};
pub use node::{Candidate, CandidateSource, Node, NodeConfig};
pub use registry::{ConnectionHandle, ConnectionId, PeerEntry, Registries};
pub use session::{ReadPump, SecureReader, SecureSession, SecureWriter};
