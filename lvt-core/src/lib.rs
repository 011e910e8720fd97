//! Tree-diff engine and per-session runtime for a real-time
//! server-rendered UI framework.
//!
//! A template is parsed and composed once (`lvt_template`), then walked
//! against a data binding on every render (`walker`) into a [`tree::Node`].
//! Successive renders of the same session are compared (`diff`) into a
//! minimal [`patch::Patch`], serialized by `codec`, and pushed to the
//! client over the transport a host wires up with `transport`.

pub mod codec;
pub mod diff;
pub mod error;
pub mod hub;
pub mod key;
pub mod patch;
pub mod session;
pub mod store;
pub mod transport;
pub mod tree;
pub mod walker;

pub use error::{SessionError, WalkError};
pub use hub::{BroadcastHub, Registration};
pub use key::{Key, KeyGenerator};
pub use patch::{ListOp, Patch, PatchValue};
pub use session::{OverflowPolicy, PageSession, ResponseMetadata, SessionConfig, SessionState};
pub use store::{Authenticator, SessionStore, Store};
pub use tree::{render_html, Comprehension, Dynamic, Interleaved, Item, Node};
