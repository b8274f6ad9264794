//! Chat sessions
//!
//! ```text
//! SessionCoordinator
//! ├── configure(local, peer) ─▶ ChatSession   (one per pair)
//! │     ├── LogSession        writers = sorted {local, peer}
//! │     ├── ConversationReconciler task
//! │     └── StateContainer<SessionState> ─▶ display layer
//! ├── send(local, peer, text)
//! └── teardown / sign_out ─▶ reconciler stopped, subscribers cleared,
//!                             log closed
//! ```

mod chat;
mod coordinator;

pub use chat::ChatSession;
pub use coordinator::SessionCoordinator;
