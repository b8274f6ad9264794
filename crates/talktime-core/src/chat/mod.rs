//! Conversation view
//!
//! Turns the entries of a replicated log into the ordered messages a
//! display layer renders.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  reconcile(entries, me, removable) ─▶ Vec<Message>           │
//! │  ├── dedup by entry hash (first occurrence wins)             │
//! │  ├── tombstones skipped                                      │
//! │  ├── missing/invalid `message` ─▶ MessageKind::Unsupported   │
//! │  └── is_mine = entry author == me                            │
//! │                                                              │
//! │  ConversationReconciler                                      │
//! │  └── LogEvent ─▶ collect ─▶ reconcile ─▶ SessionState        │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod derive;
mod message;
mod reconciler;
mod view;

pub use derive::{entry_to_message, reconcile};
pub use message::{Message, MessageKind, OutgoingMessage, PAYLOAD_VERSION, UNKNOWN_TIME, UNSUPPORTED_TEXT};
pub use reconciler::{ConversationReconciler, ReconcilerHandle};
pub use view::{ChatView, SessionState};
