//! Chat adapter (C6): Telegram-flavored mention dispatch, approvals, progress rendering, and
//! a pinned per-chat status panel, sitting on top of the hub's domain state (§4.5).

mod adapter;
mod approval;
mod debounce;
mod format;
mod mention;
mod progress;
mod status_panel;

pub use adapter::ChatAdapter;
