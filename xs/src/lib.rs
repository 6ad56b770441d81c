//! ExchangeStore - in-memory transcript of language model interactions
//!
//! Records every model request and its (possibly streamed) response in a
//! three-level containment tree:
//!
//! ```text
//! Session (one logical conversation)
//! └── Exchange (one top-level request/response round)
//!     └── ExchangeRequest (one model call, with its recorded response)
//! ```
//!
//! The store is append-only apart from explicit clears. It is owned and
//! mutated by exactly one dispatcher; consumers only read snapshots.
//!
//! Streamed responses are recorded through a shared [`PartBuffer`]: the
//! record is linked into the store before the first fragment arrives, and
//! the buffer fills in as the stream is consumed.

pub mod model;
mod store;

pub use model::{ClientSettings, RequestMessage, ResponsePart, Role, UserRequest};
pub use store::{
    Exchange, ExchangeMetadata, ExchangeRequest, ExchangeStore, PartBuffer, RecordedResponse, RequestMetadata, Session,
    new_part_buffer,
};
