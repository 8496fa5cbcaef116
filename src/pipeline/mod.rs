//! Conversion stages for one batch.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ classify ──▶ dispatch ──┬─▶ raster ─────┐
//!                                   ├─▶ office ─────┤
//!                                   ├─▶ markup ─────┤
//!                                   ├─▶ postscript ─┼─▶ page ──▶ assemble
//!                                   ├─▶ mail (msg) ─┤
//!                                   └─▶ archive ────┘
//!                                        (re-enters dispatch per entry)
//! ```
//!
//! 1. [`input`]: one uploaded file, in memory or as a temporary upload
//! 2. [`classify`]: pure mapping of media type, extension and tool to a strategy
//! 3. [`dispatch`]: runs a strategy under the item timeout in a [`scratch`] directory
//! 4. strategy adapters: each wraps one capability and returns [`page::Pages`];
//!    subprocess plumbing lives in [`external`], text drawing in [`text`]
//! 5. [`assemble`]: appends pages to the single output document

pub mod archive;
pub mod assemble;
pub mod classify;
pub mod dispatch;
pub mod external;
pub mod input;
pub mod mail;
pub mod markup;
pub mod msg;
pub mod office;
pub mod page;
pub mod postscript;
pub mod raster;
pub mod scratch;
pub mod text;
