//! Pipeline stages for turning raw attachments into a stamped official PDF.
//!
//! Each submodule implements exactly one transformation step and is
//! synchronous except [`input`], which does network and file I/O.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ convert ──▶ merge ──▶ stamp + overlay ──▶ (storage)
//! (URL/path) (pdf/img/txt) (skip bad)  (PNG → page)
//! ```
//!
//! 1. [`input`]  : load attachments from disk or HTTP with a MIME type
//! 2. [`convert`]: classify by MIME and produce a PDF per attachment
//! 3. [`merge`]  : concatenate PDFs in order, skipping unparseable ones
//! 4. [`stamp`]  : rasterise the registration stamp (with QR code)
//! 5. [`overlay`]: place the stamp image on the first or every page
//!
//! [`pdf`] holds the lopdf helpers shared by stages 2–5.

pub mod convert;
pub mod input;
pub mod merge;
pub mod overlay;
pub mod pdf;
pub mod stamp;
