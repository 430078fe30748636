//! Binary codecs for segment files.
//!
//! - [`term_info`]: the term dictionary (`fis` records, `fii` sorted index).
//! - [`posting`]: posting payload records (`cfq`, `cof`).

pub mod posting;
pub mod term_info;

pub use posting::{ListFlags, Posting, PostingCodec, PostingWriter, ReadFlags, WriteMode, WrittenList};
pub use term_info::{DictionaryReader, DictionaryWriter, TermInfo, TermKey};
