//! Pure text-extraction helpers for chat retrieval. Narrow contract:
//! given a source file and a 1-based range, return the text in that
//! range, clamped to the
//! document's actual bounds, never raising for an out-of-range or
//! malformed input — callers treat an empty string as "no content for
//! this node" and move on.

pub mod markdown;
pub mod pdf;
