//! MVCC key model, key codec and value integrity.
//!
//! - [`key`]: [`MvccKey`], [`Timestamp`] and the encode/decode/split codec.
//! - [`value`]: checksummed value header and [`verify`](value::verify).

pub mod key;
pub mod value;


pub use key::{
    KeyError, MvccKey, MvccKeyRef, Timestamp, decode_key, encode_key, encode_key_to, split_key,
};
pub use value::{Value, ValueError};
