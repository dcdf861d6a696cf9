/*!
The subset of CBOR used by the Bundle Protocol: unsigned integers, byte and
text strings, definite-length arrays, and indefinite-length arrays delimited
by an explicit break marker.

The [`encode`] module provides a push-style [`Encoder`](encode::Encoder); the
[`decode`] module provides a cursor-style [`Decoder`](decode::Decoder) over a
byte slice. Upper layers detect the end of an indefinite-length array by
catching the [`decode::Error::Break`] sentinel.
*/

pub mod decode;
pub mod encode;

#[cfg(test)]
mod decode_tests;

#[cfg(test)]
mod encode_tests;
