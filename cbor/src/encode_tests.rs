use super::encode::*;
use hex_literal::hex;

#[test]
fn test_uint() {
    // Examples from RFC 8949, Appendix A
    assert_eq!(emit(&0u64), hex!("00"));
    assert_eq!(emit(&1u64), hex!("01"));
    assert_eq!(emit(&10u64), hex!("0a"));
    assert_eq!(emit(&23u64), hex!("17"));
    assert_eq!(emit(&24u64), hex!("1818"));
    assert_eq!(emit(&25u64), hex!("1819"));
    assert_eq!(emit(&100u64), hex!("1864"));
    assert_eq!(emit(&1000u64), hex!("1903e8"));
    assert_eq!(emit(&1000000u64), hex!("1a000f4240"));
    assert_eq!(emit(&1000000000000u64), hex!("1b000000e8d4a51000"));
    assert_eq!(emit(&18446744073709551615u64), hex!("1bffffffffffffffff"));
}

#[test]
fn test_bytes() {
    assert_eq!(emit::<[u8]>(&[]), hex!("40"));
    assert_eq!(emit::<[u8]>(&[1, 2, 3, 4]), hex!("4401020304"));
}

#[test]
fn test_text() {
    assert_eq!(emit(""), hex!("60"));
    assert_eq!(emit("a"), hex!("6161"));
    assert_eq!(emit("IETF"), hex!("6449455446"));
    assert_eq!(emit("\u{00fc}"), hex!("62c3bc"));
}

#[test]
fn test_array_headers() {
    let mut e = Encoder::new();
    e.emit_array_header(0);
    assert_eq!(e.into_vec(), hex!("80"));

    let mut e = Encoder::new();
    e.emit_array_header(25);
    e.emit_uint(1);
    assert_eq!(e.into_vec(), hex!("981901"));
}

#[test]
fn test_indefinite_array() {
    let mut e = Encoder::new();
    e.emit_indefinite_array_header();
    e.emit_uint(1);
    e.emit_array_header(2);
    e.emit_uint(2);
    e.emit_uint(3);
    e.emit_break();
    assert_eq!(e.into_vec(), hex!("9f018202 03ff"));
}

#[test]
fn test_raw_append() {
    let inner = emit(&42u64);
    let mut e = Encoder::new();
    e.emit_array_header(1);
    e.emit_raw(&inner);
    assert_eq!(e.into_vec(), hex!("81182a"));
}
