use super::decode::*;
use hex_literal::hex;

#[test]
fn test_uint() {
    assert_eq!(parse::<u64>(&hex!("00")).unwrap(), 0);
    assert_eq!(parse::<u64>(&hex!("17")).unwrap(), 23);
    assert_eq!(parse::<u64>(&hex!("1818")).unwrap(), 24);
    assert_eq!(parse::<u64>(&hex!("1903e8")).unwrap(), 1000);
    assert_eq!(parse::<u64>(&hex!("1a000f4240")).unwrap(), 1000000);
    assert_eq!(
        parse::<u64>(&hex!("1bffffffffffffffff")).unwrap(),
        u64::MAX
    );
}

#[test]
fn test_bytes_and_text() {
    assert_eq!(parse::<Vec<u8>>(&hex!("4401020304")).unwrap(), vec![1, 2, 3, 4]);
    assert_eq!(parse::<String>(&hex!("6449455446")).unwrap(), "IETF");
    assert!(matches!(
        parse::<String>(&hex!("62ff00")),
        Err(Error::InvalidUtf8(_))
    ));
}

#[test]
fn test_wrong_major_type() {
    assert!(matches!(
        parse::<u64>(&hex!("40")),
        Err(Error::IncorrectType { actual: 2, .. })
    ));
    assert!(matches!(
        parse::<Vec<u8>>(&hex!("00")),
        Err(Error::IncorrectType { actual: 0, .. })
    ));
}

#[test]
fn test_truncated() {
    assert!(matches!(parse::<u64>(&[]), Err(Error::UnexpectedEof)));
    assert!(matches!(parse::<u64>(&hex!("18")), Err(Error::UnexpectedEof)));
    assert!(matches!(
        parse::<Vec<u8>>(&hex!("4401")),
        Err(Error::UnexpectedEof)
    ));
}

#[test]
fn test_array_headers() {
    let mut d = Decoder::new(&hex!("820102"));
    assert_eq!(d.read_array_header().unwrap(), 2);
    assert_eq!(d.read_uint().unwrap(), 1);
    assert_eq!(d.read_uint().unwrap(), 2);
    assert!(d.is_empty());

    let mut d = Decoder::new(&hex!("820102"));
    assert!(matches!(
        d.expect_array_header(3),
        Err(Error::WrongArrayLength {
            expected: 3,
            actual: 2
        })
    ));
}

#[test]
fn test_break_sentinel() {
    // Indefinite array of two uints
    let mut d = Decoder::new(&hex!("9f0102ff"));
    d.expect_indefinite_array_header().unwrap();

    let mut items = Vec::new();
    loop {
        match d.read_uint() {
            Ok(v) => items.push(v),
            Err(Error::Break) => break,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(items, vec![1, 2]);
    assert!(d.is_empty());
}

#[test]
fn test_peek() {
    let d = Decoder::new(&hex!("85"));
    assert_eq!(d.peek(), Some(0x85));

    let d = Decoder::new(&[]);
    assert_eq!(d.peek(), None);
}

#[test]
fn test_indefinite_rejected_where_definite_expected() {
    assert!(matches!(
        parse::<Vec<u8>>(&hex!("5f41004101ff")),
        Err(Error::IndefiniteLength)
    ));
}
