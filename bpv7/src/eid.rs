use super::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EidError {
    #[error("Unsupported EID scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("Unsupported EID scheme code {0}")]
    UnsupportedSchemeCode(u64),

    #[error("Invalid ipn scheme-specific part {0:?}")]
    InvalidIpnSsp(String),

    #[error("ipn node and service numbers must be at least 1")]
    IpnZeroComponent,

    #[error("Missing scheme separator in EID {0:?}")]
    MissingSchemeSeparator(String),

    #[error("Invalid dtn scheme-specific part {0}")]
    InvalidDtnSsp(u64),

    #[error(transparent)]
    InvalidCbor(#[from] cbor::decode::Error),
}

const SCHEME_DTN: u64 = 1;
const SCHEME_IPN: u64 = 2;

/// An endpoint identifier: a `(scheme, scheme-specific-part)` pair.
///
/// Only the `dtn` and `ipn` schemes exist; anything else is rejected at
/// construction. The `dtn` SSP is either the sentinel integer 0 (the null
/// endpoint `dtn:none`) or a printable string, the `ipn` SSP a pair of
/// node/service numbers in `[1, 2^64 - 1]`.
#[derive(Default, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EndpointId {
    #[default]
    Null,
    Dtn(Box<str>),
    Ipn {
        node: u64,
        service: u64,
    },
}

impl EndpointId {
    pub fn new(scheme: &str, ssp: &str) -> Result<Self, EidError> {
        match scheme {
            "dtn" => {
                if ssp == "none" {
                    Ok(Self::Null)
                } else {
                    Ok(Self::Dtn(ssp.into()))
                }
            }
            "ipn" => parse_ipn_ssp(ssp),
            _ => Err(EidError::UnsupportedScheme(scheme.to_string())),
        }
    }

    /// The null endpoint, `dtn:none`.
    pub fn none() -> Self {
        Self::Null
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::Null)
    }
}

fn parse_ipn_ssp(ssp: &str) -> Result<EndpointId, EidError> {
    let Some((node, service)) = ssp.split_once('.') else {
        return Err(EidError::InvalidIpnSsp(ssp.to_string()));
    };
    let (Some(node), Some(service)) = (parse_ipn_number(node), parse_ipn_number(service)) else {
        return Err(EidError::InvalidIpnSsp(ssp.to_string()));
    };
    if node == 0 || service == 0 {
        return Err(EidError::IpnZeroComponent);
    }
    Ok(EndpointId::Ipn { node, service })
}

// Strict decimal: no signs, no hex, no whitespace, and overflow is an error.
fn parse_ipn_number(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("dtn:none"),
            Self::Dtn(ssp) => write!(f, "dtn:{ssp}"),
            Self::Ipn { node, service } => write!(f, "ipn:{node}.{service}"),
        }
    }
}

impl std::str::FromStr for EndpointId {
    type Err = EidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((scheme, ssp)) = s.split_once(':') else {
            return Err(EidError::MissingSchemeSeparator(s.to_string()));
        };
        Self::new(scheme, ssp)
    }
}

impl cbor::encode::ToCbor for EndpointId {
    fn to_cbor(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit_array_header(2);
        match self {
            Self::Null => {
                encoder.emit_uint(SCHEME_DTN);
                encoder.emit_uint(0);
            }
            Self::Dtn(ssp) => {
                encoder.emit_uint(SCHEME_DTN);
                encoder.emit_text(ssp);
            }
            Self::Ipn { node, service } => {
                encoder.emit_uint(SCHEME_IPN);
                encoder.emit_array_header(2);
                encoder.emit_uint(*node);
                encoder.emit_uint(*service);
            }
        }
    }
}

impl cbor::decode::FromCbor for EndpointId {
    type Error = EidError;

    fn from_cbor(decoder: &mut cbor::decode::Decoder) -> Result<Self, Self::Error> {
        decoder.expect_array_header(2)?;
        match decoder.read_uint()? {
            SCHEME_DTN => {
                // The SSP is either the integer 0 or a text string
                if decoder.peek().map(|b| b >> 5) == Some(0) {
                    match decoder.read_uint()? {
                        0 => Ok(Self::Null),
                        v => Err(EidError::InvalidDtnSsp(v)),
                    }
                } else {
                    Ok(Self::Dtn(decoder.read_text()?.into()))
                }
            }
            SCHEME_IPN => {
                decoder.expect_array_header(2)?;
                let node = decoder.read_uint()?;
                let service = decoder.read_uint()?;
                if node == 0 || service == 0 {
                    Err(EidError::IpnZeroComponent)
                } else {
                    Ok(Self::Ipn { node, service })
                }
            }
            code => Err(EidError::UnsupportedSchemeCode(code)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtn_none() {
        let eid = EndpointId::new("dtn", "none").unwrap();
        assert!(matches!(eid, EndpointId::Null));
        assert_eq!(eid.to_string(), "dtn:none");
        assert!(eid.is_none());
    }

    #[test]
    fn test_dtn() {
        let eid = EndpointId::new("dtn", "foobar").unwrap();
        let EndpointId::Dtn(ssp) = &eid else {
            panic!("not a dtn EID");
        };
        assert_eq!(ssp.as_ref(), "foobar");
        assert_eq!(eid.to_string(), "dtn:foobar");
    }

    #[test]
    fn test_ipn() {
        let eid = EndpointId::new("ipn", "23.42").unwrap();
        assert_eq!(
            eid,
            EndpointId::Ipn {
                node: 23,
                service: 42
            }
        );
        assert_eq!(eid.to_string(), "ipn:23.42");
    }

    #[test]
    fn test_ipn_invalid() {
        let cases = [
            // Malformed
            "23.", "23", ".23", "-10.5", "10.-3", "", "foo.bar", "0x23.0x42", "+1.2", "1.+2",
            // Too small
            "0.23", "23.0",
            // Too big
            "23.18446744073709551616",
            "18446744073709551616.23",
            "23.99999999999999999999",
            "99999999999999999999.23",
        ];
        for ssp in cases {
            assert!(
                EndpointId::new("ipn", ssp).is_err(),
                "ipn:{ssp} did not result in an error"
            );
        }
    }

    #[test]
    fn test_unsupported_scheme() {
        assert!(matches!(
            EndpointId::new("foo", "bar"),
            Err(EidError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_string_round_trip() {
        for s in ["dtn:none", "dtn:foobar", "dtn://node/app", "ipn:23.42"] {
            let eid: EndpointId = s.parse().unwrap();
            assert_eq!(eid.to_string(), s);
        }
        assert!("foobar".parse::<EndpointId>().is_err());
    }

    #[test]
    fn test_cbor_round_trip() {
        for eid in [
            EndpointId::Null,
            EndpointId::Dtn("//node/app".into()),
            EndpointId::Ipn {
                node: 23,
                service: 42,
            },
        ] {
            let data = cbor::encode::emit(&eid);
            assert_eq!(cbor::decode::parse::<EndpointId>(&data).unwrap(), eid);
        }
    }
}
