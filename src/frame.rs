// https://redis.io/docs/reference/protocol-spec
//
// Replies are built as frames and serialized once when they are queued on a
// client. Request parsing lives in `client`, which consumes raw argument
// vectors rather than frames.

use std::fmt;

use bytes::Bytes;

pub static CRLF: &[u8; 2] = b"\r\n";

#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<Frame>),
}

impl Frame {
    /// An error reply. The wire prefix is `-ERR:`, so `msg` carries only the
    /// human-readable part.
    pub fn err(msg: impl Into<String>) -> Frame {
        Frame::Error(format!("ERR:{}", msg.into()))
    }

    /// A double rendered as a bulk string, the reply shape used for scores.
    pub fn bulk_double(value: f64) -> Frame {
        Frame::Bulk(Bytes::from(format_double(value)))
    }

    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Frame::Simple(s) => {
                let mut bytes = Vec::with_capacity(1 + s.len() + CRLF.len());
                bytes.push(b'+');
                bytes.extend_from_slice(s.as_bytes());
                bytes.extend_from_slice(CRLF);
                bytes
            }
            Frame::Error(s) => {
                let mut bytes = Vec::with_capacity(1 + s.len() + CRLF.len());
                bytes.push(b'-');
                bytes.extend_from_slice(s.as_bytes());
                bytes.extend_from_slice(CRLF);
                bytes
            }
            Frame::Integer(i) => {
                let digits = i.to_string();
                let mut bytes = Vec::with_capacity(1 + digits.len() + CRLF.len());
                bytes.push(b':');
                bytes.extend_from_slice(digits.as_bytes());
                bytes.extend_from_slice(CRLF);
                bytes
            }
            Frame::Bulk(data) => {
                let length = data.len().to_string();
                let mut bytes =
                    Vec::with_capacity(1 + length.len() + 2 * CRLF.len() + data.len());
                bytes.push(b'$');
                bytes.extend_from_slice(length.as_bytes());
                bytes.extend_from_slice(CRLF);
                bytes.extend_from_slice(data);
                bytes.extend_from_slice(CRLF);
                bytes
            }
            // RESP2 null bulk string.
            Frame::Null => b"$-1\r\n".to_vec(),
            Frame::Array(items) => {
                let length = items.len().to_string();
                let mut bytes = Vec::with_capacity(1 + length.len() + CRLF.len());
                bytes.push(b'*');
                bytes.extend_from_slice(length.as_bytes());
                bytes.extend_from_slice(CRLF);
                for item in items {
                    bytes.extend(item.serialize());
                }
                bytes
            }
        }
    }
}

impl From<Frame> for Vec<u8> {
    fn from(frame: Frame) -> Self {
        frame.serialize()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "+{}", s),
            Frame::Error(s) => write!(f, "-{}", s),
            Frame::Integer(i) => write!(f, ":{}", i),
            Frame::Bulk(bytes) => write!(f, "${}", String::from_utf8_lossy(bytes)),
            Frame::Null => write!(f, "$-1"),
            Frame::Array(items) => {
                write!(f, "*{}", items.len())?;
                for item in items {
                    write!(f, " {}", item)?;
                }
                Ok(())
            }
        }
    }
}

/// Render a double with up to 17 significant digits, dropping the fractional
/// part entirely for integral values so that a score of `3.0` reads `"3"`.
/// Fixed-point within the usual magnitude window, scientific outside it,
/// trailing zeros removed.
pub fn format_double(value: f64) -> String {
    if value.is_infinite() {
        return if value > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    if value == value.trunc() && value.abs() < 1e17 {
        return format!("{}", value as i64);
    }
    let exponent = value.abs().log10().floor() as i32;
    if (-4..17).contains(&exponent) {
        // 17 significant digits total, so 16 - exponent after the point.
        let frac_digits = (16 - exponent).max(0) as usize;
        trim_zeros(format!("{:.*}", frac_digits, value))
    } else {
        let mantissa = trim_zeros(format!("{:.16}", value / 10f64.powi(exponent)));
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exponent.abs())
    }
}

fn trim_zeros(mut s: String) -> String {
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_simple_string() {
        assert_eq!(Frame::Simple("OK".to_string()).serialize(), b"+OK\r\n");
    }

    #[test]
    fn serialize_error() {
        assert_eq!(
            Frame::err("unknow command").serialize(),
            b"-ERR:unknow command\r\n"
        );
    }

    #[test]
    fn serialize_integer() {
        assert_eq!(Frame::Integer(1000).serialize(), b":1000\r\n");
        assert_eq!(Frame::Integer(-1).serialize(), b":-1\r\n");
    }

    #[test]
    fn serialize_bulk_string() {
        assert_eq!(
            Frame::Bulk(Bytes::from("foobar")).serialize(),
            b"$6\r\nfoobar\r\n"
        );
        assert_eq!(Frame::Bulk(Bytes::new()).serialize(), b"$0\r\n\r\n");
    }

    #[test]
    fn serialize_null_is_resp2() {
        assert_eq!(Frame::Null.serialize(), b"$-1\r\n");
    }

    #[test]
    fn serialize_array() {
        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from("hello")),
            Frame::Bulk(Bytes::from("world")),
        ]);
        assert_eq!(frame.serialize(), b"*2\r\n$5\r\nhello\r\n$5\r\nworld\r\n");
        assert_eq!(Frame::Array(vec![]).serialize(), b"*0\r\n");
    }

    #[test]
    fn doubles_render_like_scores() {
        assert_eq!(format_double(3.0), "3");
        assert_eq!(format_double(11.0), "11");
        assert_eq!(format_double(-2.0), "-2");
        assert_eq!(format_double(1.5), "1.5");
        assert_eq!(format_double(0.1), "0.10000000000000001");
    }

    #[test]
    fn doubles_cap_significant_digits() {
        // 17 significant digits, not 17 fractional digits.
        assert_eq!(format_double(100.1), "100.09999999999999");
        assert_eq!(format_double(-100.1), "-100.09999999999999");
        assert_eq!(format_double(123456789012345.6789), "123456789012345.67");
    }

    #[test]
    fn doubles_fall_back_to_scientific_notation() {
        assert_eq!(format_double(1e20), "1e+20");
        assert_eq!(format_double(0.00001), "1e-05");
    }
}
