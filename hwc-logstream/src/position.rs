//! Position codec.
//!
//! LTS identifies an entry's place in a stream by its `line_num`, which is a
//! decimal nanosecond timestamp sent as text. The same encoding is used for
//! the checkpoint persisted in stream tags.

use chrono::{DateTime, Utc};

use crate::{Error, Result};

/// Decode a line-sequence token into an instant.
///
/// Fails with [`Error::MalformedPosition`] unless the token is a base-10 integer.
pub fn decode(token: &str) -> Result<DateTime<Utc>> {
    let nanos: i64 = token
        .parse()
        .map_err(|_| Error::malformed_position(token))?;
    Ok(DateTime::from_timestamp_nanos(nanos))
}

/// Encode an instant as a line-sequence token.
///
/// Instants outside the `i64` nanosecond range clamp to the nearest representable value.
pub fn encode(t: DateTime<Utc>) -> String {
    nanos(t).to_string()
}

/// Nanoseconds since the Unix epoch, clamped to the `i64` range.
#[inline]
pub fn nanos(t: DateTime<Utc>) -> i64 {
    t.timestamp_nanos_opt().unwrap_or(if t.timestamp() < 0 {
        i64::MIN
    } else {
        i64::MAX
    })
}

/// Milliseconds since the Unix epoch, as used by the query window bounds.
#[inline]
pub fn millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decode_known_value() {
        let t = decode("1700000000123456789").unwrap();
        assert_eq!(t.timestamp(), 1_700_000_000);
        assert_eq!(t.timestamp_subsec_nanos(), 123_456_789);
    }

    #[test]
    fn test_decode_rejects_non_integers() {
        for token in ["", "abc", "12.5", " 12", "1e9", "99999999999999999999"] {
            match decode(token) {
                Err(Error::MalformedPosition { token: t }) => assert_eq!(t, token),
                other => panic!("expected MalformedPosition for {token:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_encode_is_plain_decimal() {
        let t = DateTime::from_timestamp_nanos(1_234_567_890);
        assert_eq!(encode(t), "1234567890");
    }

    #[test]
    fn test_encode_clamps_out_of_range() {
        let far_future = DateTime::<Utc>::MAX_UTC;
        assert_eq!(encode(far_future), i64::MAX.to_string());
        let far_past = DateTime::<Utc>::MIN_UTC;
        assert_eq!(encode(far_past), i64::MIN.to_string());
    }

    #[test]
    fn test_millis_truncates() {
        let t = DateTime::from_timestamp_nanos(1_500_999_999);
        assert_eq!(millis(t), 1_500);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        /// Any instant representable as i64 nanoseconds survives encode/decode.
        #[test]
        fn prop_round_trip(n in any::<i64>()) {
            let t = DateTime::from_timestamp_nanos(n);
            prop_assert_eq!(decode(&encode(t)).unwrap(), t);
        }
    }
}
