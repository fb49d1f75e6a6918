//! Heart-beat header parsing and negotiation.
//!
//! Each side advertises `cx,cy` in milliseconds: `cx` is the smallest
//! interval it can send at, `cy` the interval it wants to receive at. `0`
//! means "cannot" / "do not want". The effective interval in each direction
//! is the larger of the two relevant values, or disabled if either is `0`.

use std::fmt;
use std::time::Duration;
use tillbridge_core::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartBeat {
    pub outgoing_ms: u64,
    pub incoming_ms: u64,
}

impl HeartBeat {
    pub const DISABLED: HeartBeat = HeartBeat {
        outgoing_ms: 0,
        incoming_ms: 0,
    };

    pub fn new(outgoing_ms: u64, incoming_ms: u64) -> Self {
        Self {
            outgoing_ms,
            incoming_ms,
        }
    }

    /// Parse a `heart-beat` header value.
    ///
    /// ```
    /// use tillbridge_protocol::HeartBeat;
    ///
    /// let hb = HeartBeat::parse("10000, 5000").unwrap();
    /// assert_eq!(hb, HeartBeat::new(10_000, 5_000));
    /// assert!(HeartBeat::parse("fast").is_err());
    /// ```
    pub fn parse(value: &str) -> Result<Self> {
        let (cx, cy) = value
            .split_once(',')
            .ok_or_else(|| Error::InvalidHeartBeat(value.to_string()))?;
        let parse = |s: &str| {
            s.trim()
                .parse::<u64>()
                .map_err(|_| Error::InvalidHeartBeat(value.to_string()))
        };
        Ok(Self::new(parse(cx)?, parse(cy)?))
    }

    /// Combine our advertisement with the server's.
    pub fn negotiate(self, server: HeartBeat) -> Negotiated {
        Negotiated {
            send_every: effective(self.outgoing_ms, server.incoming_ms),
            expect_every: effective(self.incoming_ms, server.outgoing_ms),
        }
    }
}

fn effective(ours: u64, theirs: u64) -> Option<Duration> {
    if ours == 0 || theirs == 0 {
        None
    } else {
        Some(Duration::from_millis(ours.max(theirs)))
    }
}

impl fmt::Display for HeartBeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.outgoing_ms, self.incoming_ms)
    }
}

/// Heart-beat intervals agreed for one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Negotiated {
    /// How often we must write something.
    pub send_every: Option<Duration>,
    /// How often the server promised to write something.
    pub expect_every: Option<Duration>,
}

impl Negotiated {
    /// Silence longer than this on the read side means the link is dead.
    pub fn read_deadline(&self, grace_factor: u32) -> Option<Duration> {
        self.expect_every.map(|d| d * grace_factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("0,0", HeartBeat::DISABLED)]
    #[case("10000,10000", HeartBeat::new(10_000, 10_000))]
    #[case(" 500 , 0 ", HeartBeat::new(500, 0))]
    fn test_parse(#[case] value: &str, #[case] expected: HeartBeat) {
        assert_eq!(HeartBeat::parse(value).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("10")]
    #[case("a,b")]
    #[case("-1,0")]
    fn test_parse_invalid(#[case] value: &str) {
        assert!(matches!(
            HeartBeat::parse(value),
            Err(Error::InvalidHeartBeat(_))
        ));
    }

    #[test]
    fn test_display_round_trip() {
        let hb = HeartBeat::new(10_000, 5_000);
        assert_eq!(hb.to_string(), "10000,5000");
        assert_eq!(HeartBeat::parse(&hb.to_string()).unwrap(), hb);
    }

    #[test]
    fn test_negotiate_takes_larger_interval() {
        let ours = HeartBeat::new(10_000, 10_000);
        let theirs = HeartBeat::new(15_000, 5_000);
        let agreed = ours.negotiate(theirs);

        assert_eq!(agreed.send_every, Some(Duration::from_millis(10_000)));
        assert_eq!(agreed.expect_every, Some(Duration::from_millis(15_000)));
        assert_eq!(agreed.read_deadline(2), Some(Duration::from_millis(30_000)));
    }

    #[rstest]
    #[case(HeartBeat::new(10_000, 10_000), HeartBeat::DISABLED)]
    #[case(HeartBeat::DISABLED, HeartBeat::new(10_000, 10_000))]
    fn test_negotiate_disabled(#[case] ours: HeartBeat, #[case] theirs: HeartBeat) {
        let agreed = ours.negotiate(theirs);
        assert_eq!(agreed, Negotiated::default());
        assert_eq!(agreed.read_deadline(2), None);
    }
}
