//! Scripted failures for order placement.

use std::time::Duration;

/// How the next `place_order` call misbehaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceFault {
    /// Connection refused before any bytes were sent.
    PreSend,
    /// The venue throttled the request before accepting it.
    RateLimited,
    /// The request was lost on the way; the venue never saw it.
    LostInTransit,
    /// The venue accepted the order but the response was lost.
    ResponseLost,
    /// The venue accepted the order and answers after `Duration`.
    SlowResponse(Duration),
    /// The venue rejects the order.
    Reject(String),
}

impl PlaceFault {
    /// Returns true if the venue records the order despite the fault.
    #[must_use]
    pub const fn order_reaches_exchange(&self) -> bool {
        matches!(self, Self::ResponseLost | Self::SlowResponse(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(PlaceFault::PreSend, false)]
    #[test_case(PlaceFault::RateLimited, false)]
    #[test_case(PlaceFault::LostInTransit, false)]
    #[test_case(PlaceFault::ResponseLost, true)]
    #[test_case(PlaceFault::SlowResponse(Duration::from_secs(1)), true)]
    #[test_case(PlaceFault::Reject("no".into()), false)]
    fn reaches_exchange(fault: PlaceFault, expected: bool) {
        assert_eq!(fault.order_reaches_exchange(), expected);
    }
}
