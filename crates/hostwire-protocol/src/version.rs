/// Highest protocol version this host speaks.
pub const HIGHEST_SUPPORTED_VERSION: u32 = 7;

/// Version assumed for a connection until the handshake completes.
pub const INITIAL_PROTOCOL_VERSION: u32 = 1;

/// First version whose controllers understand debugger attach requests.
pub const MINIMUM_VERSION_WITH_DEBUG_SUPPORT: u32 = 3;

/// First version that sends `TestProcessAttachDebuggerPayload` instead of a bare pid.
pub const VERSION_WITH_ATTACH_DEBUGGER_PAYLOAD: u32 = 7;

/// Version 3 encodes payloads in a style the controllers of that era never
/// decoded correctly, so it is replaced by 2 unless explicitly allowed.
const INCOMPATIBLE_VERSION: u32 = 3;
const INCOMPATIBLE_VERSION_FALLBACK: u32 = 2;

/// Agree on the version used for the rest of a connection.
///
/// The result is the lower of the two maxima, except that a result of
/// exactly 3 becomes 2 unless `disable_downgrade` is set.
pub fn negotiate_version(sender_version: u32, handler_max_version: u32, disable_downgrade: bool) -> u32 {
    let negotiated = sender_version.min(handler_max_version);
    if negotiated == INCOMPATIBLE_VERSION && !disable_downgrade {
        INCOMPATIBLE_VERSION_FALLBACK
    } else {
        negotiated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_lower_version() {
        assert_eq!(negotiate_version(5, 7, false), 5);
        assert_eq!(negotiate_version(9, 7, false), 7);
        assert_eq!(negotiate_version(0, 7, false), 0);
        assert_eq!(negotiate_version(1, 1, false), 1);
    }

    #[test]
    fn version_three_is_downgraded_by_default() {
        assert_eq!(negotiate_version(3, 7, false), 2);
        assert_eq!(negotiate_version(7, 3, false), 2);
    }

    #[test]
    fn version_three_kept_when_downgrade_disabled() {
        assert_eq!(negotiate_version(3, 7, true), 3);
        assert_eq!(negotiate_version(7, 3, true), 3);
    }

    #[test]
    fn negotiation_holds_for_all_small_pairs() {
        for sender in 0..=10 {
            for max in 0..=10 {
                let lower = sender.min(max);
                let expected = if lower == 3 { 2 } else { lower };
                assert_eq!(negotiate_version(sender, max, false), expected);
                assert_eq!(negotiate_version(sender, max, true), lower);
            }
        }
    }
}
