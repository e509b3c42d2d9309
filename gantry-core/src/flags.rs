//! Channel and interface flag words
//!
//! The many state bits carried by channels and stream interfaces are a
//! cohesive state machine, not ad-hoc booleans. They are modelled as bit-set
//! newtypes with typed accessors, and split into two documented groups:
//!
//! - **Persistent** bits record completed transitions (`SHUTR`, `SHUTW`) and
//!   are monotonic: once set they stay set for the lifetime of the stream.
//! - **One-shot** bits report activity since the last task step
//!   (`READ_PARTIAL`, `WRITE_PARTIAL`, ...) and must be sampled and cleared
//!   within a single step.

use std::fmt;

/// Flag word of a [`Channel`](crate::channel::Channel).
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct ChanFlags(u32);

impl ChanFlags {
    /// Read side of the channel has been shut (persistent).
    pub const SHUTR: Self = Self(1 << 0);
    /// Write side of the channel has been shut (persistent).
    pub const SHUTW: Self = Self(1 << 1);
    /// Upper layer requests a read shutdown at the next opportunity.
    pub const SHUTR_NOW: Self = Self(1 << 2);
    /// Upper layer requests a write shutdown once output drains.
    pub const SHUTW_NOW: Self = Self(1 << 3);

    /// Producer observed a read error on its endpoint.
    pub const READ_ERROR: Self = Self(1 << 4);
    /// Producer observed a clean EOF on its endpoint.
    pub const READ_NULL: Self = Self(1 << 5);
    /// Consumer observed a write error on its endpoint.
    pub const WRITE_ERROR: Self = Self(1 << 6);

    /// The read expiration tick passed with no incoming byte.
    pub const READ_TIMEOUT: Self = Self(1 << 7);
    /// The write expiration tick passed with pending output.
    pub const WRITE_TIMEOUT: Self = Self(1 << 8);

    /// An external agent owns the buffer; the stream interface must not
    /// touch it while this is set.
    pub const HIJACK: Self = Self(1 << 9);
    /// Analysis is complete; input may be promoted to output freely.
    pub const MAY_FORWARD: Self = Self(1 << 10);

    /// At least one byte entered the input region this step (one-shot).
    pub const READ_PARTIAL: Self = Self(1 << 11);
    /// The producer filled everything it had to send this step (one-shot).
    pub const READ_DONTWAIT: Self = Self(1 << 12);
    /// At least one byte left the output region this step (one-shot).
    pub const WRITE_PARTIAL: Self = Self(1 << 13);
    /// The consumer drained the whole output region this step (one-shot).
    pub const WRITE_DONTWAIT: Self = Self(1 << 14);

    /// The channel is moving large volumes; favour bigger reads.
    pub const STREAMER: Self = Self(1 << 15);
    /// The producer announced that more data follows immediately.
    pub const EXPECT_MORE: Self = Self(1 << 16);
    /// Never wait for additional data before sending what is buffered.
    pub const NEVER_WAIT: Self = Self(1 << 17);

    const TRANSIENT: u32 = Self::READ_PARTIAL.0
        | Self::READ_DONTWAIT.0
        | Self::WRITE_PARTIAL.0
        | Self::WRITE_DONTWAIT.0;

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// True if any bit of `other` is set.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        (self.0 & other.0) != 0
    }

    pub fn set(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn clear(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Clear exactly the one-shot activity bits.
    ///
    /// Called by the owning task at the top of each step, after the previous
    /// step's activity has been observed.
    pub fn clear_transient(&mut self) {
        self.0 &= !Self::TRANSIENT;
    }

    /// Either shutdown already completed or requested on the read side.
    #[must_use]
    pub const fn shutr_pending(self) -> bool {
        (self.0 & (Self::SHUTR.0 | Self::SHUTR_NOW.0)) != 0
    }

    /// Either shutdown already completed or requested on the write side.
    #[must_use]
    pub const fn shutw_pending(self) -> bool {
        (self.0 & (Self::SHUTW.0 | Self::SHUTW_NOW.0)) != 0
    }
}

impl std::ops::BitOr for ChanFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for ChanFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(u32, &str); 18] = [
            (1 << 0, "SHUTR"),
            (1 << 1, "SHUTW"),
            (1 << 2, "SHUTR_NOW"),
            (1 << 3, "SHUTW_NOW"),
            (1 << 4, "READ_ERROR"),
            (1 << 5, "READ_NULL"),
            (1 << 6, "WRITE_ERROR"),
            (1 << 7, "READ_TIMEOUT"),
            (1 << 8, "WRITE_TIMEOUT"),
            (1 << 9, "HIJACK"),
            (1 << 10, "MAY_FORWARD"),
            (1 << 11, "READ_PARTIAL"),
            (1 << 12, "READ_DONTWAIT"),
            (1 << 13, "WRITE_PARTIAL"),
            (1 << 14, "WRITE_DONTWAIT"),
            (1 << 15, "STREAMER"),
            (1 << 16, "EXPECT_MORE"),
            (1 << 17, "NEVER_WAIT"),
        ];

        let mut first = true;
        for (bit, name) in NAMES {
            if self.0 & bit != 0 {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("(none)")?;
        }
        Ok(())
    }
}

/// Flag word of a [`StreamInterface`](crate::interface::StreamInterface).
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct IfFlags(u32);

impl IfFlags {
    /// The producer side is starved: it could not pull any byte.
    pub const WAIT_DATA: Self = Self(1 << 0);
    /// The consumer side is saturated: it could not push all bytes.
    pub const WAIT_ROOM: Self = Self(1 << 1);
    /// The attached applet could not write for want of buffer room.
    pub const CANT_PUT: Self = Self(1 << 2);
    /// The attached applet could not read for want of input.
    pub const CANT_GET: Self = Self(1 << 3);
    /// The endpoint reported an unrecoverable error.
    pub const ERR: Self = Self(1 << 4);
    /// The endpoint reached end of stream.
    pub const EOS: Self = Self(1 << 5);
    /// Close without waiting for pending output to drain.
    pub const NOLINGER: Self = Self(1 << 6);

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        (self.0 & other.0) != 0
    }

    pub fn set(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn clear(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for IfFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for IfFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(u32, &str); 7] = [
            (1 << 0, "WAIT_DATA"),
            (1 << 1, "WAIT_ROOM"),
            (1 << 2, "CANT_PUT"),
            (1 << 3, "CANT_GET"),
            (1 << 4, "ERR"),
            (1 << 5, "EOS"),
            (1 << 6, "NOLINGER"),
        ];

        let mut first = true;
        for (bit, name) in NAMES {
            if self.0 & bit != 0 {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("(none)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_bits_clear_without_touching_shutdown() {
        let mut flags = ChanFlags::empty();
        flags.set(ChanFlags::SHUTR | ChanFlags::READ_PARTIAL | ChanFlags::WRITE_PARTIAL);

        flags.clear_transient();

        assert!(flags.contains(ChanFlags::SHUTR));
        assert!(!flags.intersects(ChanFlags::READ_PARTIAL | ChanFlags::WRITE_PARTIAL));
    }

    #[test]
    fn shut_pending_covers_request_and_completion() {
        let mut flags = ChanFlags::empty();
        assert!(!flags.shutr_pending());

        flags.set(ChanFlags::SHUTR_NOW);
        assert!(flags.shutr_pending());

        flags.clear(ChanFlags::SHUTR_NOW);
        flags.set(ChanFlags::SHUTR);
        assert!(flags.shutr_pending());
    }

    #[test]
    fn debug_lists_set_bits() {
        let mut flags = IfFlags::empty();
        flags.set(IfFlags::WAIT_DATA | IfFlags::ERR);
        assert_eq!(format!("{flags:?}"), "WAIT_DATA|ERR");
    }
}
