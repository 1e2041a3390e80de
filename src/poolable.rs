//! [`Poolable`] wraps a pooled resource with permit accounting, and
//! [`PoolableChannel`] specializes it to an HTTP/2 [`crate::connection::Channel`]
//! with watermarks derived from the peer's advertised
//! `MAX_CONCURRENT_STREAMS`.

use std::time::Instant;

use crate::connection::Channel;

/// A pooled resource `R` plus the permit bookkeeping [`crate::pool::Pool`]
/// needs to decide whether it can accept more work.
///
/// `allocated_permits` is only ever mutated from the pool's worker task
/// (spec.md §5's "pool thread"); nothing in this type enforces that on its
/// own; it is a property of how [`crate::pool::Pool`] is built, not of this
/// struct.
#[derive(Debug)]
pub struct Poolable<R> {
    value: R,
    allocated_permits: u32,
    maximum_permits: u32,
}

impl<R> Poolable<R> {
    /// Wraps `value`, starting with zero allocated permits.
    pub fn new(value: R, maximum_permits: u32) -> Self {
        debug_assert!(maximum_permits > 0, "a poolable must allow at least one permit");
        Self {
            value,
            allocated_permits: 0,
            maximum_permits,
        }
    }

    /// Borrows the wrapped resource.
    pub fn value(&self) -> &R {
        &self.value
    }

    /// Mutably borrows the wrapped resource.
    pub fn value_mut(&mut self) -> &mut R {
        &mut self.value
    }

    /// Number of permits currently allocated.
    pub fn allocated_permits(&self) -> u32 {
        self.allocated_permits
    }

    /// The immutable permit ceiling.
    pub fn maximum_permits(&self) -> u32 {
        self.maximum_permits
    }

    /// Grants one permit. Caller must have already confirmed capacity via
    /// [`Poolable::is_can_acquire`].
    pub fn acquire(&mut self) {
        debug_assert!(self.allocated_permits < self.maximum_permits);
        self.allocated_permits += 1;
    }

    /// Releases one permit. A no-op below zero is a caller bug; debug
    /// builds catch it.
    pub fn release(&mut self) {
        debug_assert!(self.allocated_permits > 0, "released more permits than were allocated");
        self.allocated_permits = self.allocated_permits.saturating_sub(1);
    }

    /// `true` if allocated permits are below the low watermark — this
    /// poolable should be preferred for new work.
    pub fn is_should_acquire(&self, low_watermark: u32) -> bool {
        self.allocated_permits < low_watermark
    }

    /// `true` if allocated permits are below the high watermark — this
    /// poolable can still accept work, though it is not preferred.
    pub fn is_can_acquire(&self) -> bool {
        self.allocated_permits < self.maximum_permits
    }
}

/// Low/high watermark pair derived from a peer's advertised
/// `MAX_CONCURRENT_STREAMS`, or a client-configured override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermark {
    /// Below this, a poolable is preferred over others.
    pub low: u32,
    /// At or above this, a poolable is saturated.
    pub high: u32,
}

impl Watermark {
    /// `low_factor = 1/3`, `high_factor = 1`, per spec.md §3/§4.6.
    const LOW_FACTOR: f64 = 1.0 / 3.0;
    const HIGH_FACTOR: f64 = 1.0;

    /// Derives a watermark from the peer's advertised
    /// `MAX_CONCURRENT_STREAMS` (if known) and the client's configured
    /// default, per:
    ///
    /// ```text
    /// low  = max(low_factor  * peer OR 1, low_factor  * default)
    /// high = max(high_factor * peer OR 1,                default)
    /// ```
    pub fn derive(peer_max_concurrent_streams: Option<u32>, default_max_concurrent_streams: u32) -> Self {
        let peer = peer_max_concurrent_streams.unwrap_or(1).max(1);
        let low = ((Self::LOW_FACTOR * peer as f64).max(Self::LOW_FACTOR * default_max_concurrent_streams as f64))
            .round() as u32;
        let high = ((Self::HIGH_FACTOR * peer as f64).max(default_max_concurrent_streams as f64)).round() as u32;
        Watermark {
            low: low.max(1),
            high: high.max(low.max(1)),
        }
    }
}

/// A pooled HTTP/2 channel: [`Poolable<Channel>`] plus the watermarks and
/// creation time spec.md §4.6 specifies.
#[derive(Debug)]
pub struct PoolableChannel {
    inner: Poolable<Channel>,
    watermark: Watermark,
    created_at: Instant,
}

impl PoolableChannel {
    /// Wraps `channel`, computing watermarks from its advertised
    /// `MAX_CONCURRENT_STREAMS` (or `default_max_concurrent_streams` if the
    /// peer never advertised one) unless `override_watermark` is given.
    pub fn new(
        channel: Channel,
        default_max_concurrent_streams: u32,
        override_watermark: Option<Watermark>,
    ) -> Self {
        let watermark = override_watermark.unwrap_or_else(|| {
            Watermark::derive(channel.peer_max_concurrent_streams(), default_max_concurrent_streams)
        });
        Self {
            inner: Poolable::new(channel, watermark.high),
            watermark,
            created_at: Instant::now(),
        }
    }

    /// Borrows the underlying channel.
    pub fn channel(&self) -> &Channel {
        self.inner.value()
    }

    /// Mutably borrows the underlying channel.
    pub fn channel_mut(&mut self) -> &mut Channel {
        self.inner.value_mut()
    }

    /// The watermark pair this channel was admitted with.
    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    /// When this channel was created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Number of permits (in-flight requests) currently allocated.
    pub fn allocated_permits(&self) -> u32 {
        self.inner.allocated_permits()
    }

    /// `true` iff the underlying channel is active and not closing.
    pub fn is_alive(&self) -> bool {
        self.inner.value().is_active() && !self.inner.value().is_closing()
    }

    /// `true` if below the low watermark.
    pub fn is_should_acquire(&self) -> bool {
        self.inner.is_should_acquire(self.watermark.low)
    }

    /// `true` if below the high watermark.
    pub fn is_can_acquire(&self) -> bool {
        self.inner.is_can_acquire()
    }

    /// Grants one permit.
    pub fn acquire(&mut self) {
        self.inner.acquire();
    }

    /// Releases one permit.
    pub fn release(&mut self) {
        self.inner.release();
    }
}

impl crate::pool::Permitted for PoolableChannel {
    type Handle = Channel;

    fn is_alive(&self) -> bool {
        self.is_alive()
    }

    fn is_should_acquire(&self) -> bool {
        self.is_should_acquire()
    }

    fn is_can_acquire(&self) -> bool {
        self.is_can_acquire()
    }

    fn maximum_permits(&self) -> u32 {
        self.inner.maximum_permits()
    }

    fn acquire(&mut self) {
        self.acquire();
    }

    fn release(&mut self) {
        self.release();
    }

    fn handle(&self) -> Channel {
        self.channel().clone()
    }
}
