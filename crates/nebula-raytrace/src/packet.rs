//! Fixed-width ray packets.

use crate::{Ray, RayHit};

/// Packet widths the accelerator answers natively, widest first.
pub const PACKET_WIDTHS: [usize; 4] = [16, 8, 4, 1];

/// `W` rays traced together, one [`RayHit`] per lane.
#[derive(Debug, Clone, Copy)]
pub struct RayHitPacket<const W: usize> {
    /// Per-lane query records, filled in place.
    pub lanes: [RayHit; W],
}

/// A 4-wide packet.
pub type RayHit4 = RayHitPacket<4>;
/// An 8-wide packet.
pub type RayHit8 = RayHitPacket<8>;
/// A 16-wide packet.
pub type RayHit16 = RayHitPacket<16>;

impl<const W: usize> RayHitPacket<W> {
    /// Build a packet from the first `W` rays of `rays`.
    ///
    /// Lanes past the end of `rays` get a placeholder ray; callers mark
    /// them invalid.
    pub fn from_rays(rays: &[Ray]) -> Self {
        Self {
            lanes: std::array::from_fn(|lane| {
                let ray = rays
                    .get(lane)
                    .copied()
                    .unwrap_or_else(|| Ray::from_arrays([0.0; 3], [0.0, 0.0, 1.0]));
                RayHit::new(ray)
            }),
        }
    }
}

/// Validity mask with the first `count` lanes enabled.
pub fn lane_mask<const W: usize>(count: usize) -> [bool; W] {
    std::array::from_fn(|lane| lane < count)
}
