//! Cartesian target to chain lengths.
//!
//! The model accounts for the arc of chain wrapped around each sprocket,
//! the tension carried by each straight segment, catenary sag under the
//! chain's own weight, per-side pitch tolerance, and elastic stretch under
//! load. The transform is closed-form; the matching forward transform in
//! [`crate::forward`] iterates over it.

use nalgebra::Vector2;

use crate::geometry::{ChainConfig, ChainRouting, SledGeometry, SPROCKET_RADIUS};

/// Chain weight per millimetre, in N/mm (#25 roller chain).
pub(crate) const CHAIN_WEIGHT_PER_MM: f64 = 0.14 * 9.8 / 1000.0;

/// Left and right chain lengths in mm.
///
/// Measured from the sprocket along the wrapped arc and the hanging span to
/// the sled attachment, minus the virtual length contributed by the sled
/// rotation mechanism.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainLengths {
    pub left: f64,
    pub right: f64,
}

/// Per-side intermediate geometry: wrapped arc plus sprocket tangent point.
struct SprocketExit {
    arc: f64,
    tangent: Vector2<f64>,
}

/// Compute the chain lengths that place the sled at `target`.
///
/// Total over the whole plane: targets closer to a motor than the sprocket
/// radius, or degenerate tension triangles, yield non-finite lengths rather
/// than an error. Callers must treat non-finite results as unreachable.
pub fn chain_lengths(cfg: &ChainConfig, target: Vector2<f64>) -> ChainLengths {
    let geo = SledGeometry::from_config(cfg);
    let r = SPROCKET_RADIUS;
    let (x, y) = (target.x, target.y);

    let left_dist = (geo.left_anchor() - target).norm();
    let right_dist = (geo.right_anchor() - target).norm();

    // Chain angle from horizontal at each sprocket, and where the chain
    // leaves the sprocket. The tangent points sit inside/above the anchors
    // for top routing, outside/below for bottom routing.
    let y_diff = geo.y_motor - y;
    let (left, right) = match cfg.routing {
        ChainRouting::Top => {
            let left_angle = (y_diff / left_dist).asin() + (r / left_dist).asin();
            let right_angle = (y_diff / right_dist).asin() + (r / right_dist).asin();
            (
                SprocketExit {
                    arc: r * left_angle,
                    tangent: Vector2::new(
                        -geo.x_motor + r * left_angle.sin(),
                        geo.y_motor + r * left_angle.cos(),
                    ),
                },
                SprocketExit {
                    arc: r * right_angle,
                    tangent: Vector2::new(
                        geo.x_motor - r * right_angle.sin(),
                        geo.y_motor + r * right_angle.cos(),
                    ),
                },
            )
        }
        ChainRouting::Bottom => {
            let left_angle = (y_diff / left_dist).asin() - (r / left_dist).asin();
            let right_angle = (y_diff / right_dist).asin() - (r / right_dist).asin();
            (
                SprocketExit {
                    arc: r * (std::f64::consts::PI - left_angle),
                    tangent: Vector2::new(
                        -geo.x_motor - r * left_angle.sin(),
                        geo.y_motor - r * left_angle.cos(),
                    ),
                },
                SprocketExit {
                    arc: r * (std::f64::consts::PI - right_angle),
                    tangent: Vector2::new(
                        geo.x_motor + r * right_angle.sin(),
                        geo.y_motor - r * right_angle.cos(),
                    ),
                },
            )
        }
    };

    let left_straight = (left_dist * left_dist - r * r).sqrt();
    let right_straight = (right_dist * right_dist - r * r).sqrt();

    // Planar static equilibrium at the sled: the suspended weight is the
    // sled plus half of each hanging span.
    let total_weight =
        cfg.sled_weight + 0.5 * CHAIN_WEIGHT_PER_MM * (left_straight + right_straight);
    let lt = left.tangent;
    let rt = right.tangent;
    let denom = lt.x * rt.y - rt.x * lt.y - lt.x * y + x * lt.y + rt.x * y - x * rt.y;
    let left_tension = -(total_weight * (lt - target).norm() * (rt.x - x)) / denom;
    let right_tension = (total_weight * (rt - target).norm() * (lt.x - x)) / denom;

    // Both catenaries share the shape parameter derived from the horizontal
    // tension component at the sled.
    let horizontal_tension = left_tension * (x - lt.x) / left_straight;
    let shape = horizontal_tension / CHAIN_WEIGHT_PER_MM;

    let left_span = ((2.0 * shape * ((x - lt.x) / (2.0 * shape)).sinh()).powi(2)
        + (lt.y - y).powi(2))
    .sqrt();
    let right_span = ((2.0 * shape * ((rt.x - x) / (2.0 * shape)).sinh()).powi(2)
        + (rt.y - y).powi(2))
    .sqrt();

    // Pitch tolerance and elastic stretch shorten the chain that has to be
    // paid out for a given span.
    let left_total = left.arc
        + left_span
            / (1.0 + cfg.left_chain_tolerance / 100.0)
            / (1.0 + left_tension * cfg.chain_elongation_factor)
        - cfg.rotation_disk_radius;
    let right_total = right.arc
        + right_span
            / (1.0 + cfg.right_chain_tolerance / 100.0)
            / (1.0 + right_tension * cfg.chain_elongation_factor)
        - cfg.rotation_disk_radius;

    ChainLengths {
        left: left_total,
        right: right_total,
    }
}
