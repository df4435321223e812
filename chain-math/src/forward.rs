//! Chain lengths back to a Cartesian position.
//!
//! There is no closed form for the sag-aware model, so the production
//! solver iterates the inverse transform from a cached seed position and
//! feeds the chain-length errors back into the guess. A sag-free
//! circle-intersection fallback is available for machines calibrated with
//! `simple_kinematics`.

use nalgebra::Vector2;
use tracing::warn;

use crate::geometry::{ChainConfig, SledGeometry};
use crate::inverse::{chain_lengths, ChainLengths};

/// Iteration cap before a solve is declared divergent.
pub const DEFAULT_MAX_GUESSES: usize = 200;

/// Convergence tolerance on each chain-length error, in mm.
pub const DEFAULT_MAX_ERROR_MM: f64 = 0.01;

/// Solves measured chain lengths back to a Cartesian position.
///
/// Implementations keep their own iteration seed so that consecutive solves
/// along a toolpath start near the answer. The solve is total: divergent
/// inputs produce the machine-origin sentinel, never a panic or an error.
pub trait ForwardSolver {
    /// Best-effort Cartesian position for the measured chain lengths.
    fn solve(&mut self, cfg: &ChainConfig, measured: ChainLengths) -> Vector2<f64>;

    /// Overwrite the seed, e.g. after an externally computed position.
    fn set_seed(&mut self, seed: Vector2<f64>);

    /// Forget the seed; the next solve starts from the machine origin.
    fn reset_seed(&mut self);
}

/// Iterative solver feeding chain-length errors back into the guess.
///
/// Each round evaluates the inverse transform at the current guess and
/// nudges the guess by the raw errors:
///
/// ```text
/// x <- x + e_left - e_right
/// y <- y - e_left - e_right
/// ```
///
/// This is a fixed feedback step rather than a Newton step; it converges
/// quickly near the seed because the chain directions are roughly diagonal
/// across the workspace. Swap in another [`ForwardSolver`] through
/// [`Kinematics::with_solver`] if a damped least-squares solve is needed.
#[derive(Debug, Clone)]
pub struct ChainErrorSolver {
    max_guesses: usize,
    max_error_mm: f64,
    /// Last solved position; single precision is plenty for a seed.
    seed: Vector2<f32>,
}

impl Default for ChainErrorSolver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_GUESSES, DEFAULT_MAX_ERROR_MM)
    }
}

impl ChainErrorSolver {
    pub fn new(max_guesses: usize, max_error_mm: f64) -> Self {
        Self {
            max_guesses,
            max_error_mm,
            seed: Vector2::zeros(),
        }
    }

    /// Current iteration seed.
    pub fn seed(&self) -> Vector2<f32> {
        self.seed
    }
}

impl ForwardSolver for ChainErrorSolver {
    fn solve(&mut self, cfg: &ChainConfig, measured: ChainLengths) -> Vector2<f64> {
        let mut guess = Vector2::new(f64::from(self.seed.x), f64::from(self.seed.y));
        let mut guesses = 0;

        let result = loop {
            let at_guess = chain_lengths(cfg, guess);
            let left_error = measured.left - at_guess.left;
            let right_error = measured.right - at_guess.right;

            // The correction is applied before the convergence test; a
            // converged solve therefore returns the adjusted guess.
            guess.x += left_error - right_error;
            guess.y -= left_error + right_error;
            guesses += 1;

            let converged = left_error.abs() <= self.max_error_mm
                && right_error.abs() <= self.max_error_mm;
            let out_of_chain =
                at_guess.left > cfg.chain_length || at_guess.right > cfg.chain_length;

            if converged || guesses > self.max_guesses || out_of_chain {
                if guesses > self.max_guesses || out_of_chain {
                    warn!(
                        "unable to find a valid machine position for chain lengths {:.2}, {:.2}",
                        measured.left, measured.right
                    );
                    break Vector2::zeros();
                }
                break guess;
            }
        };

        self.set_seed(result);
        result
    }

    fn set_seed(&mut self, seed: Vector2<f64>) {
        self.seed = Vector2::new(seed.x as f32, seed.y as f32);
    }

    fn reset_seed(&mut self) {
        self.seed = Vector2::zeros();
    }
}

/// Sag-free fallback: intersect two circles centred on the motor anchors,
/// then apply the table offsets and the calibration divisors.
pub fn simple_position(cfg: &ChainConfig, measured: ChainLengths) -> Vector2<f64> {
    let geo = SledGeometry::from_config(cfg);
    let span = 2.0 * geo.x_motor;

    // Distance from the left motor along the motor line, then drop.
    let along = (span * span - measured.right.powi(2) + measured.left.powi(2)) / (2.0 * span);
    let drop = (measured.left.powi(2) - along * along).sqrt();

    Vector2::new(
        (-geo.x_motor + along) / cfg.x_corr_scaling,
        (geo.y_motor - drop) / cfg.y_corr_scaling,
    )
}

/// Bidirectional kinematics front door.
///
/// Owns the forward solver (and with it the iteration seed) and picks the
/// forward model from the configuration on every call.
pub struct Kinematics {
    solver: Box<dyn ForwardSolver + Send>,
}

impl Default for Kinematics {
    fn default() -> Self {
        Self::new()
    }
}

impl Kinematics {
    pub fn new() -> Self {
        Self {
            solver: Box::new(ChainErrorSolver::default()),
        }
    }

    pub fn with_solver(solver: Box<dyn ForwardSolver + Send>) -> Self {
        Self { solver }
    }

    /// Chain lengths that place the sled at `target` (inverse transform).
    pub fn lengths(&self, cfg: &ChainConfig, target: Vector2<f64>) -> ChainLengths {
        chain_lengths(cfg, target)
    }

    /// Cartesian position for measured chain lengths (forward transform).
    ///
    /// Both forward models leave their result in the seed so that switching
    /// models mid-session keeps the next iterative solve well seeded.
    pub fn position(&mut self, cfg: &ChainConfig, measured: ChainLengths) -> Vector2<f64> {
        if cfg.simple_kinematics {
            let position = simple_position(cfg, measured);
            self.solver.set_seed(position);
            position
        } else {
            self.solver.solve(cfg, measured)
        }
    }

    /// Re-seed at the machine origin, e.g. after a soft reset.
    pub fn reset(&mut self) {
        self.solver.reset_seed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inverse::tests::test_config;
    use approx::assert_abs_diff_eq;

    #[test]
    fn round_trips_inverse_within_tolerance() {
        let cfg = test_config();
        let mut solver = ChainErrorSolver::default();

        for &(x, y) in &[(500.0, 0.0), (-730.0, 420.0), (0.0, -480.0), (120.0, 15.0)] {
            let measured = chain_lengths(&cfg, Vector2::new(x, y));
            let position = solver.solve(&cfg, measured);
            assert_abs_diff_eq!(position.x, x, epsilon = 0.05);
            assert_abs_diff_eq!(position.y, y, epsilon = 0.05);
        }
    }

    #[test]
    fn converges_from_cold_seed() {
        let cfg = test_config();
        let mut solver = ChainErrorSolver::default();
        assert_eq!(solver.seed(), Vector2::zeros());

        let measured = chain_lengths(&cfg, Vector2::new(500.0, 0.0));
        let position = solver.solve(&cfg, measured);

        assert_abs_diff_eq!(position.x, 500.0, epsilon = 0.05);
        assert_abs_diff_eq!(position.y, 0.0, epsilon = 0.05);

        // The converged position becomes the next seed.
        assert_abs_diff_eq!(f64::from(solver.seed().x), 500.0, epsilon = 0.1);
    }

    #[test]
    fn divergence_returns_origin_sentinel() {
        let cfg = test_config();
        let mut solver = ChainErrorSolver::default();
        solver.set_seed(Vector2::new(250.0, -100.0));

        // More chain than the machine owns can never converge.
        let position = solver.solve(
            &cfg,
            ChainLengths {
                left: 10_000.0,
                right: 10_000.0,
            },
        );

        assert_eq!(position, Vector2::zeros());
        assert_eq!(solver.seed(), Vector2::zeros());
    }

    #[test]
    fn simple_inverts_straight_line_distances() {
        let cfg = test_config();
        let geo = SledGeometry::from_config(&cfg);
        let target = Vector2::new(300.0, -200.0);

        // With no sag model, the chain lengths are plain anchor distances.
        let measured = ChainLengths {
            left: (geo.left_anchor() - target).norm(),
            right: (geo.right_anchor() - target).norm(),
        };
        let position = simple_position(&cfg, measured);

        assert_abs_diff_eq!(position.x, target.x, epsilon = 1e-9);
        assert_abs_diff_eq!(position.y, target.y, epsilon = 1e-9);
    }

    #[test]
    fn simple_applies_correction_divisors() {
        let mut cfg = test_config();
        cfg.x_corr_scaling = 2.0;
        cfg.y_corr_scaling = 4.0;
        let geo = SledGeometry::from_config(&cfg);
        let target = Vector2::new(300.0, -200.0);

        let measured = ChainLengths {
            left: (geo.left_anchor() - target).norm(),
            right: (geo.right_anchor() - target).norm(),
        };
        let position = simple_position(&cfg, measured);

        assert_abs_diff_eq!(position.x, target.x / 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(position.y, target.y / 4.0, epsilon = 1e-9);
    }

    #[test]
    fn front_door_picks_model_from_config() {
        let mut cfg = test_config();
        let mut kin = Kinematics::new();
        let geo = SledGeometry::from_config(&cfg);
        let target = Vector2::new(-150.0, -300.0);

        // Sag-aware path.
        let measured = kin.lengths(&cfg, target);
        let solved = kin.position(&cfg, measured);
        assert_abs_diff_eq!(solved.x, target.x, epsilon = 0.05);
        assert_abs_diff_eq!(solved.y, target.y, epsilon = 0.05);

        // Simple path ignores sag entirely.
        cfg.simple_kinematics = true;
        let straight = ChainLengths {
            left: (geo.left_anchor() - target).norm(),
            right: (geo.right_anchor() - target).norm(),
        };
        let simple = kin.position(&cfg, straight);
        assert_abs_diff_eq!(simple.x, target.x, epsilon = 1e-9);
        assert_abs_diff_eq!(simple.y, target.y, epsilon = 1e-9);
    }
}
