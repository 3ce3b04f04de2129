// Distance-attenuation impedance model
//
// Maps a touch position and one measurement pair's terminal positions to a
// synthetic impedance magnitude. A touch close to the source-sink path (or
// to either terminal) lowers the impedance; far touches saturate toward
// base + distance_factor * 100.
//
// Every function here is pure given (touch, source, sink, params, rng), so
// a simulator seeded with a fixed RNG is fully deterministic.

use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::config::SimulationConfig;
use crate::measurement::ImpedanceSample;

/// Exponential decay distance constant [mm]
pub const DECAY_CONSTANT_MM: f64 = 30.0;

/// Lower clamp keeping magnitudes physical [ohm]
pub const MAGNITUDE_FLOOR_OHM: f64 = 100.0;

/// Simulated phase is uniform in [-PI/4, PI/4]
const PHASE_RANGE_RAD: f64 = std::f64::consts::FRAC_PI_4;

/// Distance from `point` to the segment `start`-`end` (clamped projection)
fn segment_distance(point: (f64, f64), start: (f64, f64), end: (f64, f64)) -> f64 {
    let (px, py) = point;
    let (sx, sy) = start;
    let (ex, ey) = end;

    let line_x = ex - sx;
    let line_y = ey - sy;
    let length_sq = line_x * line_x + line_y * line_y;

    // Degenerate zero-length segment: distance to the start terminal
    if length_sq < 1e-12 {
        return (px - sx).hypot(py - sy);
    }

    let t = (((px - sx) * line_x + (py - sy) * line_y) / length_sq).clamp(0.0, 1.0);
    let closest_x = sx + t * line_x;
    let closest_y = sy + t * line_y;
    (px - closest_x).hypot(py - closest_y)
}

/// Blended distance driving the attenuation curve
///
/// 70% distance to the source-sink path, 30% distance to the nearest
/// terminal, so touches right on a terminal register strongly even when the
/// opposite terminal is far away.
pub fn effective_distance(touch: (f64, f64), source: (f64, f64), sink: (f64, f64)) -> f64 {
    let path_distance = segment_distance(touch, source, sink);
    let dist_source = (touch.0 - source.0).hypot(touch.1 - source.1);
    let dist_sink = (touch.0 - sink.0).hypot(touch.1 - sink.1);
    let min_terminal_distance = dist_source.min(dist_sink);

    path_distance * 0.7 + min_terminal_distance * 0.3
}

/// Noise-free magnitude for a given effective distance
///
/// Saturating exponential: Z = base + factor * 100 * (1 - exp(-d / decay)).
/// Monotonically non-decreasing in `effective_distance_mm` for
/// non-negative `distance_factor`.
pub fn noiseless_magnitude(effective_distance_mm: f64, sim: &SimulationConfig) -> f64 {
    let change =
        sim.distance_factor * 100.0 * (1.0 - (-effective_distance_mm / DECAY_CONSTANT_MM).exp());
    sim.base_impedance_ohm + change
}

/// Simulated magnitude for one pair, with multiplicative Gaussian noise
pub fn pair_magnitude<R: Rng>(
    touch: (f64, f64),
    source: (f64, f64),
    sink: (f64, f64),
    sim: &SimulationConfig,
    rng: &mut R,
) -> f64 {
    let mut magnitude = noiseless_magnitude(effective_distance(touch, source, sink), sim);

    let sigma = sim.noise_level * magnitude;
    if sigma > 0.0 {
        if let Ok(noise) = Normal::new(0.0, sigma) {
            magnitude += noise.sample(rng);
        }
    }

    magnitude.max(MAGNITUDE_FLOOR_OHM)
}

/// Simulated sample for one pair: attenuated magnitude plus a uniform phase
pub fn pair_sample<R: Rng>(
    touch: (f64, f64),
    source: (f64, f64),
    sink: (f64, f64),
    sim: &SimulationConfig,
    rng: &mut R,
) -> ImpedanceSample {
    let magnitude = pair_magnitude(touch, source, sink, sim, rng);
    let phase = rng.gen_range(-PHASE_RANGE_RAD..PHASE_RANGE_RAD);
    ImpedanceSample::new(magnitude, phase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn quiet_sim() -> SimulationConfig {
        SimulationConfig {
            noise_level: 0.0,
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn test_segment_distance_perpendicular() {
        // Point above the middle of a horizontal segment
        let d = segment_distance((50.0, 30.0), (0.0, 0.0), (100.0, 0.0));
        assert!((d - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_segment_distance_clamps_to_endpoints() {
        // Projection falls outside the segment; distance is to the endpoint
        let d = segment_distance((150.0, 0.0), (0.0, 0.0), (100.0, 0.0));
        assert!((d - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_segment_distance_degenerate() {
        let d = segment_distance((3.0, 4.0), (0.0, 0.0), (0.0, 0.0));
        assert!((d - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_magnitude_monotonic_in_distance() {
        let sim = quiet_sim();
        let mut previous = f64::NEG_INFINITY;
        for step in 0..200 {
            let magnitude = noiseless_magnitude(step as f64, &sim);
            assert!(
                magnitude >= previous,
                "magnitude decreased at distance {}",
                step
            );
            previous = magnitude;
        }
    }

    #[test]
    fn test_magnitude_saturates() {
        let sim = quiet_sim();
        let far = noiseless_magnitude(1_000.0, &sim);
        let ceiling = sim.base_impedance_ohm + sim.distance_factor * 100.0;
        assert!(far <= ceiling);
        assert!(far > ceiling * 0.99);
    }

    #[test]
    fn test_deterministic_under_fixed_seed() {
        let sim = SimulationConfig::default();
        let touch = (42.0, 17.0);
        let source = (0.0, 0.0);
        let sink = (100.0, 0.0);

        let mut rng_a = StdRng::seed_from_u64(7);
        let mut rng_b = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let a = pair_sample(touch, source, sink, &sim, &mut rng_a);
            let b = pair_sample(touch, source, sink, &sim, &mut rng_b);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_magnitude_floor() {
        let sim = SimulationConfig {
            base_impedance_ohm: 0.0,
            distance_factor: 0.0,
            noise_level: 0.0,
            seed: None,
        };
        let mut rng = StdRng::seed_from_u64(0);
        let magnitude = pair_magnitude((0.0, 0.0), (0.0, 0.0), (100.0, 0.0), &sim, &mut rng);
        assert_eq!(magnitude, MAGNITUDE_FLOOR_OHM);
    }

    #[test]
    fn test_phase_within_quarter_pi() {
        let sim = SimulationConfig::default();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            let sample = pair_sample((50.0, 50.0), (0.0, 0.0), (100.0, 0.0), &sim, &mut rng);
            assert!(sample.phase_rad.abs() < std::f64::consts::FRAC_PI_4);
        }
    }
}
