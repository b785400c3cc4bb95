//! Factorial designs: exact empirical moments and power of a within-unit
//! contrast analysed in long form.

use approx::assert_relative_eq;
use mixedpower_core::data::long_to_wide;
use mixedpower_core::fit::ReferenceFitter;
use mixedpower_core::matrix::dense::sample_covariance;
use mixedpower_core::power::{power_sim, Analysis, DataGenerator, PowerConfig};
use mixedpower_core::sim::{simulate_design, DesignSpec};
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::SeedableRng;

const PRE_POST: &str = r#"{
    "within": {"time": ["pre", "post"]},
    "means": [[100.0], [105.0]],
    "sd": 15.0,
    "r": 0.7,
    "n": 25
}"#;

#[test]
fn test_empirical_design_matches_targets() {
    let mut spec: DesignSpec = serde_json::from_str(PRE_POST).unwrap();
    spec.empirical = true;
    let design = simulate_design(&spec, &mut StdRng::seed_from_u64(12)).unwrap();
    let pre = design.data.get_float("pre").unwrap();
    let post = design.data.get_float("post").unwrap();
    let x = DMatrix::from_fn(25, 2, |i, j| if j == 0 { pre[i] } else { post[i] });

    assert_relative_eq!(x.column(0).mean(), 100.0, epsilon = 1e-9);
    assert_relative_eq!(x.column(1).mean(), 105.0, epsilon = 1e-9);
    let expected = DMatrix::from_row_slice(2, 2, &[225.0, 157.5, 157.5, 225.0]);
    assert_relative_eq!(sample_covariance(&x), expected, epsilon = 1e-8);
}

#[test]
fn test_long_form_round_trips_to_wide() {
    let spec: DesignSpec = serde_json::from_str(PRE_POST).unwrap();
    let design = simulate_design(&spec, &mut StdRng::seed_from_u64(5)).unwrap();
    let long = design.to_long().unwrap();
    assert_eq!(long.nrows(), 50);
    let wide = long_to_wide(&long, &spec.id, &["time"], &spec.dv).unwrap();
    assert_eq!(wide.get_float("post").unwrap(), design.data.get_float("post").unwrap());
}

#[test]
fn test_within_contrast_power() {
    let spec: DesignSpec = serde_json::from_str(PRE_POST).unwrap();
    assert_eq!(spec.total_size(), 50);
    // paired difference sd = 15 * sqrt(2 * 0.3) = 11.6, so d_z = 0.43 and
    // 25 pairs give power near 0.55
    let analysis = Analysis::new("y ~ time + (1 | id)", "time").unwrap();
    let config = PowerConfig { n_sim: 200, ..Default::default() };
    let est = power_sim(&spec, &analysis, &ReferenceFitter::new(), &config).unwrap();
    let power = est.power.unwrap();
    assert!((0.35..=0.80).contains(&power), "power was {}", power);
    assert!(est.n_failed < 10);
}
