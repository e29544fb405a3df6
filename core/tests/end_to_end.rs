//! End-to-end behaviour of the flagging pipeline on synthetic observations.

use ndarray::{s, Array2, Array3, Axis};
use num_complex::Complex64;
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use statrs::distribution::Normal;

use rfimask_core::observe::RecordingObserver;
use rfimask_core::{
    apply_mask, combine, decimate, flagged_fraction, radiometer, spectral_kurtosis, sum_threshold,
    AxisSelection, FlagEvent, FlagParams, Grid, Mask, NullObserver, Polarization, RadiometerParams,
    RfiFlagger, SumThreshold, SumThresholdParams,
};

const M: usize = 128;

/// Complex Gaussian voltages, `[time, channel]`, unit variance per component.
fn gaussian_voltages(n_times: usize, n_chans: usize, seed: u64) -> Array2<Complex64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0).unwrap();
    Array2::from_shape_simple_fn((n_times, n_chans), || {
        Complex64::new(normal.sample(&mut rng), normal.sample(&mut rng))
    })
}

#[test]
fn sum_threshold_flags_exactly_an_injected_burst() {
    let mut grid = Grid::from_elem((64, 256), 100.0);
    grid.slice_mut(s![17, 100..108]).fill(10_000.0);

    let mask = sum_threshold(grid.view(), AxisSelection::Time).unwrap();

    let mut expected = Mask::zeros((64, 256));
    expected.slice_mut(s![17, 100..108]).fill(1);
    assert_eq!(mask, expected);
}

#[test]
fn combined_mode_matches_or_of_independent_axes() {
    let power = decimate(gaussian_voltages(M * 128, 64, 1).view().into_dyn(), M, Polarization::First)
        .unwrap()
        .into_pairs()
        .remove(0)
        .into_parts()
        .0;

    let mut grid = power;
    grid.slice_mut(s![10, 32..48]).mapv_inplace(|v| v * 5.0);
    grid.slice_mut(s![0..64, 77]).mapv_inplace(|v| v * 3.0);

    let detector = SumThreshold::new(SumThresholdParams {
        single_axis_levels: 7,
        ..SumThresholdParams::default()
    });
    let time = detector.flag(grid.view(), AxisSelection::Time, &NullObserver).unwrap();
    let freq = detector.flag(grid.view(), AxisSelection::Frequency, &NullObserver).unwrap();
    let both = detector.flag(grid.view(), AxisSelection::Both, &NullObserver).unwrap();

    assert_eq!(both.mask, combine(time.mask.view(), freq.mask.view()).unwrap());
    assert!(both.mask.slice(s![10, 32..48]).iter().all(|&v| v == 1));
}

#[test]
fn spectral_kurtosis_separates_noise_from_a_carrier() {
    let mut voltages = gaussian_voltages(M * 64, 16, 2);
    for (t, v) in voltages.column_mut(5).iter_mut().enumerate() {
        *v = Complex64::from_polar(10.0, 0.01 * t as f64);
    }

    let pair = decimate(voltages.view().into_dyn(), M, Polarization::First)
        .unwrap()
        .into_pairs()
        .remove(0);
    let mask = spectral_kurtosis(pair.power().view(), pair.moment().view(), M, 1.5, 0.6).unwrap();

    assert!(mask.row(5).iter().all(|&v| v == 1), "carrier channel not fully flagged");
    let mut noise_only = mask.clone();
    noise_only.row_mut(5).fill(0);
    let false_positive = flagged_fraction(noise_only.view());
    assert!(false_positive < 0.1, "noise false-positive rate {}", false_positive);
}

#[test]
fn dual_polarization_pairs_flag_independently() {
    let mut voltages = Array3::<Complex64>::zeros((M * 128, 8, 2));
    voltages
        .index_axis_mut(Axis(2), 0)
        .assign(&gaussian_voltages(M * 128, 8, 3));
    voltages
        .index_axis_mut(Axis(2), 1)
        .assign(&gaussian_voltages(M * 128, 8, 4));

    let pairs = decimate(voltages.view().into_dyn(), M, Polarization::Both)
        .unwrap()
        .into_pairs();
    assert_eq!(pairs.len(), 2);
    assert_ne!(pairs[0].power(), pairs[1].power());

    let flagger = RfiFlagger::new(FlagParams { axis: AxisSelection::Time, ..FlagParams::default() });
    for pair in &pairs {
        let result = flagger.flag(pair, &NullObserver).unwrap();
        assert_eq!(result.mask.dim(), (8, 128));
        assert!(result.flagged_fraction < 0.2);
    }
}

#[test]
fn masking_improves_the_radiometer_metric() {
    let pair = decimate(gaussian_voltages(M * 128, 8, 5).view().into_dyn(), M, Polarization::First)
        .unwrap()
        .into_pairs()
        .remove(0);
    let mut power = pair.power().clone();
    // Intermittent bursts every fourth cell of two channels.
    for ch in [2, 6] {
        for t in (0..128).step_by(4) {
            power[[ch, t]] *= 50.0;
        }
    }

    let mask = sum_threshold(power.view(), AxisSelection::Time).unwrap();
    let masked = apply_mask(power.view(), mask.view()).unwrap();

    let params = RadiometerParams::default();
    let before = radiometer(power.view(), 32, &params, &NullObserver).unwrap();
    let after = radiometer(masked.view(), 32, &params, &NullObserver).unwrap();
    assert!(after.outlier_percent < before.outlier_percent);
}

#[test]
fn engine_reports_structured_progress() {
    let pair = decimate(gaussian_voltages(M * 64, 64, 6).view().into_dyn(), M, Polarization::First)
        .unwrap()
        .into_pairs()
        .remove(0);
    let observer = RecordingObserver::new();
    RfiFlagger::new(FlagParams::default())
        .flag(&pair, &observer)
        .unwrap();

    let events = observer.events();
    let finished = events
        .iter()
        .filter(|e| matches!(e, FlagEvent::StageFinished { .. }))
        .count();
    let levels = events
        .iter()
        .filter(|e| matches!(e, FlagEvent::LevelCompleted { .. }))
        .count();
    assert_eq!(finished, 2);
    assert_eq!(levels, 14);
}
