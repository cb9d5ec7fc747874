use approx::assert_relative_eq;
use patient_twin::patient::cohort::{generate_cohort, CohortSpec};
use patient_twin::{
    compare, preset, simulate, Archetype, EventSchedule, PatientProfile, SimulationEngine, State,
    StateComponent, TimeSpan,
};

#[test]
fn test_every_archetype_returns_to_baseline() {
    let engine = SimulationEngine::default();
    for archetype in Archetype::ALL {
        let profile = PatientProfile::from_archetype(archetype);
        let baseline = profile.baseline_state();
        let perturbed = State {
            glucose: baseline.glucose * 1.3,
            insulin: baseline.insulin * 0.7,
            immune_cells: baseline.immune_cells * 1.2,
            inflammation: baseline.inflammation * 1.5,
            heart_rate: baseline.heart_rate + 10.0,
            blood_pressure: baseline.blood_pressure - 10.0,
            ..baseline
        };

        let traj = engine
            .simulate_from(
                &profile,
                &perturbed,
                &EventSchedule::empty(),
                TimeSpan::hours(72.0).unwrap(),
                1.0,
            )
            .unwrap();

        let last = traj.final_state().unwrap();
        for component in [
            StateComponent::Glucose,
            StateComponent::Insulin,
            StateComponent::ImmuneCells,
            StateComponent::Inflammation,
            StateComponent::HeartRate,
            StateComponent::BloodPressure,
        ] {
            assert_relative_eq!(
                last.get(component),
                baseline.get(component),
                max_relative = 5e-3
            );
        }
    }
}

#[test]
fn test_runs_are_deterministic() {
    let profile = PatientProfile::from_archetype(Archetype::Diabetic);
    let schedule = EventSchedule::builder()
        .dose(preset("metformin").unwrap(), 500.0, 0.0)
        .dose(preset("ibuprofen").unwrap(), 400.0, 2.0)
        .meal(60.0, 1.0)
        .meal(40.0, 6.0)
        .build()
        .unwrap();
    let span = TimeSpan::hours(12.0).unwrap();

    let first = simulate(&profile, &schedule, span, 0.1).unwrap();
    let second = simulate(&profile, &schedule, span, 0.1).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_antidiabetic_dose_does_not_raise_peak_glucose() {
    let profile = PatientProfile::from_archetype(Archetype::Diabetic);
    let metformin = preset("metformin").unwrap();
    let span = TimeSpan::hours(12.0).unwrap();

    let peaks: Vec<f64> = [0.0, 250.0, 500.0, 1000.0]
        .iter()
        .map(|&amount| {
            let mut builder = EventSchedule::builder().meal(50.0, 1.0);
            if amount > 0.0 {
                builder = builder.dose(metformin.clone(), amount, 0.0);
            }
            let traj = simulate(&profile, &builder.build().unwrap(), span, 0.05).unwrap();
            traj.peak(StateComponent::Glucose).unwrap().1
        })
        .collect();

    for pair in peaks.windows(2) {
        assert!(pair[1] <= pair[0] + 1e-6, "peaks not monotone: {:?}", peaks);
    }
    assert!(peaks[3] < peaks[0] - 20.0);
}

#[test]
fn test_widely_spaced_doses_superpose() {
    let profile = PatientProfile::from_archetype(Archetype::Standard);
    let ibuprofen = preset("ibuprofen").unwrap();
    let span = TimeSpan::hours(96.0).unwrap();

    let run = |times: &[f64]| {
        let schedule = EventSchedule::builder()
            .doses_at(&ibuprofen, 400.0, times)
            .build()
            .unwrap();
        simulate(&profile, &schedule, span, 0.5).unwrap().drug_tissue("ibuprofen")
    };

    let both = run(&[0.0, 48.0]);
    let first = run(&[0.0]);
    let second = run(&[48.0]);
    let peak = both.iter().copied().fold(0.0, f64::max);
    assert!(peak > 0.0);

    for ((b, f), s) in both.iter().zip(&first).zip(&second) {
        assert!((b - (f + s)).abs() <= 1e-4 * peak);
    }

    // Each dose peaks at the same height once the first has washed out.
    let first_peak = both[..96].iter().copied().fold(0.0, f64::max);
    let second_peak = both[96..].iter().copied().fold(0.0, f64::max);
    assert_relative_eq!(first_peak, second_peak, max_relative = 1e-3);
}

#[test]
fn test_overlapping_doses_add_up_in_plasma() {
    let profile = PatientProfile::from_archetype(Archetype::Standard);
    let metformin = preset("metformin").unwrap();
    let span = TimeSpan::hours(24.0).unwrap();

    let run = |times: &[f64]| {
        let schedule = EventSchedule::builder()
            .doses_at(&metformin, 500.0, times)
            .build()
            .unwrap();
        simulate(&profile, &schedule, span, 0.25)
            .unwrap()
            .column(StateComponent::DrugPlasma)
    };

    let both = run(&[0.0, 0.5]);
    let first = run(&[0.0]);
    let second = run(&[0.5]);
    let peak = both.iter().copied().fold(0.0, f64::max);
    let single_peak = first.iter().copied().fold(0.0, f64::max);
    assert!(peak > 1.5 * single_peak);

    for ((b, f), s) in both.iter().zip(&first).zip(&second) {
        assert!((b - (f + s)).abs() <= 1e-4 * peak, "{} vs {}", b, f + s);
    }
}

#[test]
fn test_comparator_trajectories_share_sample_times() {
    let profile = PatientProfile::from_archetype(Archetype::Elderly);
    let scenarios = vec![
        ("none".to_string(), EventSchedule::empty()),
        (
            "meal".to_string(),
            EventSchedule::builder().meal(50.0, 0.3).build().unwrap(),
        ),
        (
            "amlodipine".to_string(),
            EventSchedule::builder()
                .dose(preset("amlodipine").unwrap(), 5.0, 0.7)
                .build()
                .unwrap(),
        ),
    ];

    let span = TimeSpan::new(0.0, 10.0).unwrap();
    let comparison = compare(&profile, &scenarios, span, 1.0 / 3.0).unwrap();
    assert!(comparison.is_complete());
    assert_eq!(comparison.sample_times().len(), 31);
    for (_, traj) in comparison.successes() {
        let times = traj.times();
        assert_eq!(times.len(), comparison.sample_times().len());
        for (a, b) in times.iter().zip(comparison.sample_times()) {
            assert_eq!(a, b);
        }
    }
}

#[test]
fn test_cohort_is_reproducible_per_seed() {
    let spec = CohortSpec::new(Archetype::Diabetic, 12);
    let a = generate_cohort(&spec, 42).unwrap();
    let b = generate_cohort(&spec, 42).unwrap();
    let c = generate_cohort(&spec, 7).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert!(a.iter().all(|p| p.archetype() == Archetype::Diabetic));
}
