//! Binary-HMM round-trip against the public API (spec.md §8 scenario 6):
//! write a multi-state, multi-mixture acoustic model out and read it back,
//! and check that every state's output density agrees with the original to
//! within 1e-6 on a fixed feature set.
use julius_rs::am::binhmm::{read_binhmm, write_binhmm};
use julius_rs::am::{AcousticModel, FeatureType, Gaussian, OutputDistribution, PhoneHmm, Transitions};
use std::collections::HashMap;
use std::io::Cursor;

fn two_state_phone(name: &str) -> PhoneHmm {
    let s1 = OutputDistribution::Mixture {
        log_weights: vec![-0.2, -1.8],
        gaussians: vec![
            Gaussian::new(vec![0.4, -0.1, 0.05], vec![0.9, 1.1, 0.7]),
            Gaussian::new(vec![-0.6, 0.3, 0.0], vec![1.2, 0.6, 1.0]),
        ],
    };
    let s2 = OutputDistribution::Mixture {
        log_weights: vec![0.0],
        gaussians: vec![Gaussian::new(vec![0.0, 0.0, 0.0], vec![1.0, 1.0, 1.0])],
    };
    PhoneHmm {
        name: name.to_string(),
        transitions: Transitions {
            matrix: vec![
                vec![f32::NEG_INFINITY, 0.0, f32::NEG_INFINITY, f32::NEG_INFINITY],
                vec![f32::NEG_INFINITY, -0.3, -1.3, f32::NEG_INFINITY],
                vec![f32::NEG_INFINITY, f32::NEG_INFINITY, -0.4, -1.1],
                vec![f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY],
            ],
        },
        states: vec![s1, s2],
        is_pseudo: false,
    }
}

fn sample_am() -> AcousticModel {
    let mut phones = HashMap::new();
    phones.insert("k".to_string(), two_state_phone("k"));
    phones.insert("ae".to_string(), two_state_phone("ae"));
    AcousticModel {
        feature_dim: 3,
        feature_type: FeatureType::Mfcc,
        inv_var: false,
        phones,
        codebooks: Vec::new(),
        short_pause_phone: None,
    }
}

#[test]
fn round_trip_through_public_api_preserves_densities() {
    let am = sample_am();
    let mut buf = Vec::new();
    write_binhmm(&mut buf, &am).unwrap();
    let restored = read_binhmm(&mut Cursor::new(buf)).unwrap();

    assert_eq!(restored.feature_dim, am.feature_dim);
    assert_eq!(restored.feature_type, am.feature_type);
    assert_eq!(restored.phones.len(), am.phones.len());

    let features = [
        [0.1, -0.2, 0.3],
        [-0.5, 0.4, 0.0],
        [0.0, 0.0, 0.0],
        [1.2, -1.1, 0.6],
    ];
    for name in am.phones.keys() {
        let original = &am.phones[name];
        let restored_phone = &restored.phones[name];
        assert_eq!(original.states.len(), restored_phone.states.len());
        for (od, rd) in original.states.iter().zip(&restored_phone.states) {
            for feat in &features {
                let a = am.log_density(od, feat);
                let b = restored.log_density(rd, feat);
                assert!((a - b).abs() < 1e-6, "density mismatch for {name}: {a} vs {b}");
            }
        }
    }
}

#[test]
fn round_trip_rejects_tied_mixture_codebooks() {
    let mut phones = HashMap::new();
    phones.insert(
        "x".to_string(),
        PhoneHmm {
            name: "x".to_string(),
            transitions: Transitions {
                matrix: vec![
                    vec![f32::NEG_INFINITY, 0.0, f32::NEG_INFINITY],
                    vec![f32::NEG_INFINITY, 0.0, 0.0],
                    vec![f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY],
                ],
            },
            states: vec![OutputDistribution::TiedMixture {
                codebook_id: 0,
                log_weights: vec![0.0],
            }],
            is_pseudo: false,
        },
    );
    let am = AcousticModel {
        feature_dim: 1,
        feature_type: FeatureType::Mfcc,
        inv_var: false,
        phones,
        codebooks: Vec::new(),
        short_pause_phone: None,
    };
    let mut buf = Vec::new();
    assert!(write_binhmm(&mut buf, &am).is_err());
}
