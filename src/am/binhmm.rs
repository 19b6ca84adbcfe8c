//! Binary-HMM reader/writer.
//!
//! Implements the wire format described in spec.md §6: magic
//! `"julius_bin_hmm_v2"`, a qualifier string over `{E, I, M}`, then
//! big-endian fixed-width fields. Every cross-reference between sections is
//! by index into the preceding section, as in the original.
//!
//! Scope note (recorded in DESIGN.md): this writer only round-trips
//! diagonal-covariance Gaussian mixture HMMs (the `E` + optional `I`
//! qualifiers). Multi-stream and tied-mixture-codebook (`M`) models are not
//! emitted by this writer — [`AcousticModel::codebooks`](crate::am::AcousticModel)
//! can still be populated by a model built in memory or loaded through
//! another path, just not round-tripped through this file format.
use crate::am::{AcousticModel, Codebook, FeatureType, Gaussian, OutputDistribution, PhoneHmm, Transitions};
use crate::error::{EngineError, EngineResult};
use std::collections::HashMap;
use std::io::{Read, Write};

pub const MAGIC: &[u8] = b"julius_bin_hmm_v2";

fn write_u32<W: Write>(w: &mut W, v: u32) -> std::io::Result<()> {
    w.write_all(&v.to_be_bytes())
}
fn write_f32<W: Write>(w: &mut W, v: f32) -> std::io::Result<()> {
    w.write_all(&v.to_be_bytes())
}
fn write_u8<W: Write>(w: &mut W, v: u8) -> std::io::Result<()> {
    w.write_all(&[v])
}
fn write_str<W: Write>(w: &mut W, s: &str) -> std::io::Result<()> {
    write_u32(w, s.len() as u32)?;
    w.write_all(s.as_bytes())
}

fn read_u32<R: Read>(r: &mut R) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}
fn read_f32<R: Read>(r: &mut R) -> std::io::Result<f32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(f32::from_be_bytes(buf))
}
fn read_u8<R: Read>(r: &mut R) -> std::io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}
fn read_str<R: Read>(r: &mut R) -> std::io::Result<String> {
    let len = read_u32(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Writes `am` to `w` in the binary-HMM format.
pub fn write_binhmm<W: Write>(w: &mut W, am: &AcousticModel) -> EngineResult<()> {
    w.write_all(MAGIC)?;
    let qualifier = if am.inv_var { "EI" } else { "E" };
    write_str(w, qualifier)?;

    write_u32(w, am.feature_dim as u32)?;
    write_u8(w, feature_type_tag(am.feature_type))?;
    write_u8(w, am.inv_var as u8)?;
    write_u32(w, am.phones.len() as u32)?;

    // Deterministic order so the round trip is reproducible regardless of
    // HashMap iteration order.
    let mut names: Vec<&String> = am.phones.keys().collect();
    names.sort();

    for name in names {
        let hmm = &am.phones[name];
        write_str(w, &hmm.name)?;
        write_u8(w, hmm.is_pseudo as u8)?;
        let n = hmm.transitions.matrix.len();
        write_u32(w, n as u32)?;
        for row in &hmm.transitions.matrix {
            for &v in row {
                write_f32(w, v)?;
            }
        }
        write_u32(w, hmm.states.len() as u32)?;
        for dist in &hmm.states {
            match dist {
                OutputDistribution::Mixture {
                    log_weights,
                    gaussians,
                } => {
                    write_u32(w, gaussians.len() as u32)?;
                    for (lw, g) in log_weights.iter().zip(gaussians) {
                        write_f32(w, *lw)?;
                        for &m in &g.mean {
                            write_f32(w, m)?;
                        }
                        for &v in &g.variance {
                            write_f32(w, v)?;
                        }
                    }
                }
                OutputDistribution::TiedMixture { .. } => {
                    return Err(EngineError::Malformed(
                        "binary-HMM writer does not support tied-mixture codebooks".into(),
                    ))
                }
            }
        }
    }
    Ok(())
}

fn feature_type_tag(ft: FeatureType) -> u8 {
    match ft {
        FeatureType::Mfcc => 0,
        FeatureType::FilterBank => 1,
        FeatureType::MelSpectrum => 2,
    }
}

fn feature_type_from_tag(tag: u8) -> EngineResult<FeatureType> {
    Ok(match tag {
        0 => FeatureType::Mfcc,
        1 => FeatureType::FilterBank,
        2 => FeatureType::MelSpectrum,
        other => {
            return Err(EngineError::Malformed(format!(
                "unknown feature type tag {other}"
            )))
        }
    })
}

/// Reads an [`AcousticModel`] previously written by [`write_binhmm`].
pub fn read_binhmm<R: Read>(r: &mut R) -> EngineResult<AcousticModel> {
    let mut magic = vec![0u8; MAGIC.len()];
    r.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(EngineError::Malformed("bad binary-HMM magic".into()));
    }
    let qualifier = read_str(r)?;
    let inv_var_q = qualifier.contains('I');

    let feature_dim = read_u32(r)? as usize;
    let feature_type = feature_type_from_tag(read_u8(r)?)?;
    let inv_var = read_u8(r)? != 0;
    if inv_var != inv_var_q {
        return Err(EngineError::Malformed(
            "inv-var flag disagrees with qualifier string".into(),
        ));
    }
    let num_phones = read_u32(r)?;

    let mut phones = HashMap::new();
    for _ in 0..num_phones {
        let name = read_str(r)?;
        let is_pseudo = read_u8(r)? != 0;
        let n = read_u32(r)? as usize;
        let mut matrix = vec![vec![0.0f32; n]; n];
        for row in matrix.iter_mut() {
            for cell in row.iter_mut() {
                *cell = read_f32(r)?;
            }
        }
        let num_states = read_u32(r)? as usize;
        let mut states = Vec::with_capacity(num_states);
        for _ in 0..num_states {
            let num_gaussians = read_u32(r)? as usize;
            let mut log_weights = Vec::with_capacity(num_gaussians);
            let mut gaussians = Vec::with_capacity(num_gaussians);
            for _ in 0..num_gaussians {
                let lw = read_f32(r)?;
                let mut mean = vec![0.0f32; feature_dim];
                for m in mean.iter_mut() {
                    *m = read_f32(r)?;
                }
                let mut variance = vec![0.0f32; feature_dim];
                for v in variance.iter_mut() {
                    *v = read_f32(r)?;
                }
                log_weights.push(lw);
                gaussians.push(if inv_var {
                    Gaussian::new_inv_var(mean, variance)
                } else {
                    Gaussian::new(mean, variance)
                });
            }
            states.push(OutputDistribution::Mixture {
                log_weights,
                gaussians,
            });
        }
        let hmm = PhoneHmm {
            name: name.clone(),
            transitions: Transitions { matrix },
            states,
            is_pseudo,
        };
        phones.insert(name, hmm);
    }

    Ok(AcousticModel {
        feature_dim,
        feature_type,
        inv_var,
        phones,
        codebooks: Vec::<Codebook>::new(),
        short_pause_phone: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::am::Transitions;
    use crate::logmath::LOG_ZERO;

    fn sample_am() -> AcousticModel {
        let mut phones = HashMap::new();
        let dist = OutputDistribution::Mixture {
            log_weights: vec![-0.1, -2.3],
            gaussians: vec![
                Gaussian::new(vec![0.1, 0.2], vec![1.0, 0.5]),
                Gaussian::new(vec![-0.3, 0.4], vec![0.8, 1.2]),
            ],
        };
        phones.insert(
            "ah".to_string(),
            PhoneHmm {
                name: "ah".to_string(),
                transitions: Transitions {
                    matrix: vec![
                        vec![LOG_ZERO, 0.0, LOG_ZERO, LOG_ZERO],
                        vec![LOG_ZERO, -0.1, -2.3, LOG_ZERO],
                        vec![LOG_ZERO, LOG_ZERO, -0.2, -1.6],
                        vec![LOG_ZERO, LOG_ZERO, LOG_ZERO, LOG_ZERO],
                    ],
                },
                states: vec![dist.clone(), dist],
                is_pseudo: false,
            },
        );
        AcousticModel {
            feature_dim: 2,
            feature_type: FeatureType::Mfcc,
            inv_var: false,
            phones,
            codebooks: vec![],
            short_pause_phone: None,
        }
    }

    #[test]
    fn round_trip_preserves_outprob() {
        let am = sample_am();
        let mut buf = Vec::new();
        write_binhmm(&mut buf, &am).unwrap();
        let back = read_binhmm(&mut std::io::Cursor::new(buf)).unwrap();

        let feat = [0.05, 0.25];
        for name in am.phones.keys() {
            let original = &am.phones[name];
            let restored = &back.phones[name];
            for (od, rd) in original.states.iter().zip(&restored.states) {
                let a = am.log_density(od, &feat);
                let b = back.log_density(rd, &feat);
                assert!((a - b).abs() < 1e-6, "{a} vs {b}");
            }
        }
    }

    #[test]
    fn bad_magic_is_rejected() {
        let buf = b"not_a_julius_hmm_file_at_all".to_vec();
        let res = read_binhmm(&mut std::io::Cursor::new(buf));
        assert!(res.is_err());
    }
}
