//! Acoustic model: tied-state HMMs over diagonal-covariance Gaussian
//! mixtures, with the context-dependent lookup chain triphone → biphone →
//! monophone that the tree-lexicon builder (`crate::lexicon`) relies on at
//! word-initial/final nodes (spec.md §4.1 "Cross-word context variants").
pub mod binhmm;
pub mod outprob;

use crate::config::IwcdMethod;
use crate::error::{EngineError, EngineResult};
use std::collections::HashMap;
use tracing::warn;

/// A single diagonal-covariance Gaussian component.
#[derive(Debug, Clone)]
pub struct Gaussian {
    pub mean: Vec<f32>,
    /// Either `1/variance` per dimension (if the model was loaded with
    /// `inv_var`) or the raw variance; [`Gaussian::log_density`] is written
    /// against whichever the model declares via `AcousticModel::inv_var`.
    pub variance: Vec<f32>,
    /// Precomputed `-0.5 * (d*ln(2*pi) + sum(ln(variance)))`, folded into
    /// every density evaluation.
    pub gconst: f32,
}

impl Gaussian {
    pub fn new(mean: Vec<f32>, variance: Vec<f32>) -> Self {
        let d = mean.len() as f32;
        let log_det: f32 = variance.iter().map(|v| v.ln()).sum();
        let gconst = -0.5 * (d * (2.0 * std::f32::consts::PI).ln() + log_det);
        Self {
            mean,
            variance,
            gconst,
        }
    }

    /// Builds a Gaussian whose `variance` field already holds `1/variance`,
    /// matching the binary-HMM `inv_var` qualifier (spec.md §4.2 "Numerics").
    pub fn new_inv_var(mean: Vec<f32>, inv_variance: Vec<f32>) -> Self {
        let d = mean.len() as f32;
        let log_det: f32 = inv_variance.iter().map(|v| -v.ln()).sum();
        let gconst = -0.5 * (d * (2.0 * std::f32::consts::PI).ln() + log_det);
        Self {
            mean,
            variance: inv_variance,
            gconst,
        }
    }

    /// Log density of `feature` under this Gaussian. `inv_var` selects
    /// whether `self.variance` is already inverted.
    pub fn log_density(&self, feature: &[f32], inv_var: bool) -> f32 {
        debug_assert_eq!(feature.len(), self.mean.len());
        let mut acc = 0.0f32;
        for ((&x, &mu), &v) in feature.iter().zip(&self.mean).zip(&self.variance) {
            let diff = x - mu;
            acc += if inv_var {
                diff * diff * v
            } else {
                diff * diff / v
            };
        }
        self.gconst - 0.5 * acc
    }
}

/// Output distribution of one emitting HMM state: either a private mixture
/// of Gaussians, or weights over components shared with other states
/// through a tied-mixture codebook (spec.md §4.2 "tied-mixture codebooks
/// share mixture-component scores across states").
#[derive(Debug, Clone)]
pub enum OutputDistribution {
    Mixture {
        log_weights: Vec<f32>,
        gaussians: Vec<Gaussian>,
    },
    TiedMixture {
        codebook_id: usize,
        log_weights: Vec<f32>,
    },
}

/// A shared codebook of Gaussian components referenced by tied-mixture
/// states.
#[derive(Debug, Clone)]
pub struct Codebook {
    pub gaussians: Vec<Gaussian>,
}

/// Cross-word context variation is *not* modeled per-state here: instead
/// each context variant (monophone, biphone, triphone) is a distinct
/// [`PhoneHmm`] entry in [`AcousticModel::phones`], and
/// [`AcousticModel::resolve_triphone`] is the triphone → biphone →
/// monophone fallback chain the tree lexicon (`crate::lexicon`) calls at
/// word-initial/final nodes with whatever adjacent phone it has at decode
/// time. A node's `OutStyle` (defined in `crate::lexicon`) only records
/// *which* of center/left/right it must supply to that call; the lookup
/// itself always lands on a plain [`OutputDistribution`].
///
/// Transition structure of an HMM: log self-loop/forward probabilities,
/// plus optional entry/exit epsilon arcs for multi-path topologies (phone
/// skips).
#[derive(Debug, Clone)]
pub struct Transitions {
    /// `trans[i][j]` = log P(state j | state i), for `i, j` in
    /// `0..=num_states+1` where `0` is the (non-emitting) entry state and
    /// `num_states+1` is the (non-emitting) exit state. Emitting states are
    /// `1..=num_states`.
    pub matrix: Vec<Vec<f32>>,
}

impl Transitions {
    pub fn num_states(&self) -> usize {
        self.matrix.len().saturating_sub(2)
    }

    /// Whether there is a direct entry→exit arc, i.e. this phone can be
    /// skipped entirely (spec.md §4.1 "Multi-path adjustment").
    pub fn has_skip_arc(&self) -> bool {
        let n = self.matrix.len();
        n >= 2 && !crate::logmath::is_log_zero(self.matrix[0][n - 1])
    }
}

/// A logical phone HMM: a left-to-right (possibly skip-capable) HMM over
/// `states.len()` emitting states.
#[derive(Debug, Clone)]
pub struct PhoneHmm {
    pub name: String,
    pub transitions: Transitions,
    pub states: Vec<OutputDistribution>,
    /// `true` if this model is a synthesized bi/mono-phone stand-in rather
    /// than a model estimated directly from data for this exact context.
    pub is_pseudo: bool,
}

impl PhoneHmm {
    pub fn num_states(&self) -> usize {
        self.states.len()
    }
}

/// Feature-type tag an acoustic model declares; must match the feature
/// pipeline's output exactly (spec.md §4.7 "feature type tag must exactly
/// match").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureType {
    Mfcc,
    FilterBank,
    MelSpectrum,
}

/// The acoustic model: a named set of phone HMMs plus the context-lookup
/// rules the tree lexicon uses to find cross-word triphone variants.
pub struct AcousticModel {
    pub feature_dim: usize,
    pub feature_type: FeatureType,
    pub inv_var: bool,
    pub phones: HashMap<String, PhoneHmm>,
    pub codebooks: Vec<Codebook>,
    pub short_pause_phone: Option<String>,
}

impl AcousticModel {
    pub fn get(&self, name: &str) -> Option<&PhoneHmm> {
        self.phones.get(name)
    }

    /// Resolves a logical phone for `center` in left/right context,
    /// falling back triphone → biphone → monophone. Returns
    /// `Err(MissingModel)` only when even the monophone fallback is itself
    /// pseudo (spec.md §4.1, §7 "RUNTIME_MISSING_MODEL").
    pub fn resolve_triphone(
        &self,
        center: &str,
        left: Option<&str>,
        right: Option<&str>,
    ) -> EngineResult<&PhoneHmm> {
        if let (Some(l), Some(r)) = (left, right) {
            let tri = format!("{l}-{center}+{r}");
            if let Some(hmm) = self.phones.get(&tri) {
                return Ok(hmm);
            }
        }
        if let Some(l) = left {
            let bi = format!("{l}-{center}");
            if let Some(hmm) = self.phones.get(&bi) {
                return Ok(hmm);
            }
        }
        if let Some(r) = right {
            let bi = format!("{center}+{r}");
            if let Some(hmm) = self.phones.get(&bi) {
                return Ok(hmm);
            }
        }
        let mono = self
            .phones
            .get(center)
            .ok_or_else(|| EngineError::MissingModel(center.to_string()))?;
        if mono.is_pseudo {
            warn!(phone = %center, "falling back to pseudo monophone, no defined model in any context");
            return Err(EngineError::MissingModel(center.to_string()));
        }
        Ok(mono)
    }

    /// Output log-density for a cross-word node whose context isn't (fully)
    /// fixed yet: `left`/`right` carry whichever side the search already
    /// knows, `None` on the side that depends on a word not yet chosen.
    /// When only one side is known, every phone-HMM entry recorded for
    /// that side is treated as a context-variant "set" and combined by
    /// `method` (spec.md §3 "AS_LSET/AS_RSET/AS_LRSET", §4.1 "AVG/MAX/N-BEST
    /// approximation"); when both sides are known this degenerates to the
    /// ordinary triphone lookup.
    pub fn context_variant_density(
        &self,
        center: &str,
        state_in_phone: usize,
        left: Option<&str>,
        right: Option<&str>,
        method: IwcdMethod,
        max_n: usize,
        feature: &[f32],
    ) -> f32 {
        let candidates = if let (Some(l), Some(r)) = (left, right) {
            let exact = format!("{l}-{center}+{r}");
            match self.phones.get(&exact) {
                Some(hmm) => vec![hmm],
                None => self.variants_for(center, Some(l), None),
            }
        } else {
            self.variants_for(center, left, right)
        };

        let densities: Vec<f32> = candidates
            .iter()
            .filter_map(|hmm| hmm.states.get(state_in_phone))
            .map(|dist| self.log_density(dist, feature))
            .collect();

        if densities.is_empty() {
            return self
                .resolve_triphone(center, left, right)
                .ok()
                .and_then(|hmm| hmm.states.get(state_in_phone))
                .map(|dist| self.log_density(dist, feature))
                .unwrap_or(crate::logmath::LOG_ZERO);
        }
        combine_context_variants(densities, method, max_n)
    }

    /// Every recorded phone-HMM entry consistent with whichever of
    /// `left`/`right` is fixed, excluding the bare context-independent
    /// monophone (that's the fallback, not a variant to average over).
    fn variants_for(&self, center: &str, left: Option<&str>, right: Option<&str>) -> Vec<&PhoneHmm> {
        self.phones
            .iter()
            .filter_map(|(name, hmm)| matches_variant(name, center, left, right).then_some(hmm))
            .collect()
    }

    /// Output log-density of `feature` under `dist`, dereferencing tied
    /// codebooks as needed.
    pub fn log_density(&self, dist: &OutputDistribution, feature: &[f32]) -> f32 {
        match dist {
            OutputDistribution::Mixture {
                log_weights,
                gaussians,
            } => crate::logmath::log_sum(
                log_weights
                    .iter()
                    .zip(gaussians)
                    .map(|(w, g)| w + g.log_density(feature, self.inv_var)),
            ),
            OutputDistribution::TiedMixture {
                codebook_id,
                log_weights,
            } => {
                let book = &self.codebooks[*codebook_id];
                crate::logmath::log_sum(
                    log_weights
                        .iter()
                        .zip(&book.gaussians)
                        .map(|(w, g)| w + g.log_density(feature, self.inv_var)),
                )
            }
        }
    }
}

/// Parses a resolved context name (`"l-center+r"`, `"l-center"`,
/// `"center+r"`, or bare `"center"`) and checks it against the fixed side(s)
/// of a context query, rejecting the bare context-independent form.
fn matches_variant(name: &str, center: &str, left: Option<&str>, right: Option<&str>) -> bool {
    let (l_part, rest) = match name.split_once('-') {
        Some((l, r)) => (Some(l), r),
        None => (None, name),
    };
    let (c_part, r_part) = match rest.split_once('+') {
        Some((c, r)) => (c, Some(r)),
        None => (rest, None),
    };
    if c_part != center {
        return false;
    }
    if let Some(l) = left {
        if l_part != Some(l) {
            return false;
        }
    }
    if let Some(r) = right {
        if r_part != Some(r) {
            return false;
        }
    }
    l_part.is_some() || r_part.is_some()
}

/// Folds a set of per-variant log-densities into one score, per the
/// configured context-variant approximation (spec.md §4.1).
fn combine_context_variants(mut densities: Vec<f32>, method: IwcdMethod, max_n: usize) -> f32 {
    match method {
        IwcdMethod::Max => densities.into_iter().fold(crate::logmath::LOG_ZERO, f32::max),
        IwcdMethod::Avg => {
            let n = densities.len() as f32;
            crate::logmath::log_sum(densities) - n.ln()
        }
        IwcdMethod::NBest => {
            densities.sort_by(|a, b| b.total_cmp(a));
            densities.truncate(max_n.max(1));
            let n = densities.len() as f32;
            crate::logmath::log_sum(densities) - n.ln()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logmath::LOG_ZERO;

    fn toy_mono(name: &str, pseudo: bool) -> PhoneHmm {
        let dist = OutputDistribution::Mixture {
            log_weights: vec![0.0],
            gaussians: vec![Gaussian::new(vec![0.0, 0.0], vec![1.0, 1.0])],
        };
        PhoneHmm {
            name: name.to_string(),
            transitions: Transitions {
                matrix: vec![
                    vec![LOG_ZERO, 0.0, LOG_ZERO],
                    vec![LOG_ZERO, -0.1, -2.3],
                    vec![LOG_ZERO, LOG_ZERO, LOG_ZERO],
                ],
            },
            states: vec![dist],
            is_pseudo: pseudo,
        }
    }

    fn toy_am() -> AcousticModel {
        let mut phones = HashMap::new();
        phones.insert("ah".to_string(), toy_mono("ah", false));
        phones.insert("k-ah+t".to_string(), toy_mono("k-ah+t", false));
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
    fn exact_triphone_preferred() {
        let am = toy_am();
        let hmm = am.resolve_triphone("ah", Some("k"), Some("t")).unwrap();
        assert_eq!(hmm.name, "k-ah+t");
    }

    #[test]
    fn falls_back_to_monophone() {
        let am = toy_am();
        let hmm = am.resolve_triphone("ah", Some("z"), Some("q")).unwrap();
        assert_eq!(hmm.name, "ah");
    }

    #[test]
    fn missing_pseudo_monophone_is_reported() {
        let mut am = toy_am();
        am.phones.get_mut("ah").unwrap().is_pseudo = true;
        let res = am.resolve_triphone("ah", Some("z"), Some("q"));
        assert!(matches!(res, Err(EngineError::MissingModel(_))));
    }

    #[test]
    fn gaussian_density_peaks_at_mean() {
        let g = Gaussian::new(vec![1.0, -1.0], vec![1.0, 1.0]);
        let at_mean = g.log_density(&[1.0, -1.0], false);
        let away = g.log_density(&[3.0, -1.0], false);
        assert!(at_mean > away);
    }

    fn toy_am_with_right_variants() -> AcousticModel {
        let mut phones = HashMap::new();
        phones.insert("ah".to_string(), toy_mono("ah", false));
        phones.insert("k-ah+t".to_string(), toy_mono("k-ah+t", false));
        phones.insert("k-ah+s".to_string(), toy_mono("k-ah+s", false));
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
    fn context_variant_density_degenerates_to_exact_triphone_when_both_sides_known() {
        let am = toy_am_with_right_variants();
        let feature = [1.0, -1.0];
        let exact = am.resolve_triphone("ah", Some("k"), Some("t")).unwrap().states[0].clone();
        let via_variant = am.context_variant_density("ah", 0, Some("k"), Some("t"), IwcdMethod::Avg, 3, &feature);
        let via_exact = am.log_density(&exact, &feature);
        assert!((via_variant - via_exact).abs() < 1e-6);
    }

    #[test]
    fn context_variant_density_averages_unknown_right_side() {
        let am = toy_am_with_right_variants();
        let feature = [0.5, -0.5];
        let avg = am.context_variant_density("ah", 0, Some("k"), None, IwcdMethod::Avg, 3, &feature);
        let max = am.context_variant_density("ah", 0, Some("k"), None, IwcdMethod::Max, 3, &feature);
        // Both candidates are identical distributions here, so avg == max == the single density.
        let single = am.resolve_triphone("ah", Some("k"), Some("t")).unwrap().states[0].clone();
        let single_density = am.log_density(&single, &feature);
        assert!((avg - single_density).abs() < 1e-4);
        assert!((max - single_density).abs() < 1e-4);
    }

    #[test]
    fn context_variant_density_falls_back_when_no_variant_recorded() {
        let am = toy_am();
        let feature = [0.0, 0.0];
        let score = am.context_variant_density("ah", 0, Some("z"), None, IwcdMethod::Avg, 3, &feature);
        let mono = am.get("ah").unwrap().states[0].clone();
        let expected = am.log_density(&mono, &feature);
        assert!((score - expected).abs() < 1e-6);
    }
}
