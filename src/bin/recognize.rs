//! Offline recognition of a WAV file against a loaded acoustic model,
//! dictionary, and language model (spec.md §6 "EXTERNAL INTERFACES",
//! offline recognition entry point).
use clap::Parser;
use julius_rs::am::binhmm::read_binhmm;
use julius_rs::audio::wavfile::WavFileInput;
use julius_rs::config::EngineConfig;
use julius_rs::error::Status;
use julius_rs::lm::dictionary::WordInfo;
use julius_rs::lm::grammar::{Dfa, GrammarSet};
use julius_rs::lm::ngram::Ngram;
use julius_rs::lm::LmKind;
use julius_rs::Engine;
use std::fs::File;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
pub struct Args {
    /// TOML engine configuration; defaults are used for anything it omits.
    #[clap(long)]
    config: Option<PathBuf>,
    /// Binary-format acoustic model (see `julius_rs::am::binhmm`).
    #[clap(long)]
    hmmdefs: PathBuf,
    /// Flat pronunciation dictionary.
    #[clap(long)]
    dict: PathBuf,
    /// Forward-direction ARPA N-gram, for first-pass bigram factoring.
    #[clap(long)]
    forward_arpa: Option<PathBuf>,
    /// Backward-direction (reverse-trained) ARPA N-gram, for second-pass
    /// full-order rescoring. Required alongside `forward_arpa`.
    #[clap(long)]
    backward_arpa: Option<PathBuf>,
    /// Finite-state grammar, as an alternative to an N-gram model.
    #[clap(long, conflicts_with_all = ["forward_arpa", "backward_arpa"])]
    grammar_fa: Option<PathBuf>,
    /// WAV file(s) to recognize, one utterance per file.
    #[clap(required = true)]
    wav: Vec<PathBuf>,
}

fn load_lm(args: &Args, dict: &WordInfo) -> anyhow::Result<LmKind> {
    let resolve = |surface: &str| dict.by_surface(surface).first().copied().unwrap_or(u32::MAX);
    if let Some(fa_path) = &args.grammar_fa {
        // Category->word terminal info normally comes from a paired
        // `.dict` file; this binary takes the FA topology alone and
        // relies on every dictionary entry's own pronunciation already
        // matching some category's arcs, so grammar-constrained recognition
        // from the CLI currently covers FA topology only, not per-category
        // vocabulary restriction.
        let dfa = Dfa::read_fa(File::open(fa_path)?, false)?;
        let mut set = GrammarSet::default();
        set.add(dfa);
        return Ok(LmKind::Grammar(set));
    }
    let (fwd, bwd) = match (&args.forward_arpa, &args.backward_arpa) {
        (Some(f), Some(b)) => (f, b),
        _ => anyhow::bail!("either --grammar-fa or both --forward-arpa and --backward-arpa must be given"),
    };
    let ngram = Ngram::read_arpa_pair(File::open(fwd)?, File::open(bwd)?, resolve)?;
    Ok(LmKind::Ngram(ngram))
}

fn main() -> anyhow::Result<()> {
    julius_rs::setup_logging();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::load_toml(path)?,
        None => EngineConfig::default(),
    };

    info!("loading acoustic model");
    let mut hmm_file = File::open(&args.hmmdefs)?;
    let am = read_binhmm(&mut hmm_file)?;

    info!("loading dictionary");
    let dict = WordInfo::open(&args.dict)?;

    info!("loading language model");
    let lm = load_lm(&args, &dict)?;

    let mut engine = Engine::new(config, am, dict, lm)?;

    for wav_path in &args.wav {
        let mut input = WavFileInput::open(wav_path)?;
        // Each call consumes audio up to end-of-file or a segmenter cut; an
        // empty-trellis result (`RejectSilenceOnly`) only happens once the
        // file is fully drained, since any unread audio gives the first
        // pass at least one frame to work with.
        loop {
            let result = engine.recognize_utterance(&mut input)?;
            print_result(wav_path, &result);
            if result.status == Status::RejectSilenceOnly {
                break;
            }
        }
    }
    engine.save_cmn()?;
    Ok(())
}

fn print_result(wav_path: &std::path::Path, result: &julius_rs::UtteranceResult) {
    println!("### {} [{:?}]", wav_path.display(), result.status);
    for (rank, hyp) in result.nbest.iter().enumerate() {
        let words: Vec<String> = hyp.words.iter().map(|w| w.to_string()).collect();
        println!("{rank}: {} (score={:.2})", words.join(" "), hyp.score);
    }
}
