//! End-to-end tests through the public API: build, save, map and score.

use ngram_trie::{
    ModelConfig, NgramModel, NgramTrie, QuantType, RawNgram, Score, SharedModel, TrieError, Unigram,
    WordStrings,
};

const BOS: u32 = 0;
const THE: u32 = 1;
const CAT: u32 = 2;
const SAT: u32 = 3;
const EOS: u32 = 4;

fn words() -> WordStrings {
    ["<s>", "the", "cat", "sat", "</s>"].into_iter().collect()
}

fn unigrams() -> Vec<Unigram> {
    vec![
        Unigram::new(-99.0, -0.6),
        Unigram::new(-1.1, -0.1),
        Unigram::new(-1.2, -0.3),
        Unigram::new(-1.4, -0.2),
        Unigram::new(-0.9, 0.0),
    ]
}

fn streams() -> Vec<Vec<RawNgram>> {
    vec![
        vec![
            RawNgram::from_text_order(&[BOS, THE], -0.5, -0.25),
            RawNgram::from_text_order(&[THE, CAT], -0.3, -0.2),
            RawNgram::from_text_order(&[CAT, SAT], -0.4, -0.1),
            RawNgram::from_text_order(&[SAT, EOS], -0.2, 0.0),
        ],
        vec![RawNgram::from_text_order(&[THE, CAT, SAT], -0.15, 0.0)],
    ]
}

fn config(quant: QuantType) -> ModelConfig {
    ModelConfig {
        quant,
        ..ModelConfig::default()
    }
}

fn close(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-5
}

#[test]
fn test_bigram_hit_with_context_backoff() {
    let model = NgramModel::build(config(QuantType::NoQuant), words(), unigrams(), streams()).unwrap();
    // "<s> the cat" is not stored: P(cat | the) plus bo(<s> the).
    let s = model.score(CAT, &[THE, BOS]).unwrap();
    assert_eq!(s.n_used, 2);
    assert!(close(s.log_prob, -0.3 + -0.25));
}

#[test]
fn test_trigram_hit_uses_no_backoff() {
    let model = NgramModel::build(config(QuantType::NoQuant), words(), unigrams(), streams()).unwrap();
    let s = model.score(SAT, &[CAT, THE]).unwrap();
    assert_eq!(s, Score { log_prob: -0.15, n_used: 3 });
}

#[test]
fn test_save_then_open_scores_identically() {
    let dir = tempfile::tempdir().unwrap();
    for quant in [QuantType::NoQuant, QuantType::Quant16] {
        let path = dir.path().join(format!("{quant:?}.bin"));
        let built = NgramModel::build(config(quant), words(), unigrams(), streams()).unwrap();
        built.save(&path).unwrap();

        let mapped = NgramModel::open(&path, ModelConfig::default()).unwrap();
        let loaded = NgramModel::load(&path, ModelConfig::default()).unwrap();
        assert_eq!(mapped.trie().quant_type(), quant);
        assert_eq!(mapped.words(), &words());
        for word in 0..5 {
            for h0 in 0..5 {
                for h1 in 0..5 {
                    let want = built.score(word, &[h0, h1]);
                    assert_eq!(mapped.score(word, &[h0, h1]), want);
                    assert_eq!(loaded.score(word, &[h0, h1]), want);
                }
            }
        }

        let mut a = Vec::new();
        let mut b = Vec::new();
        built.write_to(&mut a).unwrap();
        mapped.write_to(&mut b).unwrap();
        assert_eq!(a, b);
        assert_eq!(std::fs::read(&path).unwrap(), a);
    }
}

#[test]
fn test_model_without_ngrams() {
    let unigrams = vec![Unigram::new(-1.0, -0.5), Unigram::new(-2.0, -0.5)];
    let trie = NgramTrie::build(QuantType::Quant16, &[2, 0], unigrams, vec![Vec::new()]).unwrap();
    assert_eq!(trie.score(1, &[0]), Score { log_prob: -2.0, n_used: 1 });
    assert!(trie.ngrams(2).is_empty());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.bin");
    let model = NgramModel::from_trie(trie, ["a", "b"].into_iter().collect(), ModelConfig::default());
    model.save(&path).unwrap();
    let back = NgramModel::open(&path, ModelConfig::default()).unwrap();
    assert_eq!(back.score(0, &[1]), Some(Score { log_prob: -1.0, n_used: 1 }));
}

#[test]
fn test_open_rejects_garbage() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garbage.bin");
    std::fs::write(&path, b"ARPA text, not a trie").unwrap();
    assert!(matches!(
        NgramModel::open(&path, ModelConfig::default()),
        Err(TrieError::BadHeader)
    ));
    assert!(matches!(
        NgramModel::open(dir.path().join("nope.bin"), ModelConfig::default()),
        Err(TrieError::Io(_))
    ));
}

#[test]
fn test_build_rejects_unsupported_order() {
    let err = NgramTrie::build(QuantType::NoQuant, &[5], unigrams(), Vec::new()).unwrap_err();
    assert!(matches!(err, TrieError::InvalidOrder(1)));
}

#[test]
fn test_shared_model_across_threads() {
    let model = NgramModel::build(config(QuantType::Quant16), words(), unigrams(), streams()).unwrap();
    let expected = model.score(SAT, &[CAT, THE]);
    let shared = SharedModel::new(model);
    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..1000 {
                    assert_eq!(shared.score(SAT, &[CAT, THE]), expected);
                }
            });
        }
    });
}
