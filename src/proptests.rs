use super::*;

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::bits::{read_nonpositive_float31, write_nonpositive_float31, SIGN_BIT};
use crate::fixtures;
use crate::quant::Bins;

/// Map-backed backoff model that scores by direct key lookup.
struct Reference {
    order: usize,
    unigrams: Vec<Unigram>,
    /// Trie-order words (most recent first) -> (prob, backoff)
    grams: BTreeMap<Vec<WordId>, (f32, f32)>,
    /// Every key that has at least one longer extension.
    parents: HashSet<Vec<WordId>>,
}

impl Reference {
    fn new(order: usize, unigrams: Vec<Unigram>, streams: &[Vec<RawNgram>]) -> Self {
        let mut grams = BTreeMap::new();
        let mut parents = HashSet::new();
        for gram in streams.iter().flatten() {
            let words = gram.words.to_vec();
            parents.insert(words[..words.len() - 1].to_vec());
            grams.insert(words, (gram.prob, gram.backoff));
        }
        Self {
            order,
            unigrams,
            grams,
            parents,
        }
    }

    fn score(&self, word: WordId, history: &[WordId]) -> Score {
        let history = &history[..history.len().min(self.order - 1)];
        let mut prob = self.unigrams[word as usize].prob;
        if history.is_empty() || !self.parents.contains(&vec![word]) {
            return Score { log_prob: prob, n_used: 1 };
        }

        let mut n_used = 1;
        let mut key = vec![word];
        for &h in history {
            if !self.parents.contains(&key) {
                break;
            }
            key.push(h);
            match self.grams.get(&key) {
                Some(&(p, _)) => {
                    prob = p;
                    n_used = key.len();
                }
                None => break,
            }
        }
        if history.len() < n_used {
            return Score { log_prob: prob, n_used };
        }

        let mut backoff = 0.0f32;
        let mut start = n_used;
        if start <= 1 {
            backoff += self.unigrams[history[0] as usize].backoff;
            start = 2;
        }
        for end in start..=history.len() {
            match self.grams.get(&history[..end]) {
                Some(&(_, b)) => backoff += b,
                None => break,
            }
        }
        Score {
            log_prob: prob + backoff,
            n_used,
        }
    }
}

/// Structural invariants of a built or loaded trie.
fn validate_trie(trie: &NgramTrie) {
    let counts = trie.counts();
    assert!(
        trie.unigrams.windows(2).all(|w| w[0].next <= w[1].next),
        "unigram child starts must be non-decreasing"
    );
    assert_eq!(trie.unigrams[counts[0] as usize].next, counts[1]);

    let block = trie.block();
    for (i, middle) in trie.layout.middles.iter().enumerate() {
        let table = middle.base.bytes(block);
        let mut prev = 0;
        for index in 0..=counts[i + 1] {
            let next = middle.next_at(table, index);
            assert!(next >= prev, "order {} next pointers must be non-decreasing", i + 2);
            prev = next;
        }
        assert_eq!(prev, counts[i + 2], "last child range must close its table");
    }

    // Children of one context are strictly increasing by word.
    for w in 0..counts[0] as WordId {
        let range = trie.unigram_range(w);
        let table = if trie.order() == 2 {
            &trie.layout.longest.base
        } else {
            &trie.layout.middles[0].base
        };
        let bytes = table.bytes(block);
        for index in range.begin + 1..range.end {
            assert!(table.word_at(bytes, index - 1) < table.word_at(bytes, index));
        }
    }
}

fn random_model(
    order: usize,
    vocab: usize,
    seqs: &[Vec<WordId>],
    seed: u64,
) -> (Vec<u64>, Vec<Unigram>, Vec<Vec<RawNgram>>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let unigrams: Vec<Unigram> = (0..vocab)
        .map(|_| Unigram::new(rng.gen_range(-6.0..-0.01), rng.gen_range(-1.5..0.5)))
        .collect();

    // Every contiguous slice, so each n-gram's context is present.
    let mut keys = BTreeSet::new();
    for seq in seqs {
        for start in 0..seq.len() {
            for end in start + 2..=seq.len() {
                keys.insert(seq[start..end].to_vec());
            }
        }
    }

    let mut streams: Vec<Vec<RawNgram>> = vec![Vec::new(); order - 1];
    for key in keys {
        let k = key.len();
        let prob = rng.gen_range(-5.0..-0.01);
        let backoff = if k < order { rng.gen_range(-1.5..0.5) } else { 0.0 };
        streams[k - 2].push(RawNgram::new(&key, prob, backoff));
    }
    let counts = std::iter::once(vocab as u64)
        .chain(streams.iter().map(|s| s.len() as u64))
        .collect();
    (counts, unigrams, streams)
}

type ModelInput = (usize, usize, Vec<Vec<WordId>>, u64, Vec<(WordId, Vec<WordId>)>);

fn model_strategy() -> impl Strategy<Value = ModelInput> {
    (2..=MAX_ORDER, 2usize..=12).prop_flat_map(|(order, vocab)| {
        let word = 0..vocab as WordId;
        (
            Just(order),
            Just(vocab),
            prop::collection::vec(prop::collection::vec(word.clone(), 2..=order), 0..=60),
            any::<u64>(),
            prop::collection::vec(
                (word.clone(), prop::collection::vec(word, 0..=order)),
                1..=64,
            ),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 10_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_score_matches_reference((order, vocab, seqs, seed, queries) in model_strategy()) {
        let (counts, unigrams, streams) = random_model(order, vocab, &seqs, seed);
        let reference = Reference::new(order, unigrams.clone(), &streams);
        let trie = NgramTrie::build(QuantType::NoQuant, &counts, unigrams, streams).unwrap();
        validate_trie(&trie);

        for (word, history) in &queries {
            prop_assert_eq!(trie.score(*word, history), reference.score(*word, history));
        }
    }

    #[test]
    fn prop_dump_returns_input((order, vocab, seqs, seed, _q) in model_strategy()) {
        let (counts, unigrams, streams) = random_model(order, vocab, &seqs, seed);
        let trie = NgramTrie::build(QuantType::NoQuant, &counts, unigrams, streams.clone()).unwrap();
        prop_assert_eq!(trie.counts(), counts.as_slice());
        for (i, stream) in streams.iter().enumerate() {
            let k = i + 2;
            let got = trie.ngrams(k);
            prop_assert_eq!(got.len(), stream.len());
            for (g, want) in got.iter().zip(stream) {
                prop_assert_eq!(&g.words, &want.words);
                prop_assert_eq!(g.prob, want.prob);
                if k < order {
                    prop_assert_eq!(g.backoff, want.backoff);
                }
            }
        }
    }

    #[test]
    fn prop_quant16_keeps_structure((order, vocab, seqs, seed, queries) in model_strategy()) {
        let (counts, unigrams, streams) = random_model(order, vocab, &seqs, seed);
        let plain = NgramTrie::build(QuantType::NoQuant, &counts, unigrams.clone(), streams.clone()).unwrap();
        let quant = NgramTrie::build(QuantType::Quant16, &counts, unigrams, streams).unwrap();
        validate_trie(&quant);

        for (word, history) in &queries {
            let s = quant.score(*word, history);
            prop_assert_eq!(s.n_used, plain.score(*word, history).n_used);
            prop_assert!(s.log_prob.is_finite());
        }
        for k in 2..=order {
            for gram in quant.ngrams(k) {
                prop_assert!(gram.prob <= 0.0 && gram.prob.is_finite());
            }
        }
    }

    #[test]
    fn prop_save_load_identical((order, vocab, seqs, seed, queries) in model_strategy(), quant16 in any::<bool>()) {
        let (counts, unigrams, streams) = random_model(order, vocab, &seqs, seed);
        let kind = if quant16 { QuantType::Quant16 } else { QuantType::NoQuant };
        let trie = NgramTrie::build(kind, &counts, unigrams, streams).unwrap();
        let words: WordStrings = (0..vocab).map(|i| format!("w{i}")).collect::<Vec<_>>().into();

        let mut bytes = Vec::new();
        io::write_model(&trie, &words, &mut bytes).unwrap();
        let (loaded, loaded_words) = io::read_model(&mut bytes.as_slice()).unwrap();
        prop_assert_eq!(&loaded_words, &words);
        validate_trie(&loaded);

        let mut again = Vec::new();
        io::write_model(&loaded, &loaded_words, &mut again).unwrap();
        prop_assert_eq!(&bytes, &again);
        for (word, history) in &queries {
            prop_assert_eq!(loaded.score(*word, history), trie.score(*word, history));
        }
    }
}

proptest! {
    #[test]
    fn prop_encode_picks_nearest_center(
        bits in 1u8..=8,
        mut values in prop::collection::vec(-20.0f32..=0.0, 1..300),
        queries in prop::collection::vec(-25.0f32..=0.0, 1..64),
    ) {
        let mut bins = Bins::zeroed(bits);
        bins.train(&mut values);
        let centers = bins.centers();
        prop_assert!(centers.windows(2).all(|w| w[0] <= w[1]), "centers out of order: {:?}", centers);

        // Midpoints of neighbouring centers are the likeliest ties.
        let midpoints = centers
            .windows(2)
            .filter(|w| w[0].is_finite())
            .map(|w| (w[0] + w[1]) / 2.0);
        for x in queries.iter().copied().chain(values.iter().copied()).chain(midpoints) {
            let chosen = bins.decode(bins.encode(x));
            let best = (x - chosen).abs();
            for &c in centers {
                let d = (x - c).abs();
                prop_assert!(d >= best, "{} encoded as {} but {} is closer", x, chosen, c);
                if d == best {
                    prop_assert!(c >= chosen, "tie at {} should go to {} not {}", x, c, chosen);
                }
            }
        }
    }

    #[test]
    fn prop_float31_keeps_every_nonpositive_bit(raw in any::<u32>(), offset in 0u64..64) {
        let value = f32::from_bits(raw | SIGN_BIT);
        let mut buf = [0u8; 16];
        write_nonpositive_float31(&mut buf, offset, value);
        prop_assert_eq!(read_nonpositive_float31(&buf, offset).to_bits(), raw | SIGN_BIT);
    }
}

#[test]
fn exhaustive_fixture_queries() {
    let reference = Reference::new(3, fixtures::unigrams(), &fixtures::streams());
    let trie = fixtures::trie(QuantType::NoQuant);
    validate_trie(&trie);
    for word in 0..5 {
        for h0 in 0..5 {
            assert_eq!(trie.score(word, &[h0]), reference.score(word, &[h0]));
            for h1 in 0..5 {
                assert_eq!(
                    trie.score(word, &[h0, h1]),
                    reference.score(word, &[h0, h1]),
                    "word {word} history [{h0}, {h1}]"
                );
            }
        }
    }
}

#[test]
fn exhaustive_pruned_contexts() {
    let unigrams = vec![
        Unigram::new(-1.0, -0.5),
        Unigram::new(-1.5, -0.25),
        Unigram::new(-2.0, -0.75),
        Unigram::new(-2.5, -0.125),
    ];
    let contexts = [vec![0, 1], vec![1, 2]];
    let trigrams = vec![
        RawNgram::new(&[0, 1, 2], -0.5, 0.0),
        RawNgram::new(&[0, 1, 3], -0.75, 0.0),
        RawNgram::new(&[1, 2, 3], -0.25, 0.0),
    ];

    // Drop every subset of the bigram contexts.
    for mask in 0..4u32 {
        let mut bigrams: Vec<RawNgram> = contexts
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) == 0)
            .map(|(_, words)| RawNgram::new(words, -0.5, -0.5))
            .collect();
        bigrams.push(RawNgram::new(&[2, 3], -0.5, -0.5));
        sort_ngrams(2, &mut bigrams);

        let counts = [4, bigrams.len() as u64, 3];
        let trie = NgramTrie::build(QuantType::NoQuant, &counts, unigrams.clone(), vec![bigrams, trigrams.clone()])
            .unwrap();
        validate_trie(&trie);
        assert_eq!(trie.counts(), &[4, 3, 3], "mask {mask}");

        for gram in &trigrams {
            let s = trie.score(gram.words[0], &gram.words[1..]);
            assert_eq!(s, Score { log_prob: gram.prob, n_used: 3 }, "mask {mask}");
        }
        if mask & 1 != 0 {
            // Blank "1 0" scores as the backed-off estimate.
            let s = trie.score(0, &[1]);
            assert_eq!(s, Score { log_prob: -1.0 + -0.25, n_used: 2 });
        }
    }
}
