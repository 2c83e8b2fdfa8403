use bpetok::{
    Bpe, Dropout, MergeMap, Normalizer, Pair, PairVal, Pattern, Rank, TokenId, Tokenizer, Vocab,
    Word,
};
use proptest::prelude::*;

const ALPHABET: TokenId = 4;

/// Merge table whose `i`-th rule produces id `ALPHABET + i`.
fn merge_map(rules: &[(TokenId, TokenId)]) -> MergeMap {
    let mut merges = MergeMap::default();
    for (rank, &(left, right)) in rules.iter().enumerate() {
        merges.entry(Pair(left, right)).or_insert(PairVal {
            rank: rank as Rank,
            new_id: ALPHABET + rank as TokenId,
        });
    }
    merges
}

fn word(ids: &[TokenId], byte_lens: &[usize]) -> Word {
    let mut word = Word::new();
    for (&id, &len) in ids.iter().zip(byte_lens.iter().cycle()) {
        word.add(id, len);
    }
    word
}

fn rules() -> impl Strategy<Value = Vec<(TokenId, TokenId)>> {
    prop::collection::vec((0..ALPHABET + 8, 0..ALPHABET + 8), 0..12)
}

fn symbols() -> impl Strategy<Value = Vec<TokenId>> {
    prop::collection::vec(0..ALPHABET, 0..40)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_offsets_tile_the_input(
        ids in symbols(),
        byte_lens in prop::collection::vec(1usize..5, 1..4),
        rules in rules(),
    ) {
        let mut w = word(&ids, &byte_lens);
        let total: usize = w.symbols().iter().map(|s| s.byte_len).sum();
        w.merge_all(&merge_map(&rules), None);

        let offsets = w.offsets();
        let mut cursor = 0;
        for (start, end) in &offsets {
            prop_assert_eq!(*start, cursor);
            prop_assert!(end > start);
            cursor = *end;
        }
        prop_assert_eq!(cursor, total);
        prop_assert_eq!(offsets.len(), w.len());
    }

    #[test]
    fn prop_merge_all_is_deterministic(ids in symbols(), rules in rules()) {
        let merges = merge_map(&rules);
        let mut first = word(&ids, &[1]);
        let mut second = word(&ids, &[1]);
        first.merge_all(&merges, None);
        second.merge_all(&merges, None);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_merge_all_is_idempotent(ids in symbols(), rules in rules()) {
        let merges = merge_map(&rules);
        let mut w = word(&ids, &[1]);
        w.merge_all(&merges, None);
        let once = w.clone();
        w.merge_all(&merges, None);
        prop_assert_eq!(w, once);
    }

    #[test]
    fn prop_links_follow_array_order(ids in symbols(), rules in rules()) {
        let mut w = word(&ids, &[2]);
        w.merge_all(&merge_map(&rules), None);
        for (i, symbol) in w.symbols().iter().enumerate() {
            prop_assert_eq!(symbol.prev, i.checked_sub(1));
            prop_assert_eq!(symbol.next, (i + 1 < w.len()).then_some(i + 1));
        }
    }

    #[test]
    fn prop_seeded_dropout_is_reproducible(
        ids in symbols(),
        rules in rules(),
        p in 0.0f32..0.95,
        seed in any::<u64>(),
    ) {
        let merges = merge_map(&rules);
        let dropout = Dropout::new(p).expect("p is in range").with_seed(seed);
        let mut first = word(&ids, &[1]);
        let mut second = word(&ids, &[1]);
        first.merge_all(&merges, Some(&dropout));
        second.merge_all(&merges, Some(&dropout));
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_bpe_offsets_cover_code_points(text in "[aböü老😀]{0,24}") {
        let vocab: Vocab = ["a", "b", "ö", "ü", "老", "😀", "ab", "öü", "老😀"]
            .iter()
            .enumerate()
            .map(|(id, t)| ((*t).to_owned(), id as TokenId))
            .collect();
        let merges = [("a", "b"), ("ö", "ü"), ("老", "😀")]
            .iter()
            .map(|(l, r)| ((*l).to_owned(), (*r).to_owned()))
            .collect();
        let bpe = Bpe::new(vocab, merges).expect("model should build");

        let tokens = bpe.tokenize(&text).expect("every char is in the vocabulary");
        let mut cursor = 0;
        let mut rebuilt = String::new();
        for token in &tokens {
            prop_assert_eq!(token.offsets.0, cursor);
            cursor = token.offsets.1;
            rebuilt.push_str(&token.value);
        }
        prop_assert_eq!(cursor, text.chars().count());
        prop_assert_eq!(rebuilt, text);
    }

    #[test]
    fn prop_normalized_offsets_stay_in_input(text in "[ab ]{0,20}") {
        let vocab: Vocab = ["a", "b", "▁", "▁a"]
            .iter()
            .enumerate()
            .map(|(id, t)| ((*t).to_owned(), id as TokenId))
            .collect();
        let bpe = Bpe::new(vocab, vec![("▁".to_owned(), "a".to_owned())])
            .expect("model should build");
        let tokenizer = Tokenizer::new(bpe).with_normalizer(Normalizer::Sequence(vec![
            Normalizer::Strip { left: true, right: true },
            Normalizer::Replace { pattern: Pattern::literal(" "), content: "▁".to_owned() },
            Normalizer::Prepend("▁".to_owned()),
        ]));

        let encoding = tokenizer.encode(&text).expect("every char is in the vocabulary");
        let len = text.chars().count();
        let mut previous = 0;
        for &(start, end) in encoding.get_offsets() {
            prop_assert!(start <= end && end <= len);
            prop_assert!(start >= previous);
            previous = start;
        }
    }
}
