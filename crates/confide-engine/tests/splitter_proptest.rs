use confide_engine::splitter::words;
use confide_engine::{ShamirScheme, ShareToken, SplitError, ThresholdScheme, MAX_SHARES};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// All n shares always rebuild the exact secret.
    #[test]
    fn split_combine_roundtrip(
        secret in prop::collection::vec(any::<u8>(), 0..300),
        n in 1..=MAX_SHARES,
    ) {
        let shares = ShamirScheme.split(&secret, n).expect("split");
        prop_assert_eq!(shares.len(), n);
        let recovered = ShamirScheme.combine(&shares).expect("combine");
        prop_assert_eq!(recovered.as_slice(), secret.as_slice());
    }

    /// Any n-1 of the n shares is refused, never partially decoded.
    #[test]
    fn one_share_short_fails(
        secret in prop::collection::vec(any::<u8>(), 0..100),
        n in 2..=MAX_SHARES,
        missing in any::<prop::sample::Index>(),
    ) {
        let mut shares = ShamirScheme.split(&secret, n).expect("split");
        shares.remove(missing.index(n));
        let err = ShamirScheme.combine(&shares).unwrap_err();
        prop_assert!(err.is_reconstruction());
        let is_insufficient = matches!(err, SplitError::InsufficientShares { .. });
        prop_assert!(is_insufficient);
    }

    /// Word encoding is exactly invertible for any byte string.
    #[test]
    fn words_roundtrip(bytes in prop::collection::vec(any::<u8>(), 0..200)) {
        let text = words::encode(&bytes);
        prop_assert_eq!(words::decode(&text).expect("decode"), bytes);
    }

    /// Shares survive the trip through their word form.
    #[test]
    fn share_words_roundtrip(
        secret in prop::collection::vec(any::<u8>(), 1..80),
        n in 1..6usize,
    ) {
        let shares = ShamirScheme.split(&secret, n).expect("split");
        let decoded: Vec<ShareToken> = shares
            .iter()
            .map(|s| ShareToken::from_words(&s.to_words()).expect("words"))
            .collect();
        prop_assert_eq!(&decoded, &shares);
        let recovered = ShamirScheme.combine(&decoded).expect("combine");
        prop_assert_eq!(recovered.as_slice(), secret.as_slice());
    }
}
