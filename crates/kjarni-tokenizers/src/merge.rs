//! The rank-driven BPE merge loop shared by both BPE variants.

/// Repeatedly merges the adjacent pair with the lowest rank over the whole
/// symbol sequence until no ranked pair remains or one symbol is left.
///
/// Every non-overlapping occurrence of the winning pair is merged in a single
/// left-to-right pass. Ties between equal ranks go to the leftmost pair.
pub(crate) fn merge_symbols<F>(mut symbols: Vec<String>, rank: F) -> Vec<String>
where
    F: Fn(&str, &str) -> Option<u32>,
{
    while symbols.len() > 1 {
        let best = symbols
            .windows(2)
            .enumerate()
            .filter_map(|(i, pair)| rank(&pair[0], &pair[1]).map(|r| (r, i)))
            .min();

        let Some((_, idx)) = best else {
            break;
        };

        let left = symbols[idx].clone();
        let right = symbols[idx + 1].clone();
        let mut merged = Vec::with_capacity(symbols.len() - 1);
        let mut i = 0;
        while i < symbols.len() {
            if i + 1 < symbols.len() && symbols[i] == left && symbols[i + 1] == right {
                let mut joined = String::with_capacity(left.len() + right.len());
                joined.push_str(&left);
                joined.push_str(&right);
                merged.push(joined);
                i += 2;
            } else {
                merged.push(std::mem::take(&mut symbols[i]));
                i += 1;
            }
        }
        symbols = merged;
    }
    symbols
}
