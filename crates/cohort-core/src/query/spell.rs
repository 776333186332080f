//! Lexicon-based spell correction
//!
//! Corrects query tokens against the word lexicon derived from catalog text.
//! Tokens of length >= 4 with no exact lexicon hit are replaced by the
//! closest lexicon word within edit distance 2. Ties resolve to the
//! lexicographically smallest candidate so correction is deterministic.

use std::collections::HashSet;

/// Minimum token length eligible for correction
const MIN_TOKEN_LEN: usize = 4;

/// Maximum edit distance accepted as a correction
const MAX_EDIT_DISTANCE: usize = 2;

/// Correct a single token. Returns `None` when the token is already valid,
/// too short, or has no close lexicon neighbor.
pub fn correct(token: &str, lexicon: &HashSet<String>) -> Option<String> {
    if token.len() < MIN_TOKEN_LEN || lexicon.contains(token) {
        return None;
    }

    let mut best: Option<(usize, &str)> = None;
    for word in lexicon {
        // Length difference is a lower bound on edit distance
        if word.len().abs_diff(token.len()) > MAX_EDIT_DISTANCE {
            continue;
        }
        let distance = strsim::levenshtein(token, word);
        if distance > MAX_EDIT_DISTANCE {
            continue;
        }
        best = match best {
            None => Some((distance, word)),
            Some((d, w)) if distance < d || (distance == d && word.as_str() < w) => {
                Some((distance, word))
            }
            keep => keep,
        };
    }

    best.map(|(_, word)| word.to_string())
}

/// Correct every token in place, returning how many were rewritten.
pub fn correct_tokens(tokens: &mut [String], lexicon: &HashSet<String>) -> usize {
    let mut corrected = 0;
    for token in tokens.iter_mut() {
        if let Some(fixed) = correct(token, lexicon) {
            *token = fixed;
            corrected += 1;
        }
    }
    corrected
}

// ============================================================================
// TESTS
// ============================================================================
