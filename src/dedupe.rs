use std::collections::HashSet;

use crate::model::Candidate;

/// Drop candidates whose identity is already known locally.
///
/// Duplicates inside `candidates` collapse to their first occurrence before
/// the known set is applied; relative order is preserved. `known` is usually
/// a most-recent-N window, so anything older than that window comes back as
/// unseen and is overwritten on persistence.
pub fn filter_unseen(known: &HashSet<String>, candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut seen = HashSet::with_capacity(candidates.len());
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.identity.clone()))
        .filter(|c| !known.contains(&c.identity))
        .collect()
}
