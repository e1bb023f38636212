use strsim::jaro_winkler;

/// Fuzzy matcher for column names typed in structured comments
pub struct FuzzyMatcher {
    /// Similarity threshold (0.0-1.0) for offering a suggestion
    pub similarity_threshold: f64,
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
        }
    }
}

impl FuzzyMatcher {
    /// Normalize a column name for comparison
    /// - Upper-cases
    /// - Treats spaces, hyphens and underscores alike
    /// - Drops a trailing plural `S`
    pub fn normalize_string(&self, s: &str) -> String {
        let upper: String = s
            .trim()
            .to_uppercase()
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect();
        match upper.strip_suffix('S') {
            Some(stem) if stem.len() > 2 => stem.to_string(),
            _ => upper,
        }
    }

    /// Returns a score between 0.0 and 1.0 (higher = more similar)
    pub fn similarity(&self, s1: &str, s2: &str) -> f64 {
        let norm1 = self.normalize_string(s1);
        let norm2 = self.normalize_string(s2);

        let jw_score = jaro_winkler(&norm1, &norm2);

        // "STATUS" vs "CONTRACT_STATUS"
        let is_substring = !norm1.is_empty()
            && !norm2.is_empty()
            && (norm1.contains(&norm2) || norm2.contains(&norm1));
        let substring_bonus = if is_substring {
            let len_diff = (norm1.len() as f64 - norm2.len() as f64).abs();
            let max_len = norm1.len().max(norm2.len()) as f64;
            (1.0 - (len_diff / max_len)) * 0.1
        } else {
            0.0
        };

        (jw_score + substring_bonus).min(1.0)
    }

    /// Best candidate above the threshold. Ties keep the first candidate, so
    /// callers should pass candidates in a stable order.
    pub fn find_best_match<'a, I>(&self, target: &str, candidates: I) -> Option<(String, f64)>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut best_match: Option<(String, f64)> = None;
        for candidate in candidates {
            let score = self.similarity(target, candidate);
            if score < self.similarity_threshold {
                continue;
            }
            if best_match.as_ref().map_or(true, |(_, best)| score > *best) {
                best_match = Some((candidate.to_string(), score));
            }
        }
        best_match
    }
}
