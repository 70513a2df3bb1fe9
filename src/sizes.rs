use std::cmp::Ordering;
use thiserror::Error;

/// Garment sizes from smallest to largest.
pub const DEFAULT_SIZE_RANKS: &[&str] = &["SML", "MED", "LRG", "XL", "2XL", "3XL", "4XL", "5XL"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaxonomyError {
    #[error("size taxonomy is empty")]
    Empty,
    #[error("size `{0}` is listed more than once")]
    Duplicate(String),
    #[error("size taxonomy contains a blank token")]
    Blank,
}

/// Explicit total order over a finite set of size tokens.
#[derive(Debug, Clone)]
pub struct SizeTaxonomy {
    ranks: Vec<String>,
}

impl Default for SizeTaxonomy {
    fn default() -> Self {
        Self {
            ranks: DEFAULT_SIZE_RANKS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SizeTaxonomy {
    pub fn new<I, S>(tokens: I) -> Result<Self, TaxonomyError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ranks: Vec<String> = Vec::new();
        for token in tokens {
            let token = token.into().trim().to_string();
            if token.is_empty() {
                return Err(TaxonomyError::Blank);
            }
            if ranks.iter().any(|known| known.eq_ignore_ascii_case(&token)) {
                return Err(TaxonomyError::Duplicate(token));
            }
            ranks.push(token);
        }
        if ranks.is_empty() {
            return Err(TaxonomyError::Empty);
        }
        Ok(Self { ranks })
    }

    /// 1-based rank, `None` for tokens outside the taxonomy.
    pub fn rank(&self, size: &str) -> Option<usize> {
        self.ranks
            .iter()
            .position(|known| known.eq_ignore_ascii_case(size.trim()))
            .map(|idx| idx + 1)
    }

    pub fn contains(&self, size: &str) -> bool {
        self.rank(size).is_some()
    }

    /// Known sizes by rank; unknown sizes after every known one and equal to
    /// each other, so a stable sort keeps them in arrival order.
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        match (self.rank(a), self.rank(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ranks_follow_garment_order() {
        let sizes = SizeTaxonomy::default();
        assert_eq!(sizes.rank("SML"), Some(1));
        assert_eq!(sizes.rank("XL"), Some(4));
        assert_eq!(sizes.rank("5XL"), Some(8));
        assert_eq!(sizes.rank("XXL"), None);
    }

    #[test]
    fn sort_is_not_lexicographic() {
        let sizes = SizeTaxonomy::default();
        let mut tokens = vec!["2XL", "XL", "SML", "5XL", "LRG", "MED", "3XL", "4XL"];
        tokens.sort_by(|a, b| sizes.compare(a, b));
        assert_eq!(tokens, DEFAULT_SIZE_RANKS);
    }

    #[test]
    fn unknown_sizes_trail_in_arrival_order() {
        let sizes = SizeTaxonomy::default();
        let mut tokens = vec!["OSFA", "MED", "YTH", "SML"];
        tokens.sort_by(|a, b| sizes.compare(a, b));
        assert_eq!(tokens, vec!["SML", "MED", "OSFA", "YTH"]);
    }

    #[test]
    fn rejects_bad_taxonomies() {
        assert_eq!(SizeTaxonomy::new(Vec::<String>::new()).unwrap_err(), TaxonomyError::Empty);
        assert_eq!(
            SizeTaxonomy::new(["SML", "sml"]).unwrap_err(),
            TaxonomyError::Duplicate("sml".into())
        );
        assert_eq!(SizeTaxonomy::new(["SML", " "]).unwrap_err(), TaxonomyError::Blank);
    }
}
