use crate::models::{CatalogItem, ItemId};
use ndarray::Array2;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "about", "above", "across", "after", "afterwards", "again", "against", "all",
        "almost", "alone", "along", "already", "also", "although", "always", "am", "among",
        "amongst", "an", "and", "another", "any", "anyhow", "anyone", "anything", "anyway",
        "anywhere", "are", "around", "as", "at", "be", "became", "because", "become", "becomes",
        "becoming", "been", "before", "beforehand", "behind", "being", "below", "beside",
        "besides", "between", "beyond", "both", "but", "by", "can", "cannot", "could", "do",
        "done", "down", "due", "during", "each", "eg", "either", "else", "elsewhere", "enough",
        "etc", "even", "ever", "every", "everyone", "everything", "everywhere", "except", "few",
        "for", "former", "formerly", "from", "further", "had", "has", "have", "he", "hence",
        "her", "here", "hereafter", "hereby", "herein", "hers", "herself", "him", "himself",
        "his", "how", "however", "ie", "if", "in", "indeed", "into", "is", "it", "its",
        "itself", "just", "last", "latter", "least", "less", "ltd", "made", "many", "may", "me",
        "meanwhile", "might", "more", "moreover", "most", "mostly", "much", "must", "my",
        "myself", "namely", "neither", "never", "nevertheless", "next", "no", "nobody", "none",
        "nor", "not", "nothing", "now", "nowhere", "of", "off", "often", "on", "once", "one",
        "only", "onto", "or", "other", "others", "otherwise", "our", "ours", "ourselves", "out",
        "over", "own", "per", "perhaps", "please", "rather", "re", "same", "seem", "seemed",
        "seeming", "seems", "several", "she", "should", "since", "so", "some", "somehow",
        "someone", "something", "sometime", "sometimes", "somewhere", "still", "such", "than",
        "that", "the", "their", "them", "themselves", "then", "thence", "there", "thereafter",
        "thereby", "therefore", "therein", "thereupon", "these", "they", "this", "those",
        "though", "through", "throughout", "thru", "thus", "to", "together", "too", "toward",
        "towards", "under", "until", "up", "upon", "us", "very", "via", "was", "we", "well",
        "were", "what", "whatever", "when", "whence", "whenever", "where", "whereafter",
        "whereas", "whereby", "wherein", "whereupon", "wherever", "whether", "which", "while",
        "whither", "who", "whoever", "whole", "whom", "whose", "why", "will", "with", "within",
        "without", "would", "yet", "you", "your", "yours", "yourself", "yourselves",
    ]
    .into_iter()
    .collect()
});

/// TF-IDF vectors for the item catalog, one row per item (ascending id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFeatures {
    pub item_ids: Vec<ItemId>,
    pub vocabulary: Vec<String>,
    pub matrix: Array2<f64>,
}

impl ItemFeatures {
    pub fn empty() -> Self {
        Self {
            item_ids: Vec::new(),
            vocabulary: Vec::new(),
            matrix: Array2::zeros((0, 0)),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let (rows, cols) = self.matrix.dim();
        if rows != self.item_ids.len() || cols != self.vocabulary.len() {
            return Err(format!(
                "item features are {}x{} for {} items and {} terms",
                rows,
                cols,
                self.item_ids.len(),
                self.vocabulary.len()
            ));
        }
        Ok(())
    }
}

/// Lowercases, keeps runs of two or more alphanumeric characters and drops
/// English stop-words.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() >= 2 && !STOP_WORDS.contains(token))
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone)]
pub struct TfidfVectorizer {
    max_features: usize,
}

impl TfidfVectorizer {
    pub fn new(max_features: usize) -> Self {
        Self { max_features }
    }

    /// Fit on `catalog` (assumed sorted by id) and return its vectors.
    ///
    /// The vocabulary keeps the `max_features` most frequent terms across the
    /// corpus. Weights are raw term counts times the smoothed idf
    /// `ln((1 + n) / (1 + df)) + 1`, rows L2-normalised.
    pub fn fit_transform(&self, catalog: &[CatalogItem]) -> ItemFeatures {
        let documents: Vec<Vec<String>> = catalog.iter().map(|item| tokenize(&item.corpus())).collect();

        let mut term_frequency: HashMap<&str, usize> = HashMap::new();
        let mut document_frequency: HashMap<&str, usize> = HashMap::new();
        for tokens in &documents {
            let mut seen: HashSet<&str> = HashSet::new();
            for token in tokens {
                *term_frequency.entry(token.as_str()).or_insert(0) += 1;
                if seen.insert(token.as_str()) {
                    *document_frequency.entry(token.as_str()).or_insert(0) += 1;
                }
            }
        }

        let mut ranked: Vec<(&str, usize)> = term_frequency.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked.truncate(self.max_features);

        // Columns in lexical order
        let mut vocabulary: Vec<String> = ranked.iter().map(|(term, _)| term.to_string()).collect();
        vocabulary.sort();
        let column_of: HashMap<&str, usize> = vocabulary
            .iter()
            .enumerate()
            .map(|(i, t)| (t.as_str(), i))
            .collect();

        let n_docs = documents.len() as f64;
        let idf: Vec<f64> = vocabulary
            .iter()
            .map(|term| {
                let df = document_frequency.get(term.as_str()).copied().unwrap_or(0) as f64;
                ((1.0 + n_docs) / (1.0 + df)).ln() + 1.0
            })
            .collect();

        let mut matrix = Array2::<f64>::zeros((documents.len(), vocabulary.len()));
        for (row, tokens) in documents.iter().enumerate() {
            for token in tokens {
                if let Some(&col) = column_of.get(token.as_str()) {
                    matrix[[row, col]] += 1.0;
                }
            }
            let mut row_view = matrix.row_mut(row);
            for (col, value) in row_view.iter_mut().enumerate() {
                *value *= idf[col];
            }
            let norm = row_view.dot(&row_view).sqrt();
            if norm > 0.0 {
                row_view.mapv_inplace(|v| v / norm);
            }
        }

        ItemFeatures {
            item_ids: catalog.iter().map(|item| item.id).collect(),
            vocabulary,
            matrix,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: ItemId, title: &str, description: &str) -> CatalogItem {
        CatalogItem {
            id,
            title: title.to_string(),
            description: description.to_string(),
            category: String::new(),
            department_id: None,
            enrollment_count: 0,
            completion_rate: 0.0,
            module_count: 0,
            quiz_count: 0,
            assignment_count: 0,
        }
    }

    #[test]
    fn test_tokenize_drops_stop_words_and_short_tokens() {
        let tokens = tokenize("An Introduction to Rust: a 2nd look at I/O and x");
        assert_eq!(tokens, vec!["introduction", "rust", "2nd", "look"]);
    }

    #[test]
    fn test_rows_are_l2_normalised() {
        let catalog = vec![
            item(1, "Rust programming", "systems programming"),
            item(2, "Python programming", "data science"),
            item(3, "Data science", "statistics"),
        ];
        let features = TfidfVectorizer::new(1000).fit_transform(&catalog);
        assert!(features.validate().is_ok());
        for row in features.matrix.rows() {
            let norm = row.dot(&row).sqrt();
            assert!((norm - 1.0).abs() < 1e-9);
        }
        // Vocabulary is lexically ordered
        let mut sorted = features.vocabulary.clone();
        sorted.sort();
        assert_eq!(sorted, features.vocabulary);
    }

    #[test]
    fn test_max_features_keeps_most_frequent_terms() {
        let catalog = vec![
            item(1, "rust rust rust", "async"),
            item(2, "rust", "tokio tokio"),
        ];
        let features = TfidfVectorizer::new(2).fit_transform(&catalog);
        assert_eq!(features.vocabulary, vec!["rust", "tokio"]);
        assert_eq!(features.matrix.dim(), (2, 2));
    }

    #[test]
    fn test_rare_terms_weigh_more() {
        let catalog = vec![item(1, "common rare", ""), item(2, "common", "")];
        let features = TfidfVectorizer::new(10).fit_transform(&catalog);
        let common = features.vocabulary.iter().position(|t| t == "common").unwrap();
        let rare = features.vocabulary.iter().position(|t| t == "rare").unwrap();
        assert!(features.matrix[[0, rare]] > features.matrix[[0, common]]);
    }
}
