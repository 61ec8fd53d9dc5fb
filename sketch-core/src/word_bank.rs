use anyhow::{Result, anyhow};
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

use crate::{SketchError, SketchResult};

/// Number of candidate words offered to the drawer each turn.
pub const CHOICES_PER_TURN: usize = 3;

/// Deduplicated, lowercased list of drawable words.
#[derive(Debug, Clone, Default)]
pub struct WordBank {
    words: Vec<String>,
}

impl WordBank {
    /// Builds a bank from newline separated words. Blank lines and `#`
    /// comments are ignored; duplicates collapse case-insensitively.
    pub fn from_word_list(word_list: &str) -> Self {
        let mut seen = HashSet::new();
        let words = word_list
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|word| word.to_lowercase())
            .filter(|word| seen.insert(word.clone()))
            .collect();

        Self { words }
    }

    /// Loads every `.txt` file in `dir` into one bank.
    pub fn from_directory<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let mut combined = String::new();
        let mut files = 0;

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("txt") {
                continue;
            }
            combined.push_str(&std::fs::read_to_string(&path)?);
            combined.push('\n');
            files += 1;
        }

        let bank = Self::from_word_list(&combined);
        if bank.is_empty() {
            return Err(anyhow!("No words found in {}", dir.display()));
        }

        info!("Loaded {} words from {} files", bank.len(), files);
        Ok(bank)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn contains(&self, word: &str) -> bool {
        let word = word.trim().to_lowercase();
        self.words.contains(&word)
    }

    /// Offers up to [`CHOICES_PER_TURN`] distinct words drawn uniformly from
    /// the bank minus `used_words`. When fewer than that remain unused, the
    /// whole bank is the pool again and repeats become possible.
    pub fn pick_words<R: Rng + ?Sized>(
        &self,
        used_words: &[String],
        rng: &mut R,
    ) -> SketchResult<Vec<String>> {
        if self.words.is_empty() {
            return Err(SketchError::DataAbsent("word bank is empty".to_string()));
        }

        let used: HashSet<String> = used_words.iter().map(|w| w.to_lowercase()).collect();
        let mut pool: Vec<&String> = self
            .words
            .iter()
            .filter(|word| !used.contains(word.as_str()))
            .collect();

        if pool.len() < CHOICES_PER_TURN {
            warn!(
                "Only {} unused words left; falling back to the full bank of {}",
                pool.len(),
                self.words.len()
            );
            pool = self.words.iter().collect();
        }

        pool.shuffle(rng);
        Ok(pool
            .into_iter()
            .take(CHOICES_PER_TURN)
            .cloned()
            .collect())
    }
}
