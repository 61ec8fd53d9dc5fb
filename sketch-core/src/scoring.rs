use chrono::{DateTime, Utc};

/// Points for a correct guess in each quarter of the drawing phase.
pub const QUARTER_POINTS: [u32; 4] = [400, 300, 200, 100];

pub struct ScoringEngine;

impl ScoringEngine {
    /// Time-weighted award for a correct guess.
    ///
    /// With `q = round_duration / 4`: 400 if `elapsed <= q`, 300 if
    /// `elapsed <= 2q`, 200 if `elapsed <= 3q`, otherwise 100. Guesses
    /// stamped before the phase started count as immediate.
    pub fn points_for_guess(
        round_duration_seconds: u32,
        phase_started_at: DateTime<Utc>,
        guessed_at: DateTime<Utc>,
    ) -> u32 {
        let elapsed_ms = (guessed_at - phase_started_at).num_milliseconds().max(0);
        // Compare in quarter-milliseconds so odd durations split exactly.
        let quarter_scaled = i64::from(round_duration_seconds) * 1000;
        let elapsed_scaled = elapsed_ms * 4;

        for (index, points) in QUARTER_POINTS.iter().enumerate().take(3) {
            if elapsed_scaled <= quarter_scaled * (index as i64 + 1) {
                return *points;
            }
        }
        QUARTER_POINTS[3]
    }

    /// Trimmed, case-insensitive match with inner whitespace collapsed.
    pub fn is_correct_guess(text: &str, word: &str) -> bool {
        let normalize = |value: &str| {
            value
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase()
        };
        !word.trim().is_empty() && normalize(text) == normalize(word)
    }

    /// Whether `text` would reveal `word` if shown in chat.
    pub fn reveals_word(text: &str, word: &str) -> bool {
        let word = word.trim().to_lowercase();
        !word.is_empty() && text.to_lowercase().contains(&word)
    }

    /// Masks every case-insensitive occurrence of `word` in `text` with
    /// underscores, leaving the rest of the message readable.
    pub fn redact_word(text: &str, word: &str) -> String {
        let word: Vec<char> = word.trim().to_lowercase().chars().collect();
        if word.is_empty() {
            return text.to_string();
        }

        let chars: Vec<char> = text.chars().collect();
        let mut out = String::with_capacity(text.len());
        let mut i = 0;
        while i < chars.len() {
            let end = i + word.len();
            let hit = end <= chars.len()
                && chars[i..end]
                    .iter()
                    .zip(&word)
                    .all(|(c, w)| c.to_lowercase().eq(std::iter::once(*w)));
            if hit {
                out.extend(
                    chars[i..end]
                        .iter()
                        .map(|c| if c.is_whitespace() { *c } else { '_' }),
                );
                i = end;
            } else {
                out.push(chars[i]);
                i += 1;
            }
        }
        out
    }

    /// Replacement text stored for a correct guess so history never shows
    /// the solution.
    pub fn solved_announcement(display_name: &str) -> String {
        format!("{} guessed the word!", display_name)
    }
}
