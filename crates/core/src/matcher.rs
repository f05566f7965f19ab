//! Fuzzy location of anchor phrases in normalized page text.
//!
//! Each candidate (canonical name and aliases) is compared against every window of the page
//! text whose length lies within the candidates' length range widened by a tolerance band. The
//! best normalized Levenshtein similarity wins.

use crate::error::FillError;
use crate::normalize::{normalize, TextIndex};
use anchor_model::AnchorRule;
use pdf_engine::{PageCharacter, Rect};
use serde::Serialize;

/// Extracted characters of one page together with their normalized index.
#[derive(Debug, Clone)]
pub struct PageText {
    pub page: u32,
    pub characters: Vec<PageCharacter>,
    pub index: TextIndex,
}

impl PageText {
    pub fn new(page: u32, characters: Vec<PageCharacter>) -> Self {
        let index = TextIndex::build(&characters);
        Self { page, characters, index }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub anchor: String,
    pub page: u32,
    pub bbox: Rect,
    pub score: f64,
    /// Extracted text covered by the winning window.
    pub matched_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MatchOutcome {
    Found(MatchResult),
    NotFound { anchor: String, best_score: Option<f64> },
}

impl MatchOutcome {
    pub fn anchor(&self) -> &str {
        match self {
            MatchOutcome::Found(result) => &result.anchor,
            MatchOutcome::NotFound { anchor, .. } => anchor,
        }
    }

    pub fn found(&self) -> Option<&MatchResult> {
        match self {
            MatchOutcome::Found(result) => Some(result),
            MatchOutcome::NotFound { .. } => None,
        }
    }

    /// The match, or [`FillError::AnchorNotFound`] when the anchor stayed below the threshold.
    pub fn into_result(self) -> Result<MatchResult, FillError> {
        match self {
            MatchOutcome::Found(result) => Ok(result),
            MatchOutcome::NotFound { anchor, best_score } => Err(FillError::AnchorNotFound { anchor, best_score }),
        }
    }
}

/// Best window on one page, before the threshold is applied.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Window {
    score: f64,
    start: usize,
    len: usize,
    /// Distance between the window length and the length of the candidate that scored it.
    len_gap: usize,
}

impl Window {
    /// Higher score, then leftmost start, then length closest to the candidate, then shorter.
    fn beats(&self, other: &Window) -> bool {
        if self.score != other.score {
            return self.score > other.score;
        }
        (self.start, self.len_gap, self.len) < (other.start, other.len_gap, other.len)
    }
}

/// Normalized candidate strings of a rule, deduplicated, empty ones dropped.
fn candidates(rule: &AnchorRule) -> Vec<Vec<char>> {
    let mut out: Vec<Vec<char>> = Vec::new();
    for candidate in rule.candidates() {
        let chars: Vec<char> = normalize(candidate).chars().collect();
        if !chars.is_empty() && !out.contains(&chars) {
            out.push(chars);
        }
    }
    out
}

/// Levenshtein distance between `candidate` and every prefix of `text`, written to `out` so that
/// `out[len - 1]` belongs to the prefix of `len` characters. One row of the edit-distance table
/// is kept and extended by one text character at a time.
fn prefix_distances(text: &[char], candidate: &[char], row: &mut Vec<usize>, out: &mut Vec<usize>) {
    row.clear();
    row.extend(0..=candidate.len());
    out.clear();

    for (j, &ch) in text.iter().enumerate() {
        let mut diagonal = row[0];
        row[0] = j + 1;
        for (i, &expected) in candidate.iter().enumerate() {
            let above = row[i + 1];
            let substitution = diagonal + usize::from(expected != ch);
            row[i + 1] = substitution.min(above + 1).min(row[i] + 1);
            diagonal = above;
        }
        out.push(row[candidate.len()]);
    }
}

/// Normalized Levenshtein similarity: 1.0 for identical strings.
fn similarity(distance: usize, window_len: usize, candidate_len: usize) -> f64 {
    1.0 - distance as f64 / window_len.max(candidate_len) as f64
}

fn best_window(text: &[char], candidates: &[Vec<char>]) -> Option<Window> {
    let shortest = candidates.iter().map(Vec::len).min()?;
    let longest = candidates.iter().map(Vec::len).max()?;
    let band = (longest / 4).max(1);
    let min_len = shortest.saturating_sub(band).max(1);
    let max_len = (longest + band).min(text.len());
    if min_len > max_len {
        return None;
    }

    let mut best: Option<Window> = None;
    let mut row = Vec::with_capacity(longest + 1);
    let mut distances = Vec::with_capacity(max_len);

    for start in 0..=text.len() - min_len {
        let end = (start + max_len).min(text.len());
        for candidate in candidates {
            prefix_distances(&text[start..end], candidate, &mut row, &mut distances);
            for len in min_len..=end - start {
                let score = similarity(distances[len - 1], len, candidate.len());
                let current = Window { score, start, len, len_gap: len.abs_diff(candidate.len()) };
                if best.map_or(true, |b| current.beats(&b)) {
                    best = Some(current);
                }
            }
        }
    }

    best
}

fn to_result(rule: &AnchorRule, page: &PageText, window: Window) -> Option<MatchResult> {
    let range = page.index.original_range(window.start..window.start + window.len)?;
    // Blanks between the matched characters add text but no box.
    let inked = range.clone().filter(|&i| page.index.normalized_span(i).is_some_and(|span| !span.is_empty()));
    let bbox = Rect::union_all(inked.map(|i| &page.characters[i].bbox))?;
    let covered = &page.characters[range];

    Some(MatchResult {
        anchor: rule.name.clone(),
        page: page.page,
        bbox,
        score: window.score,
        matched_text: covered.iter().map(|c| c.text.as_str()).collect(),
    })
}

/// Searches `pages` in order for the best occurrence of `rule`. Equal scores keep the earliest
/// page. A pinned rule only looks at its own page.
pub fn locate<'a>(rule: &AnchorRule, pages: impl IntoIterator<Item = &'a PageText>, threshold: f64) -> MatchOutcome {
    let candidates = candidates(rule);
    let mut best: Option<(Window, &PageText)> = None;

    for page in pages {
        if rule.page.is_some_and(|pinned| pinned != page.page) {
            continue;
        }
        let Some(window) = best_window(page.index.chars(), &candidates) else {
            continue;
        };
        let better = match &best {
            Some((current, _)) => window.score > current.score,
            None => true,
        };
        if better {
            best = Some((window, page));
        }
    }

    let best_score = best.as_ref().map(|(window, _)| window.score);
    match best {
        Some((window, page)) if window.score >= threshold => match to_result(rule, page, window) {
            Some(result) => {
                tracing::debug!(anchor = %rule.name, page = result.page, score = result.score, "anchor matched");
                MatchOutcome::Found(result)
            }
            None => MatchOutcome::NotFound { anchor: rule.name.clone(), best_score },
        },
        _ => {
            tracing::debug!(anchor = %rule.name, ?best_score, threshold, "anchor below threshold");
            MatchOutcome::NotFound { anchor: rule.name.clone(), best_score }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(number: u32, text: &str) -> PageText {
        let characters = text
            .chars()
            .enumerate()
            .map(|(i, ch)| PageCharacter {
                text: ch.to_string(),
                bbox: Rect::new(100.0 + i as f32 * 12.0, 200.0, 112.0 + i as f32 * 12.0, 214.0),
            })
            .collect();
        PageText::new(number, characters)
    }

    fn rule(name: &str, aliases: &[&str]) -> AnchorRule {
        let mut rule = AnchorRule::ad_hoc(name);
        rule.aliases = aliases.iter().map(|a| (*a).to_owned()).collect();
        rule
    }

    #[test]
    fn exact_occurrence_scores_one_at_its_bbox() {
        let pages = [page(1, "合同编号：A-17  签订日期：")];
        let outcome = locate(&rule("签订日期：", &[]), &pages, 0.6);

        let result = outcome.found().expect("anchor should match");
        assert_eq!(result.score, 1.0);
        assert_eq!(result.matched_text, "签订日期：");
        // Characters 11..=15 of the page string.
        assert_eq!(result.bbox, Rect::new(232.0, 200.0, 292.0, 214.0));
    }

    #[test]
    fn near_miss_with_trailing_blanks_meets_threshold() {
        let pages = [page(1, "身份证号码      ")];
        let outcome = locate(&rule("身份证号：", &[]), &pages, 0.8);

        let result = outcome.found().expect("anchor should match");
        assert!(result.score >= 0.8);
        assert_eq!(result.matched_text, "身份证号码");
        assert_eq!(result.bbox.right, 160.0);
    }

    #[test]
    fn aliases_are_candidates() {
        let pages = [page(1, "Tel: 555")];
        let outcome = locate(&rule("Phone:", &["Tel:"]), &pages, 0.9);

        assert_eq!(outcome.found().map(|r| r.matched_text.as_str()), Some("Tel:"));
    }

    #[test]
    fn below_threshold_is_not_found_with_best_score() {
        let pages = [page(1, "completely unrelated")];
        let outcome = locate(&rule("身份证号：", &[]), &pages, 0.6);

        match outcome.clone() {
            MatchOutcome::NotFound { anchor, best_score } => {
                assert_eq!(anchor, "身份证号：");
                assert!(best_score.is_some_and(|s| s < 0.6));
            }
            MatchOutcome::Found(_) => panic!("anchor should not match"),
        }
        let err = outcome.into_result().expect_err("a miss converts to an error");
        assert_eq!(err.kind(), crate::ErrorKind::AnchorNotFound);
        assert!(err.to_string().starts_with("anchor `身份证号：` not found"));
    }

    #[test]
    fn leftmost_occurrence_wins_ties() {
        let pages = [page(1, "Date: x Date: y")];
        let result = locate(&rule("Date:", &[]), &pages, 0.6).found().cloned().expect("match");
        assert_eq!(result.bbox.left, 100.0);
    }

    #[test]
    fn lowest_page_wins_ties_and_pins_restrict_pages() {
        let pages = [page(1, "Name:"), page(2, "Name:")];
        assert_eq!(locate(&rule("Name:", &[]), &pages, 0.6).found().map(|r| r.page), Some(1));

        let mut pinned = rule("Name:", &[]);
        pinned.page = Some(2);
        assert_eq!(locate(&pinned, &pages, 0.6).found().map(|r| r.page), Some(2));
    }

    #[test]
    fn better_score_on_later_page_wins() {
        let pages = [page(1, "Nane:"), page(2, "Name:")];
        assert_eq!(locate(&rule("Name:", &[]), &pages, 0.6).found().map(|r| r.page), Some(2));
    }

    #[test]
    fn empty_page_yields_no_match() {
        let pages = [page(1, "")];
        assert!(matches!(
            locate(&rule("Name:", &[]), &pages, 0.1),
            MatchOutcome::NotFound { best_score: None, .. }
        ));
    }

    /// Best window by scoring every window from scratch.
    fn brute_force(text: &[char], candidates: &[Vec<char>]) -> Option<Window> {
        let longest = candidates.iter().map(Vec::len).max()?;
        let shortest = candidates.iter().map(Vec::len).min()?;
        let band = (longest / 4).max(1);
        let min_len = shortest.saturating_sub(band).max(1);
        let max_len = (longest + band).min(text.len());
        let mut best: Option<Window> = None;
        for start in 0..text.len() {
            for len in min_len..=max_len.min(text.len() - start) {
                let window: String = text[start..start + len].iter().collect();
                for candidate in candidates {
                    let target: String = candidate.iter().collect();
                    let score = strsim::normalized_levenshtein(&window, &target);
                    let current = Window { score, start, len, len_gap: len.abs_diff(candidate.len()) };
                    if best.map_or(true, |b| current.beats(&b)) {
                        best = Some(current);
                    }
                }
            }
        }
        best
    }

    #[test]
    fn prefix_distances_agree_with_levenshtein() {
        let text: Vec<char> = "kitten sitting 身份证号码".chars().collect();
        let candidate: Vec<char> = "sitting".chars().collect();
        let (mut row, mut out) = (Vec::new(), Vec::new());

        prefix_distances(&text[7..], &candidate, &mut row, &mut out);
        for len in 1..=out.len() {
            let prefix: String = text[7..7 + len].iter().collect();
            assert_eq!(out[len - 1], strsim::levenshtein(&prefix, "sitting"), "prefix {prefix:?}");
        }
    }

    #[test]
    fn best_window_matches_exhaustive_scoring() {
        let texts = ["accountnumber:12345acountnumbr", "身份证号码签订日期:", "nane:name:nam", "x"];
        let candidates: Vec<Vec<char>> =
            ["accountnumber:", "acctno.", "name:", "身份证号:"].iter().map(|c| c.chars().collect()).collect();

        for text in texts {
            let text: Vec<char> = text.chars().collect();
            for subset in [&candidates[..1], &candidates[..2], &candidates[2..3], &candidates[3..]] {
                assert_eq!(best_window(&text, subset), brute_force(&text, subset));
            }
        }
    }

    #[test]
    fn long_pages_with_long_anchors_are_searched() {
        let filler = "The parties agree to the terms set out below. ".repeat(90);
        let text = format!("{filler}Registered office address of the company: 88 Road");
        let pages = [page(1, &text)];
        let anchor = rule("Registered office address of the company:", &["Company registered address:"]);

        let result = locate(&anchor, &pages, 0.8).found().cloned().expect("anchor should match");
        assert_eq!(result.score, 1.0);
        assert_eq!(result.matched_text, "Registered office address of the company:");
    }

    #[test]
    fn blanks_inside_a_match_do_not_widen_its_box() {
        let mut characters: Vec<PageCharacter> = "Na me:"
            .chars()
            .enumerate()
            .map(|(i, ch)| PageCharacter {
                text: ch.to_string(),
                bbox: Rect::new(100.0 + i as f32 * 12.0, 200.0, 112.0 + i as f32 * 12.0, 214.0),
            })
            .collect();
        // A blank drawn far below the line.
        characters[2].bbox = Rect::new(124.0, 500.0, 136.0, 514.0);
        let pages = [PageText::new(1, characters)];

        let result = locate(&rule("Name:", &[]), &pages, 0.9).found().cloned().expect("anchor should match");
        assert_eq!(result.matched_text, "Na me:");
        assert_eq!(result.bbox, Rect::new(100.0, 200.0, 172.0, 214.0));
    }
}
