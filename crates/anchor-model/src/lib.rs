use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_FONT_SIZE: f32 = 12.0;
pub const DEFAULT_LINE_SPACING: f32 = 14.0;
pub const DEFAULT_EDGE_MARGIN: f32 = 2.0;
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.60;
pub const DEFAULT_RASTER_SCALE: f32 = 2.0;
pub const RASTER_SCALE_RANGE: RangeInclusive<f32> = 0.5..=4.0;

/// Offsets applied to fill keys that have no configured anchor rule.
pub const DEFAULT_OFFSET_X: f32 = 50.0;
pub const DEFAULT_OFFSET_Y: f32 = 0.0;

pub const ALIAS_SEPARATOR: char = '|';

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("anchor `{anchor}`: {reason}")]
    InvalidAnchor { anchor: String, reason: String },
    #[error("duplicate anchor name `{0}`")]
    DuplicateAnchor(String),
    #[error("invalid run parameter `{field}`: {reason}")]
    InvalidParameter { field: &'static str, reason: String },
    #[error("unknown engine `{0}` (expected embedded, standard or raster)")]
    UnknownEngine(String),
}

/// One entry of the anchor configuration file, before it is bound to a name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnchorSpec {
    #[serde(default)]
    pub aliases: Vec<String>,
    pub offset_x: f32,
    pub offset_y: f32,
    #[serde(default)]
    pub max_width: Option<f32>,
    #[serde(default)]
    pub line_spacing: Option<f32>,
    #[serde(default)]
    pub raster_scale: Option<f32>,
    #[serde(default)]
    pub edge_margin: Option<f32>,
    /// 1-based page the anchor is pinned to.
    #[serde(default)]
    pub page: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnchorRule {
    pub name: String,
    pub aliases: Vec<String>,
    pub offset_x: f32,
    pub offset_y: f32,
    pub max_width: Option<f32>,
    pub line_spacing: Option<f32>,
    pub raster_scale: Option<f32>,
    pub edge_margin: Option<f32>,
    pub page: Option<u32>,
}

impl AnchorRule {
    /// Rule for a fill key with no configuration entry. `a|b` syntax yields aliases.
    pub fn ad_hoc(key: &str) -> Self {
        let mut parts = split_aliases(key).into_iter();
        let name = parts.next().unwrap_or_else(|| key.trim().to_owned());

        Self {
            name,
            aliases: parts.collect(),
            offset_x: DEFAULT_OFFSET_X,
            offset_y: DEFAULT_OFFSET_Y,
            max_width: None,
            line_spacing: None,
            raster_scale: None,
            edge_margin: None,
            page: None,
        }
    }

    pub fn from_spec(name: impl Into<String>, spec: AnchorSpec) -> Self {
        Self {
            name: name.into(),
            aliases: spec.aliases,
            offset_x: spec.offset_x,
            offset_y: spec.offset_y,
            max_width: spec.max_width,
            line_spacing: spec.line_spacing,
            raster_scale: spec.raster_scale,
            edge_margin: spec.edge_margin,
            page: spec.page,
        }
    }

    /// Canonical name followed by aliases, deduplicated in order.
    pub fn candidates(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::with_capacity(self.aliases.len() + 1);
        for candidate in std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str)) {
            let candidate = candidate.trim();
            if !candidate.is_empty() && !out.contains(&candidate) {
                out.push(candidate);
            }
        }
        out
    }

    pub fn answers_to(&self, key: &str) -> bool {
        let key = fold_key(key);
        !key.is_empty() && self.candidates().iter().any(|candidate| fold_key(candidate) == key)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        let invalid = |reason: String| ModelError::InvalidAnchor { anchor: self.name.clone(), reason };

        if self.name.trim().is_empty() {
            return Err(invalid("canonical name is empty".to_owned()));
        }
        if !self.offset_x.is_finite() || !self.offset_y.is_finite() {
            return Err(invalid("offsets must be finite numbers".to_owned()));
        }
        if let Some(width) = self.max_width {
            if !(width.is_finite() && width > 0.0) {
                return Err(invalid(format!("max_width must be positive, got {width}")));
            }
        }
        if let Some(spacing) = self.line_spacing {
            if !(spacing.is_finite() && spacing > 0.0) {
                return Err(invalid(format!("line_spacing must be positive, got {spacing}")));
            }
        }
        if let Some(scale) = self.raster_scale {
            if !RASTER_SCALE_RANGE.contains(&scale) {
                return Err(invalid(format!("raster_scale must be within 0.5..=4.0, got {scale}")));
            }
        }
        if let Some(margin) = self.edge_margin {
            if !(margin.is_finite() && margin >= 0.0) {
                return Err(invalid(format!("edge_margin must be non-negative, got {margin}")));
            }
        }
        if self.page == Some(0) {
            return Err(invalid("page is 1-based and must be >= 1".to_owned()));
        }

        Ok(())
    }
}

/// Validated set of anchor rules, unique by canonical name, in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnchorConfig {
    rules: Vec<AnchorRule>,
}

impl AnchorConfig {
    pub fn new(rules: Vec<AnchorRule>) -> Result<Self, ModelError> {
        let mut seen = BTreeMap::new();
        for rule in &rules {
            rule.validate()?;
            if seen.insert(rule.name.clone(), ()).is_some() {
                return Err(ModelError::DuplicateAnchor(rule.name.clone()));
            }
        }

        Ok(Self { rules })
    }

    /// Builds rules from raw configuration entries. A key such as `a|b|c` names the rule `a`
    /// and adds `b` and `c` to its aliases.
    pub fn from_entries<I>(entries: I) -> Result<Self, ModelError>
    where
        I: IntoIterator<Item = (String, AnchorSpec)>,
    {
        let mut rules = Vec::new();
        for (key, mut spec) in entries {
            let mut parts = split_aliases(&key).into_iter();
            let Some(name) = parts.next() else {
                return Err(ModelError::InvalidAnchor {
                    anchor: key,
                    reason: "canonical name is empty".to_owned(),
                });
            };

            let mut aliases: Vec<String> = parts.collect();
            for alias in spec.aliases.drain(..) {
                let alias = alias.trim().to_owned();
                if !alias.is_empty() && alias != name && !aliases.contains(&alias) {
                    aliases.push(alias);
                }
            }
            spec.aliases = aliases;
            rules.push(AnchorRule::from_spec(name, spec));
        }

        Self::new(rules)
    }

    pub fn rules(&self) -> &[AnchorRule] {
        &self.rules
    }

    pub fn get(&self, name: &str) -> Option<&AnchorRule> {
        self.rules.iter().find(|rule| rule.name == name)
    }

    /// Finds the rule a fill key refers to: exact canonical name first, then any alias
    /// (including each part of `a|b` key syntax).
    pub fn resolve(&self, key: &str) -> Option<&AnchorRule> {
        if let Some(rule) = self.get(key.trim()) {
            return Some(rule);
        }

        split_aliases(key)
            .iter()
            .find_map(|part| self.rules.iter().find(|rule| rule.answers_to(part)))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// A value bound to the rule that places it.
#[derive(Debug, Clone, PartialEq)]
pub struct FillValue {
    pub rule: AnchorRule,
    pub text: String,
}

/// Key/value pairs to write, already stripped of empty and whitespace-only values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FillRequest {
    entries: Vec<(String, String)>,
}

impl FillRequest {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut request = Self::default();
        for (key, value) in pairs {
            request.insert(key, value);
        }
        request
    }

    /// Later values for the same key replace earlier ones. Blank values are dropped.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        let value = value.trim();
        if key.trim().is_empty() || value.is_empty() {
            return;
        }

        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some(entry) => entry.1 = value.to_owned(),
            None => self.entries.push((key, value.to_owned())),
        }
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Embedded,
    Standard,
    Raster,
}

impl EngineKind {
    pub fn default_order() -> Vec<EngineKind> {
        vec![EngineKind::Embedded, EngineKind::Standard, EngineKind::Raster]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::Embedded => "embedded",
            EngineKind::Standard => "standard",
            EngineKind::Raster => "raster",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "embedded" => Ok(EngineKind::Embedded),
            "standard" => Ok(EngineKind::Standard),
            "raster" => Ok(EngineKind::Raster),
            _ => Err(ModelError::UnknownEngine(value.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PageScope {
    #[default]
    All,
    Selection(String),
}

impl PageScope {
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
            PageScope::All
        } else {
            PageScope::Selection(trimmed.to_owned())
        }
    }

    pub fn single(page: u32) -> Self {
        PageScope::Selection(page.to_string())
    }

    /// Resolves to sorted, deduplicated 1-based page numbers. Malformed and out-of-range parts
    /// are skipped; a selection that resolves to nothing falls back to every page.
    pub fn resolve(&self, page_count: u32) -> Vec<u32> {
        let all = || (1..=page_count).collect::<Vec<_>>();
        let PageScope::Selection(selection) = self else {
            return all();
        };

        let mut pages = Vec::new();
        let mut push = |page: u32| {
            if page == 0 || page > page_count {
                tracing::warn!(page, page_count, "page selection out of range, ignored");
            } else {
                pages.push(page);
            }
        };

        for part in selection.split(',').map(str::trim).filter(|part| !part.is_empty()) {
            match part.split_once('-') {
                Some((start, end)) => match (start.trim().parse::<u32>(), end.trim().parse::<u32>()) {
                    (Ok(start), Ok(end)) => {
                        let (low, high) = if start <= end { (start, end) } else { (end, start) };
                        for page in low..=high.min(page_count.max(low)) {
                            push(page);
                        }
                    }
                    _ => tracing::warn!(part, "unparseable page range, ignored"),
                },
                None => match part.parse::<u32>() {
                    Ok(page) => push(page),
                    Err(_) => tracing::warn!(part, "unparseable page number, ignored"),
                },
            }
        }

        pages.sort_unstable();
        pages.dedup();
        if pages.is_empty() {
            all()
        } else {
            pages
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunParams {
    pub pages: PageScope,
    pub fuzzy_threshold: f64,
    pub engines: Vec<EngineKind>,
    /// Overrides every rule's `raster_scale` when set.
    pub raster_scale: Option<f32>,
    pub font_size: f32,
    pub line_spacing: f32,
    pub edge_margin: f32,
    pub font_file: Option<PathBuf>,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            pages: PageScope::All,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            engines: EngineKind::default_order(),
            raster_scale: None,
            font_size: DEFAULT_FONT_SIZE,
            line_spacing: DEFAULT_LINE_SPACING,
            edge_margin: DEFAULT_EDGE_MARGIN,
            font_file: None,
        }
    }
}

impl RunParams {
    pub fn validate(&self) -> Result<(), ModelError> {
        let invalid = |field: &'static str, reason: String| ModelError::InvalidParameter { field, reason };

        if !(0.0..=1.0).contains(&self.fuzzy_threshold) {
            return Err(invalid("fuzzy_threshold", format!("must be within 0..=1, got {}", self.fuzzy_threshold)));
        }
        if self.engines.is_empty() {
            return Err(invalid("engines", "at least one engine is required".to_owned()));
        }
        if let Some(scale) = self.raster_scale {
            if !RASTER_SCALE_RANGE.contains(&scale) {
                return Err(invalid("raster_scale", format!("must be within 0.5..=4.0, got {scale}")));
            }
        }
        if !(self.font_size.is_finite() && self.font_size > 0.0) {
            return Err(invalid("font_size", format!("must be positive, got {}", self.font_size)));
        }
        if !(self.line_spacing.is_finite() && self.line_spacing > 0.0) {
            return Err(invalid("line_spacing", format!("must be positive, got {}", self.line_spacing)));
        }
        if !(self.edge_margin.is_finite() && self.edge_margin >= 0.0) {
            return Err(invalid("edge_margin", format!("must be non-negative, got {}", self.edge_margin)));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillStats {
    pub total: usize,
    pub matched: usize,
    pub missing: usize,
    pub missing_names: Vec<String>,
    pub matched_names: Vec<String>,
}

impl FillStats {
    pub fn record_matched(&mut self, name: &str) {
        self.total += 1;
        self.matched += 1;
        self.matched_names.push(name.to_owned());
    }

    pub fn record_missing(&mut self, name: &str) {
        self.total += 1;
        self.missing += 1;
        self.missing_names.push(name.to_owned());
    }

    pub fn is_complete(&self) -> bool {
        self.missing == 0
    }
}

/// Splits `a|b|c` alias syntax into trimmed, non-empty, unique parts in order.
pub fn split_aliases(key: &str) -> Vec<String> {
    let mut parts: Vec<String> = Vec::new();
    for part in key.split(ALIAS_SEPARATOR).map(str::trim).filter(|part| !part.is_empty()) {
        if !parts.iter().any(|existing| existing == part) {
            parts.push(part.to_owned());
        }
    }
    parts
}

/// Case- and whitespace-insensitive form used to compare fill keys with rule names.
pub fn fold_key(key: &str) -> String {
    key.chars().filter(|ch| !ch.is_whitespace()).flat_map(char::to_lowercase).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(offset_x: f32, offset_y: f32) -> AnchorSpec {
        AnchorSpec {
            aliases: Vec::new(),
            offset_x,
            offset_y,
            max_width: None,
            line_spacing: None,
            raster_scale: None,
            edge_margin: None,
            page: None,
        }
    }

    #[test]
    fn alias_key_syntax_becomes_canonical_name_and_aliases() {
        let mut entry = spec(10.0, 2.0);
        entry.aliases = vec!["身份号码".to_owned(), "身份证号码".to_owned()];

        let config = AnchorConfig::from_entries([("身份证号：|身份证号码".to_owned(), entry)])
            .expect("config should build");

        let rule = config.get("身份证号：").expect("canonical rule expected");
        assert_eq!(rule.aliases, vec!["身份证号码".to_owned(), "身份号码".to_owned()]);
        assert_eq!(rule.candidates(), vec!["身份证号：", "身份证号码", "身份号码"]);
    }

    #[test]
    fn resolve_finds_rule_by_alias_ignoring_case_and_spaces() {
        let mut entry = spec(0.0, 0.0);
        entry.aliases = vec!["Company Name".to_owned()];
        let config =
            AnchorConfig::from_entries([("企业名称：".to_owned(), entry)]).expect("config should build");

        let rule = config.resolve("company  NAME").expect("alias should resolve");
        assert_eq!(rule.name, "企业名称：");
        assert!(config.resolve("phone").is_none());
    }

    #[test]
    fn duplicate_canonical_names_are_rejected() {
        let err = AnchorConfig::from_entries([
            ("Name".to_owned(), spec(0.0, 0.0)),
            ("Name|Full name".to_owned(), spec(1.0, 0.0)),
        ])
        .expect_err("duplicate should fail");

        assert_eq!(err, ModelError::DuplicateAnchor("Name".to_owned()));
    }

    #[test]
    fn raster_scale_outside_range_is_invalid() {
        let mut entry = spec(0.0, 0.0);
        entry.raster_scale = Some(8.0);

        let err = AnchorConfig::from_entries([("Seal".to_owned(), entry)]).expect_err("should fail");
        assert!(matches!(err, ModelError::InvalidAnchor { ref anchor, .. } if anchor == "Seal"));
    }

    #[test]
    fn spec_requires_offsets() {
        let err = serde_json::from_str::<AnchorSpec>(r#"{"aliases": ["x"], "offset_x": 4}"#)
            .expect_err("missing offset_y should fail");
        assert!(err.to_string().contains("offset_y"));
    }

    #[test]
    fn ad_hoc_rule_uses_default_offsets() {
        let rule = AnchorRule::ad_hoc("Phone:|Tel:");
        assert_eq!(rule.name, "Phone:");
        assert_eq!(rule.aliases, vec!["Tel:".to_owned()]);
        assert_eq!(rule.offset_x, DEFAULT_OFFSET_X);
        assert_eq!(rule.offset_y, DEFAULT_OFFSET_Y);
    }

    #[test]
    fn fill_request_drops_blank_values_and_keeps_last_duplicate() {
        let request = FillRequest::from_pairs([("a", "1"), ("b", "   "), ("c", ""), ("a", " 2 ")]);

        assert_eq!(request.entries(), &[("a".to_owned(), "2".to_owned())]);
    }

    #[test]
    fn page_scope_parses_ranges_and_ignores_junk() {
        let scope = PageScope::parse("5-3, 1, x, 9, 1-1");
        assert_eq!(scope.resolve(6), vec![1, 3, 4, 5]);
    }

    #[test]
    fn page_scope_falls_back_to_all_pages() {
        assert_eq!(PageScope::parse("all").resolve(3), vec![1, 2, 3]);
        assert_eq!(PageScope::parse("42").resolve(2), vec![1, 2]);
        assert_eq!(PageScope::single(2).resolve(2), vec![2]);
    }

    #[test]
    fn engine_kind_parses_case_insensitively() {
        assert_eq!("Raster".parse::<EngineKind>(), Ok(EngineKind::Raster));
        assert!("pymupdf".parse::<EngineKind>().is_err());
        assert_eq!(EngineKind::default_order()[0], EngineKind::Embedded);
    }

    #[test]
    fn run_params_reject_out_of_range_threshold() {
        let params = RunParams { fuzzy_threshold: 1.5, ..RunParams::default() };
        assert!(matches!(
            params.validate(),
            Err(ModelError::InvalidParameter { field: "fuzzy_threshold", .. })
        ));
        assert!(RunParams::default().validate().is_ok());
    }

    #[test]
    fn fill_stats_counts_matches_and_misses() {
        let mut stats = FillStats::default();
        stats.record_matched("a");
        stats.record_missing("b");

        assert_eq!((stats.total, stats.matched, stats.missing), (2, 1, 1));
        assert_eq!(stats.missing_names, vec!["b".to_owned()]);
        assert!(!stats.is_complete());
    }
}
