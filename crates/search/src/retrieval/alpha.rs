//! Per-query fusion weight selection
//!
//! `alpha` weights the dense side. Diacritic-heavy or jargon-heavy queries
//! lean lexical (lower alpha); long analytical questions lean semantic.

use astrorag_common::config::RetrievalConfig;

/// Hard bounds for the fusion weight
pub const ALPHA_FLOOR: f64 = 0.4;
pub const ALPHA_CEILING: f64 = 0.85;

const TURKISH_DIACRITICS: &[char] = &['ç', 'ğ', 'ı', 'ö', 'ş', 'ü', 'â', 'î', 'û', 'Ç', 'Ğ', 'İ', 'Ö', 'Ş', 'Ü'];

const JARGON: &[&str] = &[
    "almuten", "firdaria", "fardar", "profection", "profections", "profeksiyon", "zodiacal",
    "releasing", "zr", "antiscia", "contra-antiscia", "hyleg", "alcocoden", "sect", "triplicity",
    "exaltation", "dodecatemoria", "decan", "cazimi", "combust", "lot", "lots", "almutem",
    "bounds", "terms", "hellenistic", "yükselen", "tepe", "sekt", "lotu",
];

const ANALYTICAL_OPENERS: &[&str] = &["how", "why", "explain", "compare", "describe", "nasıl", "neden", "açıkla"];
const ANALYTICAL_CUES: &[&str] = &["relationship between", "difference between", "in relation to", "arasındaki"];

/// Chooses the dense weight for one query
#[derive(Debug, Clone)]
pub struct AlphaPicker {
    base_en: f64,
    base_tr: f64,
    min: f64,
    max: f64,
}

impl Default for AlphaPicker {
    fn default() -> Self {
        Self::new(0.65, 0.55, ALPHA_FLOOR, ALPHA_CEILING)
    }
}

impl AlphaPicker {
    /// Bounds are clamped into [`ALPHA_FLOOR`, `ALPHA_CEILING`]
    pub fn new(base_en: f64, base_tr: f64, min: f64, max: f64) -> Self {
        let min = min.clamp(ALPHA_FLOOR, ALPHA_CEILING);
        let max = max.clamp(min, ALPHA_CEILING);
        Self { base_en, base_tr, min, max }
    }

    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self::new(config.alpha_base_en, config.alpha_base_tr, config.alpha_min, config.alpha_max)
    }

    /// Dense weight for `query` in `language` ("tr", "en", ...)
    pub fn pick(&self, query: &str, language: &str) -> f64 {
        let base = if language.to_lowercase().starts_with("tr") {
            self.base_tr
        } else {
            self.base_en
        };

        let lower = query.to_lowercase();
        let words: Vec<&str> = lower.split_whitespace().collect();

        // Lexical signals
        let letters = query.chars().filter(|c| c.is_alphabetic()).count();
        let diacritics = query.chars().filter(|c| TURKISH_DIACRITICS.contains(c)).count();
        let diacritic_heavy = letters > 0 && diacritics as f64 / letters as f64 >= 0.04;

        let jargon_hits = words
            .iter()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '-'))
            .filter(|w| JARGON.contains(w))
            .count()
            .min(3);

        // Semantic signals
        let long_query = words.len() >= 12;
        let analytical = words
            .first()
            .map(|w| ANALYTICAL_OPENERS.contains(&w.trim_matches(|c: char| !c.is_alphanumeric())))
            .unwrap_or(false)
            || ANALYTICAL_CUES.iter().any(|cue| lower.contains(cue));

        let mut alpha = base;
        if diacritic_heavy {
            alpha -= 0.10;
        }
        alpha -= 0.05 * jargon_hits as f64;
        if long_query {
            alpha += 0.08;
        }
        if analytical && words.len() >= 6 {
            alpha += 0.06;
        }

        if !alpha.is_finite() {
            return self.min;
        }
        alpha.clamp(self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_locale_base() {
        let picker = AlphaPicker::default();
        assert!((picker.pick("tell me something", "en") - 0.65).abs() < 1e-9);
        assert!((picker.pick("tell me something", "tr") - 0.55).abs() < 1e-9);
    }

    #[test]
    fn test_jargon_leans_lexical() {
        let picker = AlphaPicker::default();
        let plain = picker.pick("what is my chart about", "en");
        let jargon = picker.pick("almuten and firdaria profection", "en");
        assert!(jargon < plain);
    }

    #[test]
    fn test_diacritics_lean_lexical() {
        let picker = AlphaPicker::default();
        assert!(picker.pick("yükselen burç ışığı", "tr") < 0.55);
    }

    #[test]
    fn test_long_analytical_leans_semantic() {
        let picker = AlphaPicker::default();
        let query = "how does the relationship between my moon and saturn shape the way I handle long term commitments";
        assert!(picker.pick(query, "en") > 0.65);
    }

    #[test]
    fn test_configured_bounds_are_clamped() {
        let picker = AlphaPicker::new(2.0, -1.0, 0.0, 1.0);
        assert_eq!(picker.pick("x", "en"), ALPHA_CEILING);
        assert_eq!(picker.pick("x", "tr"), ALPHA_FLOOR);
    }

    proptest! {
        #[test]
        fn alpha_always_in_bounds(query in ".{0,200}", tr in any::<bool>(), base in -2.0f64..3.0) {
            let picker = AlphaPicker::new(base, base, 0.4, 0.85);
            let alpha = picker.pick(&query, if tr { "tr" } else { "en" });
            prop_assert!((ALPHA_FLOOR..=ALPHA_CEILING).contains(&alpha));
        }
    }
}
