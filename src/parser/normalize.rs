use regex::Regex;
use serde::Deserialize;
use unicode_normalization::UnicodeNormalization;

const ZERO_WIDTH: &[char] = &['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}', '\u{00AD}'];
const NBSP: &[char] = &['\u{00A0}', '\u{202F}', '\u{2007}'];

/// Marker left where lossy extraction produced U+FFFD.
pub const GARBLE_MARKER: char = '?';

const MAX_PASSES: usize = 16;
const MAX_REPAIR_SWEEPS: usize = 32;

/// One entry of the garble-repair table.
#[derive(Debug, Clone, Deserialize)]
pub struct GarbleRule {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub regex: bool,
}

#[derive(Debug)]
enum Repair {
    Literal { from: String, to: String },
    Pattern { re: Regex, to: String },
}

impl Repair {
    fn apply(&self, text: &str) -> Option<String> {
        match self {
            Repair::Literal { from, to } if text.contains(from.as_str()) => {
                Some(text.replace(from.as_str(), to))
            }
            Repair::Pattern { re, to } if re.is_match(text) => {
                Some(re.replace_all(text, to.as_str()).into_owned())
            }
            _ => None,
        }
    }
}

/// Unicode cleanup plus the ordered garble-repair table.
///
/// `normalize` never fails and is idempotent: the cleanup pass is re-run until
/// its output stops changing, so a step that exposes work for an earlier step
/// (a removed zero-width joiner letting two marks compose, say) is settled
/// before returning.
#[derive(Debug)]
pub struct Normalizer {
    repairs: Vec<Repair>,
}

impl Normalizer {
    pub fn new(rules: &[GarbleRule]) -> Result<Self, regex::Error> {
        let mut repairs = Vec::with_capacity(rules.len());
        for rule in rules {
            let to: String = rule.to.nfc().collect();
            if rule.regex {
                repairs.push(Repair::Pattern { re: Regex::new(&rule.from)?, to });
            } else if !rule.from.is_empty() {
                repairs.push(Repair::Literal { from: rule.from.nfc().collect(), to });
            }
        }
        Ok(Normalizer { repairs })
    }

    pub fn normalize(&self, raw: &str) -> String {
        let mut current = self.pass(raw);
        for _ in 0..MAX_PASSES {
            let next = self.pass(&current);
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    /// Like `normalize`, but line breaks become spaces. Used for field values and markup.
    pub fn normalize_inline(&self, raw: &str) -> String {
        let flat: String = raw
            .chars()
            .map(|c| if matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}') { ' ' } else { c })
            .collect();
        self.normalize(&flat)
    }

    fn pass(&self, raw: &str) -> String {
        let composed: String = raw.replace("\r\n", "\n").nfc().collect();
        let cleaned = clean_chars(&composed);
        let repaired = self.repair(cleaned);
        let collapsed = collapse_repeated_marks(&repaired);
        collapse_whitespace(&collapsed)
    }

    fn repair(&self, mut text: String) -> String {
        for _ in 0..MAX_REPAIR_SWEEPS {
            let mut changed = false;
            for repair in &self.repairs {
                if let Some(fixed) = repair.apply(&text) {
                    if fixed != text {
                        text = fixed;
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }
        text
    }
}

fn clean_chars(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\n' | '\r' | '\u{2028}' | '\u{2029}' => out.push('\n'),
            '\u{FFFD}' => out.push(GARBLE_MARKER),
            c if NBSP.contains(&c) => out.push(' '),
            c if ZERO_WIDTH.contains(&c) => {}
            c if c.is_whitespace() => out.push(' '),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

/// Thai above/below vowel signs and tone marks.
fn is_thai_mark(c: char) -> bool {
    matches!(c, '\u{0E31}' | '\u{0E34}'..='\u{0E3A}' | '\u{0E47}'..='\u{0E4E}')
}

fn collapse_repeated_marks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev: Option<char> = None;
    for c in text.chars() {
        if is_thai_mark(c) && prev == Some(c) {
            continue;
        }
        out.push(c);
        prev = Some(c);
    }
    out
}

/// Spaces collapse within a line, lines are trimmed, blank-line runs shrink to one.
fn collapse_whitespace(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    for line in text.split('\n') {
        let line = line.split(' ').filter(|w| !w.is_empty()).collect::<Vec<_>>().join(" ");
        if line.is_empty() && lines.last().map_or(true, |l| l.is_empty()) {
            continue;
        }
        lines.push(line);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use proptest::prelude::*;

    fn normalizer() -> Normalizer {
        Normalizer::new(&Settings::defaults().unwrap().garble).unwrap()
    }

    #[test]
    fn known_garble_is_repaired() {
        let n = normalizer();
        let raw = "ชื่อว\u{FFFD}ทยาศาสตร์: Tectona grandis";
        assert_eq!(n.normalize(raw), "ชื่อวิทยาศาสตร์: Tectona grandis");
    }

    #[test]
    fn regex_rule_applies() {
        let n = normalizer();
        assert_eq!(n.normalize("ชื่อ \u{FFFD}ื่น: สักทอง"), "ชื่ออื่น: สักทอง");
    }

    #[test]
    fn unknown_corruption_keeps_marker() {
        let n = normalizer();
        assert_eq!(n.normalize("abc\u{FFFD}def"), "abc?def");
    }

    #[test]
    fn repeated_thai_marks_collapse() {
        let n = normalizer();
        assert_eq!(n.normalize("ก\u{0E48}\u{0E48}\u{0E48}า"), "ก\u{0E48}า");
        assert_eq!(n.normalize("ส\u{0E31}\u{0E31}ก"), "ส\u{0E31}ก");
        // different marks in a row are left alone
        assert_eq!(n.normalize("ที\u{0E48}"), "ที\u{0E48}");
    }

    #[test]
    fn whitespace_and_invisibles() {
        let n = normalizer();
        let raw = "  Family:\u{00A0}\u{00A0}Lami\u{200B}aceae \t \r\n\r\n\r\n\nnext\u{0007} line  ";
        assert_eq!(n.normalize(raw), "Family: Lamiaceae\n\nnext line");
    }

    #[test]
    fn composes_to_nfc() {
        let n = normalizer();
        assert_eq!(n.normalize("e\u{0301}"), "\u{00E9}");
        assert_eq!(n.normalize("e\u{200D}\u{0301}"), "\u{00E9}");
    }

    #[test]
    fn inline_folds_lines() {
        let n = normalizer();
        assert_eq!(n.normalize_inline("Tectona\n grandis\n\nL.f."), "Tectona grandis L.f.");
    }

    #[test]
    fn bad_regex_rule_is_rejected() {
        let rules = vec![GarbleRule { from: "(".into(), to: "x".into(), regex: true }];
        assert!(Normalizer::new(&rules).is_err());
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(s in any::<String>()) {
            let n = normalizer();
            let once = n.normalize(&s);
            prop_assert_eq!(n.normalize(&once), once);
        }

        #[test]
        fn normalize_is_idempotent_on_thai(
            s in "[ก-ฮะาเแโ\u{0E31}\u{0E34}-\u{0E3A}\u{0E47}-\u{0E4E} \n\t\u{00A0}\u{200B}\u{FFFD}?:]{0,60}"
        ) {
            let n = normalizer();
            let once = n.normalize(&s);
            prop_assert_eq!(n.normalize(&once), once);
        }

        #[test]
        fn repeated_mark_collapses_to_one(count in 2usize..8) {
            let n = normalizer();
            let raw = format!("ก{}น", "\u{0E49}".repeat(count));
            prop_assert_eq!(n.normalize(&raw), "ก\u{0E49}น");
        }
    }
}
