use scraper::{ElementRef, Html, Node, Selector};

use super::Metadata;
use crate::parser::labels::{Field, LabelVocabulary};
use crate::parser::markup::{is_block_tag, node_text};

const EDGE_PUNCTUATION: &[char] = &[',', ';', ':', '：', '-', '–', '—'];

/// The first emphasized run outside a non-scientific label line is read as
/// the binomial. The rest of its line is split around it: vernacular name
/// before, name-setter after. A `<br>` ends the line on either side.
pub fn extract(html: &str, vocabulary: &LabelVocabulary, meta: &mut Metadata) {
    let Ok(selector) = Selector::parse("i, em") else { return };
    let fragment = Html::parse_fragment(html);

    for italic in fragment.select(&selector) {
        let binomial = node_text(italic);
        if binomial.trim().is_empty() {
            continue;
        }
        let Some(block) = containing_block(italic) else {
            fill_binomial(&binomial, meta);
            return;
        };
        let (before, after) = split_around(block, italic);

        let line = format!("{}{}{}", before, binomial, after);
        let label = vocabulary.match_line(line.trim());
        if label.as_ref().is_some_and(|l| l.field != Field::Scientific) {
            continue;
        }

        fill_binomial(&binomial, meta);
        meta.fill(Field::AuthorsDisplay, tidy(&after));
        let in_label = label.is_some() || block.value().classes().any(|c| c == "label");
        if !in_label {
            meta.fill(Field::Official, tidy(&before));
        }
        return;
    }
}

fn fill_binomial(binomial: &str, meta: &mut Metadata) {
    let mut tokens = binomial.split_whitespace();
    if let Some(genus) = tokens.next() {
        meta.fill(Field::Genus, genus);
    }
    if let Some(species) = tokens.next() {
        meta.fill(Field::Species, species);
    }
}

fn containing_block(el: ElementRef) -> Option<ElementRef> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| is_block_tag(a.value().name()) && a.value().name() != "br")
}

/// Text of the line holding `italic` inside `block`, before and after it.
fn split_around(block: ElementRef, italic: ElementRef) -> (String, String) {
    let mut before = String::new();
    let mut after = String::new();
    let mut passed = false;

    for node in block.descendants() {
        if node.id() == italic.id() {
            passed = true;
            continue;
        }
        if node.ancestors().any(|a| a.id() == italic.id()) {
            continue;
        }
        match node.value() {
            Node::Element(e) if e.name() == "br" => {
                if passed {
                    break;
                }
                before.clear();
            }
            Node::Text(t) if passed => after.push_str(t),
            Node::Text(t) => before.push_str(t),
            _ => {}
        }
    }
    (before, after)
}

fn tidy(s: &str) -> &str {
    s.trim().trim_matches(EDGE_PUNCTUATION).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;

    fn run(html: &str) -> Metadata {
        let vocab = LabelVocabulary::new(&Settings::defaults().unwrap().labels);
        let mut meta = Metadata::default();
        extract(html, &vocab, &mut meta);
        meta
    }

    #[test]
    fn splits_line_around_binomial() {
        let m = run("<p>สัก <i>Tectona grandis</i> L.f.</p>");
        assert_eq!(m.official.as_deref(), Some("สัก"));
        assert_eq!(m.genus.as_deref(), Some("Tectona"));
        assert_eq!(m.species.as_deref(), Some("grandis"));
        assert_eq!(m.authors_display.as_deref(), Some("L.f."));
    }

    #[test]
    fn label_caption_is_not_official() {
        let m = run("<p>Scientific name: <em>Dalbergia cochinchinensis</em> Pierre</p>");
        assert_eq!(m.official, None);
        assert_eq!(m.genus.as_deref(), Some("Dalbergia"));
        assert_eq!(m.authors_display.as_deref(), Some("Pierre"));

        let m = run(r#"<p class="label"><b>ชื่อ</b> <i>Tectona grandis</i></p>"#);
        assert_eq!(m.official, None);
    }

    #[test]
    fn only_first_nonempty_run_counts() {
        let m = run("<p><i> </i>Teak <i>Tectona grandis</i>, <i>Other name</i></p>");
        assert_eq!(m.official.as_deref(), Some("Teak"));
        assert_eq!(m.genus.as_deref(), Some("Tectona"));
        assert_eq!(m.authors_display.as_deref(), Some("Other name"));
    }

    #[test]
    fn skips_emphasis_in_other_label_lines() {
        let m = run("<p>Synonyms: <i>Tectona theka</i> Lour.</p><p>สัก <i>Tectona grandis</i> L.f.</p>");
        assert_eq!(m.genus.as_deref(), Some("Tectona"));
        assert_eq!(m.species.as_deref(), Some("grandis"));
        assert_eq!(m.authors_display.as_deref(), Some("L.f."));
        assert_eq!(m.official.as_deref(), Some("สัก"));

        let m = run("<p>Synonyms: <i>Tectona theka</i> Lour.</p>");
        assert_eq!(m.genus, None);
        assert_eq!(m.authors_display, None);
    }

    #[test]
    fn line_break_bounds_the_binomial_line() {
        let m = run("<p>Plate 4<br>Scientific name: <i>Tectona grandis</i> L.f.<br>Family: Lamiaceae</p>");
        assert_eq!(m.genus.as_deref(), Some("Tectona"));
        assert_eq!(m.authors_display.as_deref(), Some("L.f."));
        assert_eq!(m.official, None);

        let m = run("<p>Family: <i>Lamiaceae</i><br>สัก <i>Tectona grandis</i></p>");
        assert_eq!(m.genus.as_deref(), Some("Tectona"));
        assert_eq!(m.official.as_deref(), Some("สัก"));
    }

    #[test]
    fn no_emphasis_leaves_metadata_empty() {
        assert_eq!(run("<p>Plain text only</p>"), Metadata::default());
    }

    #[test]
    fn single_token_run_gives_genus_only() {
        let m = run("<h2><i>Tectona</i></h2>");
        assert_eq!(m.genus.as_deref(), Some("Tectona"));
        assert_eq!(m.species, None);
        assert_eq!(m.official, None);
        assert_eq!(m.authors_display, None);
    }
}
