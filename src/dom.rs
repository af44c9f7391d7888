//! DOM normalization and change detection.
//!
//! URL-based navigation detection misses modals, dropdowns and overlays that
//! mutate the page without changing the URL. Instead we normalize the markup
//! down to its visually relevant structure and compare before/after with a
//! similarity tolerance, so volatile ids and timestamps don't register as
//! state changes while a real UI transition does.

use std::collections::HashMap;

use ego_tree::NodeRef;
use scraper::{Html, Node};

/// Minimum difference ratio for two snapshots to count as distinct UI states.
pub const DEFAULT_CHANGE_THRESHOLD: f64 = 0.05;

/// Elements that never affect what the user sees.
const STRIPPED_ELEMENTS: [&str; 4] = ["script", "style", "meta", "noscript"];

/// The only attributes considered semantically relevant to visible UI state.
const ALLOWED_ATTRS: [&str; 4] = ["aria-label", "class", "role", "type"];

/// Reduce raw markup to a deterministic, pretty-printed structural form.
///
/// Stripped elements are dropped with their subtrees, attributes outside the
/// allow-list are removed, kept attributes are emitted in sorted order and
/// text is whitespace-collapsed. Two semantically identical trees normalize
/// to identical strings regardless of attribute ordering or whitespace noise.
pub fn normalize(markup: &str) -> String {
    let doc = Html::parse_document(markup);
    let mut out = String::new();
    for child in doc.tree.root().children() {
        write_node(child, 0, &mut out);
    }
    out
}

fn write_node(node: NodeRef<'_, Node>, depth: usize, out: &mut String) {
    match node.value() {
        Node::Element(el) => {
            let name = el.name();
            if STRIPPED_ELEMENTS.contains(&name) {
                return;
            }
            let mut attrs: Vec<(&str, &str)> = el
                .attrs()
                .filter(|(k, _)| ALLOWED_ATTRS.contains(k))
                .collect();
            attrs.sort_unstable_by_key(|(k, _)| *k);

            for _ in 0..depth {
                out.push(' ');
            }
            out.push('<');
            out.push_str(name);
            for (k, v) in attrs {
                out.push(' ');
                out.push_str(k);
                out.push_str("=\"");
                out.push_str(v);
                out.push('"');
            }
            out.push_str(">\n");

            for child in node.children() {
                write_node(child, depth + 1, out);
            }
        }
        Node::Text(text) => {
            let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if !collapsed.is_empty() {
                for _ in 0..depth {
                    out.push(' ');
                }
                out.push_str(&collapsed);
                out.push('\n');
            }
        }
        // Comments, doctype and processing instructions carry no UI state.
        _ => {}
    }
}

/// Decide whether two raw markup snapshots represent different UI states.
///
/// Exact equality of the normalized forms is the cheap path. Otherwise the
/// difference ratio `1 - similarity` of the normalized lines must exceed
/// `threshold` (default 5%) to count as a change.
pub fn changed(before_markup: &str, after_markup: &str, threshold: f64) -> bool {
    let before = normalize(before_markup);
    let after = normalize(after_markup);

    if before == after {
        return false;
    }
    if before.is_empty() && after.is_empty() {
        // No signal is not a change.
        return false;
    }

    let before_lines: Vec<&str> = before.lines().collect();
    let after_lines: Vec<&str> = after.lines().collect();
    let similarity = sequence_ratio(&before_lines, &after_lines);
    (1.0 - similarity) > threshold
}

/// Ratcliff/Obershelp matching ratio over two sequences, `2*M / T` where `M`
/// is the total length of matched blocks and `T` the combined length. 1.0
/// means identical, 0.0 means nothing in common.
fn sequence_ratio(a: &[&str], b: &[&str]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }

    let mut matches = 0usize;
    let mut pending = vec![(0usize, a.len(), 0usize, b.len())];
    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, size) = longest_match(a, b, alo, ahi, blo, bhi);
        if size == 0 {
            continue;
        }
        matches += size;
        pending.push((alo, i, blo, j));
        pending.push((i + size, ahi, j + size, bhi));
    }

    2.0 * matches as f64 / total as f64
}

/// Longest contiguous matching block within `a[alo..ahi]` and `b[blo..bhi]`.
fn longest_match(
    a: &[&str],
    b: &[&str],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let mut b_index: HashMap<&str, Vec<usize>> = HashMap::new();
    for (j, line) in b[blo..bhi].iter().enumerate() {
        b_index.entry(*line).or_default().push(blo + j);
    }

    let (mut best_i, mut best_j, mut best_size) = (alo, blo, 0usize);
    let mut run_lengths: HashMap<usize, usize> = HashMap::new();
    for i in alo..ahi {
        let mut new_runs: HashMap<usize, usize> = HashMap::new();
        if let Some(positions) = b_index.get(a[i]) {
            for &j in positions {
                let len = run_lengths
                    .get(&j.wrapping_sub(1))
                    .copied()
                    .unwrap_or(0)
                    + 1;
                new_runs.insert(j, len);
                if len > best_size {
                    best_i = i + 1 - len;
                    best_j = j + 1 - len;
                    best_size = len;
                }
            }
        }
        run_lengths = new_runs;
    }

    (best_i, best_j, best_size)
}
