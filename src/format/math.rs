//! Display rewriting for math notation
//!
//! Math is recognized only in `$$` form: an inline `$$ ... $$` span on one
//! line, or a block fenced by lines holding nothing but `$$`. The content of
//! either form has its control words swapped for glyphs, single-letter set
//! expressions spelled out, and is re-emitted in `$$` display form. Text
//! outside those spans is never touched. Unbalanced delimiters are left as
//! literal text.
//!
//! There is no LaTeX parser here. Every rule is a plain text substitution.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

/// Display-math delimiter
pub const MATH_FENCE: &str = "$$";

/// Control words rewritten to a single glyph, looked up by whole word
const SYMBOLS: &[(&str, &str)] = &[
    ("cup", "∪"),
    ("cap", "∩"),
    ("subset", "⊂"),
    ("subseteq", "⊆"),
    ("supset", "⊃"),
    ("supseteq", "⊇"),
    ("in", "∈"),
    ("notin", "∉"),
    ("ni", "∋"),
    ("emptyset", "∅"),
    ("varnothing", "∅"),
    ("setminus", "∖"),
    ("forall", "∀"),
    ("exists", "∃"),
    ("neg", "¬"),
    ("land", "∧"),
    ("lor", "∨"),
    ("implies", "⟹"),
    ("iff", "⟺"),
    ("rightarrow", "→"),
    ("leftarrow", "←"),
    ("Rightarrow", "⇒"),
    ("Leftrightarrow", "⇔"),
    ("to", "→"),
    ("leq", "≤"),
    ("geq", "≥"),
    ("neq", "≠"),
    ("approx", "≈"),
    ("times", "×"),
    ("cdot", "·"),
    ("pm", "±"),
    ("infty", "∞"),
];

/// Glyph forms spelled out when both operands are single letters
const PHRASES: &[(&str, &str)] = &[
    ("∪", "union"),
    ("∩", "intersection"),
    ("⊆", "is a subset of"),
    ("⊂", "is a proper subset of"),
    ("⊇", "is a superset of"),
    ("⊃", "is a proper superset of"),
    ("∈", "is an element of"),
    ("∉", "is not an element of"),
    ("∖", "minus"),
];

static PHRASE_PATTERNS: Lazy<Vec<(Regex, String)>> = Lazy::new(|| {
    PHRASES
        .iter()
        .map(|(glyph, phrase)| {
            let pattern = format!(r"\b([A-Za-z])\s*{}\s*([A-Za-z])\b", regex::escape(glyph));
            let regex = Regex::new(&pattern).expect("phrase pattern is valid");
            (regex, format!("${{1}} {} ${{2}}", phrase))
        })
        .collect()
});

fn lookup(word: &str) -> Option<&'static str> {
    SYMBOLS
        .iter()
        .find(|(name, _)| *name == word)
        .map(|(_, glyph)| *glyph)
}

/// Replace known `\word` control sequences with their glyphs.
///
/// Whole control words are matched, so `\in` never eats the front of
/// `\infty`. Unknown words are kept as written.
pub fn substitute_symbols(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find('\\') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let word_len = after
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(after.len());
        let word = &after[..word_len];

        match lookup(word) {
            Some(glyph) => out.push_str(glyph),
            None => {
                out.push('\\');
                out.push_str(word);
            }
        }
        rest = &after[word_len..];
    }

    out.push_str(rest);
    out
}

/// Rewrite every recognized `$$` span or block in `text`
pub fn rewrite_math(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut i = 0;

    while i < lines.len() {
        if is_fence(lines[i]) {
            let close = lines[i + 1..]
                .iter()
                .position(|line| is_fence(line))
                .map(|offset| i + 1 + offset);

            if let Some(close) = close {
                let body = lines[i + 1..close].join("\n");
                if !body.trim().is_empty() {
                    out.push(format!(
                        "{MATH_FENCE}\n{}\n{MATH_FENCE}",
                        rewrite_content(body.trim_matches('\n'))
                    ));
                    i = close + 1;
                    continue;
                }
            }
        }

        out.push(rewrite_inline(lines[i]));
        i += 1;
    }

    out.join("\n")
}

fn is_fence(line: &str) -> bool {
    line.trim() == MATH_FENCE
}

fn rewrite_inline(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;

    while let Some(open) = rest.find(MATH_FENCE) {
        let after = &rest[open + MATH_FENCE.len()..];
        let Some(close) = after.find(MATH_FENCE) else {
            break;
        };

        let content = after[..close].trim();
        if content.is_empty() {
            // `$$$$` is not a span; move past the first fence only
            out.push_str(&rest[..open + MATH_FENCE.len()]);
            rest = after;
            continue;
        }

        out.push_str(&rest[..open]);
        out.push_str(MATH_FENCE);
        out.push_str(&rewrite_content(content));
        out.push_str(MATH_FENCE);
        rest = &after[close + MATH_FENCE.len()..];
    }

    out.push_str(rest);
    out
}

fn rewrite_content(content: &str) -> String {
    process_math_expressions(&substitute_symbols(content))
}

/// Spell out set glyphs between single-letter operands (`A ∪ B` -> `A union B`).
///
/// Chains are spelled out link by link, so `A ∪ B ∪ C` becomes
/// `A union B union C`. Multi-character operands keep the symbolic form.
pub fn process_math_expressions(text: &str) -> String {
    PHRASE_PATTERNS
        .iter()
        .fold(text.to_string(), |acc, (regex, replacement)| {
            spell_out(regex, replacement, acc)
        })
}

/// Matches can share an operand, so repeat until nothing is left.
/// Every pass removes at least one glyph.
fn spell_out(regex: &Regex, replacement: &str, mut text: String) -> String {
    loop {
        let next = match regex.replace_all(&text, replacement) {
            Cow::Owned(next) => next,
            Cow::Borrowed(_) => break,
        };
        text = next;
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_span() {
        assert_eq!(rewrite_math(r"$$A \cup B$$"), "$$A union B$$");
        assert_eq!(
            rewrite_math(r"so $$x \in S$$ and $$ST \subseteq T$$."),
            "so $$x is an element of S$$ and $$ST ⊆ T$$."
        );
    }

    #[test]
    fn test_fenced_block() {
        let input = "Result:\n$$\nA \\cap B = \\emptyset\n$$\ndone";
        assert_eq!(
            rewrite_math(input),
            "Result:\n$$\nA intersection B = ∅\n$$\ndone"
        );
    }

    #[test]
    fn test_unclosed_fence_is_literal() {
        let input = "$$\nA \\cup B";
        assert_eq!(rewrite_math(input), input);

        let input = r"cost is $$ \cup";
        assert_eq!(rewrite_math(input), input);
    }

    #[test]
    fn test_text_outside_math_untouched() {
        let input = r"the path C:\temp \cup is not math";
        assert_eq!(rewrite_math(input), input);
    }

    #[test]
    fn test_empty_span_skipped() {
        assert_eq!(rewrite_math(r"$$$$x \leq y$$"), "$$$$x ≤ y$$");
    }

    #[test]
    fn test_whole_word_lookup() {
        assert_eq!(substitute_symbols(r"\in \infty \notin"), "∈ ∞ ∉");
        assert_eq!(substitute_symbols(r"\subset \subseteq"), "⊂ ⊆");
        assert_eq!(substitute_symbols(r"\frac{1}{2}"), r"\frac{1}{2}");
        assert_eq!(substitute_symbols(r"a \\ b \"), r"a \\ b \");
    }

    #[test]
    fn test_phrases_single_letter_operands() {
        assert_eq!(process_math_expressions("$$A ∪ B$$"), "$$A union B$$");
        assert_eq!(process_math_expressions("x ∈ S"), "x is an element of S");
        assert_eq!(process_math_expressions("AB ∪ C"), "AB ∪ C");
        assert_eq!(process_math_expressions("A ∩ BC"), "A ∩ BC");
    }

    #[test]
    fn test_chained_expression_fully_spelled_out() {
        assert_eq!(
            rewrite_math(r"$$A \cup B \cup C$$"),
            "$$A union B union C$$"
        );
        assert_eq!(
            process_math_expressions("A ∪ B ∩ C"),
            "A union B intersection C"
        );
        assert_eq!(process_math_expressions("A ∪ BC ∪ D"), "A ∪ BC ∪ D");
    }

    #[test]
    fn test_glyphs_outside_spans_untouched() {
        let prose = "we know x ∈ S and A ∪ B is finite";
        assert_eq!(rewrite_math(prose), prose);
        assert_eq!(
            rewrite_math(r"x ∈ S, so $$x \in T$$"),
            "x ∈ S, so $$x is an element of T$$"
        );
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let input = "$$\nA \\cup B\n$$\nand $$x \\in S$$";
        let once = rewrite_math(input);
        assert_eq!(rewrite_math(&once), once);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(rewrite_math(""), "");
        assert_eq!(process_math_expressions(""), "");
    }
}
