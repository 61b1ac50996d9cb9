//! Thought/solution section extraction
//!
//! Reasoning prompts ask the model to wrap its work in two delimited
//! sections. The buffer is re-parsed from scratch on every fragment, so
//! everything here is a pure function of the buffer text.

pub const BEGIN_THOUGHT: &str = "<|begin_of_thought|>";
pub const END_THOUGHT: &str = "<|end_of_thought|>";
pub const BEGIN_SOLUTION: &str = "<|begin_of_solution|>";
pub const END_SOLUTION: &str = "<|end_of_solution|>";

/// Which markers appear anywhere in a buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarkerState {
    pub has_begin_thought: bool,
    pub has_end_thought: bool,
    pub has_begin_solution: bool,
    pub has_end_solution: bool,
}

impl MarkerState {
    pub fn scan(buffer: &str) -> Self {
        Self {
            has_begin_thought: buffer.contains(BEGIN_THOUGHT),
            has_end_thought: buffer.contains(END_THOUGHT),
            has_begin_solution: buffer.contains(BEGIN_SOLUTION),
            has_end_solution: buffer.contains(END_SOLUTION),
        }
    }

    /// A section was opened but never closed.
    ///
    /// Only meaningful on the final buffer: mid-stream the end marker may
    /// simply not have arrived yet.
    pub fn missing_end_tag(&self) -> bool {
        (self.has_begin_thought && !self.has_end_thought)
            || (self.has_begin_solution && !self.has_end_solution)
    }
}

/// The sections currently inferable from a buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParsedSections<'a> {
    pub thought: Option<&'a str>,
    pub solution: Option<&'a str>,
    pub thought_closed: bool,
    pub solution_closed: bool,
    pub markers: MarkerState,
}

impl<'a> ParsedSections<'a> {
    /// Split a finished buffer into its thought and solution sections.
    ///
    /// Markers are searched left to right, first match wins. The solution
    /// is only looked for after a closed thought, or anywhere when no
    /// thought was started. Out-of-order or duplicated markers are not
    /// supported input; they never panic and never move text out of a
    /// section that is already closed.
    pub fn parse(buffer: &'a str) -> Self {
        Self::parse_with(buffer, false)
    }

    /// Like [`ParsedSections::parse`] for a buffer that is still growing.
    ///
    /// An open section ending in an incomplete end marker keeps that tail
    /// back until the next fragment settles it.
    pub fn parse_streaming(buffer: &'a str) -> Self {
        Self::parse_with(buffer, true)
    }

    fn parse_with(buffer: &'a str, hold_back: bool) -> Self {
        let mut sections = Self {
            markers: MarkerState::scan(buffer),
            ..Self::default()
        };

        let solution_zone = match buffer.find(BEGIN_THOUGHT) {
            Some(start) => {
                let section = Section::extract(&buffer[start + BEGIN_THOUGHT.len()..], END_THOUGHT, hold_back);
                sections.thought = Some(section.content);
                sections.thought_closed = section.closed;
                section.rest
            }
            None => Some(buffer),
        };

        if let Some(zone) = solution_zone {
            if let Some(start) = zone.find(BEGIN_SOLUTION) {
                let section =
                    Section::extract(&zone[start + BEGIN_SOLUTION.len()..], END_SOLUTION, hold_back);
                sections.solution = Some(section.content);
                sections.solution_closed = section.closed;
            }
        }

        sections
    }

    /// Neither section has started yet
    pub fn is_empty(&self) -> bool {
        self.thought.is_none() && self.solution.is_none()
    }

    pub fn missing_end_tag(&self) -> bool {
        self.markers.missing_end_tag()
    }
}

struct Section<'a> {
    content: &'a str,
    closed: bool,
    /// Text after the end marker, once there is one
    rest: Option<&'a str>,
}

impl<'a> Section<'a> {
    fn extract(after_begin: &'a str, end_marker: &str, hold_back: bool) -> Self {
        match after_begin.find(end_marker) {
            Some(end) => Self {
                content: &after_begin[..end],
                closed: true,
                rest: Some(&after_begin[end + end_marker.len()..]),
            },
            None => Self {
                content: if hold_back {
                    hold_back_partial_marker(after_begin, end_marker)
                } else {
                    after_begin
                },
                closed: false,
                rest: None,
            },
        }
    }
}

/// Drop a trailing, incomplete copy of `marker` from an open section.
///
/// A marker split across two fragments would otherwise flash into the
/// section content and vanish again on the next fragment.
fn hold_back_partial_marker<'a>(content: &'a str, marker: &str) -> &'a str {
    (1..marker.len())
        .rev()
        .find(|&len| content.ends_with(&marker[..len]))
        .map(|len| &content[..content.len() - len])
        .unwrap_or(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_sections() {
        let buffer = "<|begin_of_thought|>step one<|end_of_thought|><|begin_of_solution|>42<|end_of_solution|>";
        let sections = ParsedSections::parse(buffer);

        assert_eq!(sections.thought, Some("step one"));
        assert_eq!(sections.solution, Some("42"));
        assert!(sections.thought_closed);
        assert!(sections.solution_closed);
        assert!(!sections.missing_end_tag());
    }

    #[test]
    fn test_open_thought() {
        let sections = ParsedSections::parse("<|begin_of_thought|>still thinking");

        assert_eq!(sections.thought, Some("still thinking"));
        assert!(!sections.thought_closed);
        assert!(sections.solution.is_none());
        assert!(sections.missing_end_tag());
    }

    #[test]
    fn test_no_markers() {
        let sections = ParsedSections::parse("plain answer");
        assert!(sections.is_empty());
        assert!(!sections.missing_end_tag());

        let sections = ParsedSections::parse("");
        assert!(sections.is_empty());
    }

    #[test]
    fn test_solution_without_thought() {
        let sections = ParsedSections::parse("intro <|begin_of_solution|>x = 2");
        assert!(sections.thought.is_none());
        assert_eq!(sections.solution, Some("x = 2"));
        assert!(!sections.solution_closed);
        assert!(sections.missing_end_tag());
    }

    #[test]
    fn test_solution_not_searched_inside_open_thought() {
        let sections =
            ParsedSections::parse("<|begin_of_thought|>maybe <|begin_of_solution|>early");
        assert_eq!(sections.thought, Some("maybe <|begin_of_solution|>early"));
        assert!(sections.solution.is_none());
    }

    #[test]
    fn test_empty_section_content() {
        let sections = ParsedSections::parse("<|begin_of_thought|><|end_of_thought|>");
        assert_eq!(sections.thought, Some(""));
        assert!(sections.thought_closed);
    }

    #[test]
    fn test_partial_end_marker_is_held_back() {
        let sections = ParsedSections::parse_streaming("<|begin_of_thought|>abc<|end_of_th");
        assert_eq!(sections.thought, Some("abc"));

        let sections = ParsedSections::parse_streaming("<|begin_of_thought|>a < b");
        assert_eq!(sections.thought, Some("a < b"));
    }

    #[test]
    fn test_finished_open_section_keeps_trailing_text() {
        let sections = ParsedSections::parse("<|begin_of_thought|>so we need x <");
        assert_eq!(sections.thought, Some("so we need x <"));

        let sections = ParsedSections::parse("<|begin_of_solution|>x = 2 <|end_of_sol");
        assert_eq!(sections.solution, Some("x = 2 <|end_of_sol"));
    }

    #[test]
    fn test_open_thought_grows_by_prefix() {
        let full = "<|begin_of_thought|>first, second<|end_of_thought|> tail";
        let mut previous = String::new();

        for end in BEGIN_THOUGHT.len()..=full.len() {
            let sections = ParsedSections::parse_streaming(&full[..end]);
            let thought = sections.thought.unwrap_or_default();
            assert!(
                thought.starts_with(previous.as_str()),
                "{thought:?} does not extend {previous:?}"
            );
            previous = thought.to_string();
        }
        assert_eq!(previous, "first, second");
    }

    #[test]
    fn test_closed_thought_never_changes() {
        let buffer = "<|begin_of_thought|>fixed<|end_of_thought|>";
        let before = ParsedSections::parse(buffer).thought;

        for suffix in ["more", "<|end_of_thought|>again", "<|begin_of_thought|>other"] {
            let extended = format!("{buffer}{suffix}");
            assert_eq!(ParsedSections::parse(&extended).thought, before);
        }
    }

    #[test]
    fn test_out_of_order_markers_do_not_panic() {
        let inputs = [
            "<|begin_of_solution|>a<|begin_of_thought|>b",
            "<|end_of_thought|><|begin_of_thought|>",
            "<|begin_of_thought|>x<|end_of_thought|><|begin_of_solution|>1<|end_of_solution|><|begin_of_solution|>2",
            "<|end_of_solution|><|begin_of_solution|>",
        ];
        for input in inputs {
            let _ = ParsedSections::parse(input);
        }

        let sections = ParsedSections::parse(inputs[2]);
        assert_eq!(sections.thought, Some("x"));
        assert_eq!(sections.solution, Some("1"));
    }

    #[test]
    fn test_parse_is_idempotent() {
        let buffer = "<|begin_of_thought|>a<|end_of_thought|><|begin_of_solution|>b";
        assert_eq!(ParsedSections::parse(buffer), ParsedSections::parse(buffer));
    }
}
