//! Response formatting for display
//!
//! The render pipeline runs on the whole buffer every time a fragment
//! arrives: the tag extractor splits the buffer into sections, then each
//! section goes through the math rewriter. Nothing here can fail.

pub mod math;
pub mod tags;

pub use math::rewrite_math;
pub use tags::{MarkerState, ParsedSections};

/// Heading placed before thought content
pub const THOUGHT_HEADING: &str = "### Thought";

/// Heading placed before solution content
pub const SOLUTION_HEADING: &str = "### Solution";

/// Appended to every frame while the reply is still streaming
pub const STREAMING_CURSOR: &str = "▌";

/// Appended to a finished reply that left a section open
pub const TRUNCATION_WARNING: &str =
    "⚠️ *Note: Response was cut off due to token limit. Some sections may be incomplete.*";

/// Where the buffer is in its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPhase {
    /// More fragments may follow
    Streaming,
    /// The endpoint closed the stream; the buffer is final
    Complete,
}

/// Render a buffer for display.
///
/// With `tagged` off the buffer is shown as-is apart from math rewriting.
pub fn render(buffer: &str, tagged: bool, phase: RenderPhase) -> String {
    let mut out = if tagged {
        render_sections(buffer, phase)
    } else {
        rewrite_math(buffer)
    };

    match phase {
        RenderPhase::Streaming => out.push_str(STREAMING_CURSOR),
        RenderPhase::Complete => {
            if is_truncated(buffer, tagged) {
                if !out.is_empty() {
                    out.push_str("\n\n");
                }
                out.push_str(TRUNCATION_WARNING);
            }
        }
    }

    out
}

/// Whether a finished buffer opened a section it never closed.
///
/// Only call this once generation is over.
pub fn is_truncated(buffer: &str, tagged: bool) -> bool {
    tagged && MarkerState::scan(buffer).missing_end_tag()
}

fn render_sections(buffer: &str, phase: RenderPhase) -> String {
    let sections = match phase {
        RenderPhase::Streaming => ParsedSections::parse_streaming(buffer),
        RenderPhase::Complete => ParsedSections::parse(buffer),
    };
    if sections.is_empty() {
        return rewrite_math(buffer);
    }

    let mut parts = Vec::with_capacity(2);
    if let Some(thought) = sections.thought {
        parts.push(section(THOUGHT_HEADING, thought));
    }
    if let Some(solution) = sections.solution {
        parts.push(section(SOLUTION_HEADING, solution));
    }

    parts.join("\n\n")
}

fn section(heading: &str, content: &str) -> String {
    let content = rewrite_math(content.trim());
    if content.is_empty() {
        heading.to_string()
    } else {
        format!("{}\n\n{}", heading, content)
    }
}
