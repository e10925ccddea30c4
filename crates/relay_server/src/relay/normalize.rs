#![forbid(unsafe_code)]

//! Text cleanup for feed metadata.

use relay_platform::irc;

/// Separator between detail lines.
pub const DETAIL_SEPARATOR: &str = " • ";

/// Separator between title, details and link.
pub const SEGMENT_SEPARATOR: &str = " - ";

/// Remove every occurrence of `placeholder`. Whitespace-only results become empty.
pub fn strip_placeholder(s: &str, placeholder: &str) -> String {
	let out = if placeholder.is_empty() {
		s.to_string()
	} else {
		s.replace(placeholder, "")
	};
	if out.trim().is_empty() { String::new() } else { out }
}

/// Replace whitespace runs with a single space and trim both ends.
pub fn collapse_whitespace(s: &str) -> String {
	s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Join the non-empty entries of `parts` with `separator`.
pub fn join_non_empty<I, S>(parts: I, separator: &str) -> String
where
	I: IntoIterator<Item = S>,
	S: AsRef<str>,
{
	let kept: Vec<S> = parts.into_iter().filter(|p| !p.as_ref().is_empty()).collect();
	let refs: Vec<&str> = kept.iter().map(AsRef::as_ref).collect();
	refs.join(separator)
}

/// Build the one-line announcement body from raw feed fields.
pub fn compose_announcement(title: &str, detail_lines: &[String], link_url: &str, placeholder: &str) -> String {
	let title = collapse_whitespace(&strip_placeholder(title, placeholder));
	let title = if title.is_empty() { title } else { irc::bold(&title) };

	let details = join_non_empty(
		detail_lines
			.iter()
			.filter(|line| placeholder.is_empty() || line.as_str() != placeholder),
		DETAIL_SEPARATOR,
	);
	let details = details.trim();
	let details = if details.is_empty() || details == DETAIL_SEPARATOR.trim() || details == DETAIL_SEPARATOR {
		String::new()
	} else {
		collapse_whitespace(details)
	};

	let url = strip_placeholder(link_url, placeholder).trim().to_string();

	let message = join_non_empty([title, details, url], SEGMENT_SEPARATOR);
	let message = message.replace(['\n', '\r'], "");
	let message = strip_placeholder(&message, placeholder);
	collapse_whitespace(&message)
}

#[cfg(test)]
mod tests {
	use proptest::prelude::*;

	use super::*;

	const PLACEHOLDER: &str = "Text - click to edit";

	fn lines(items: &[&str]) -> Vec<String> {
		items.iter().map(|s| s.to_string()).collect()
	}

	#[test]
	fn placeholder_only_input_collapses_to_empty() {
		let out = compose_announcement(PLACEHOLDER, &lines(&[PLACEHOLDER]), "", PLACEHOLDER);
		assert_eq!(out, "");
	}

	#[test]
	fn composes_title_details_and_link() {
		let out = compose_announcement("Episode 1", &lines(&["Artist A", "Song B"]), "http://x/1", "PLACEHOLDER");
		assert_eq!(out, "\u{2}Episode 1\u{2} - Artist A • Song B - http://x/1");
	}

	#[test]
	fn drops_every_placeholder_detail_and_blank_lines() {
		let out = compose_announcement(
			"  Live   Show ",
			&lines(&[PLACEHOLDER, "", "Band", PLACEHOLDER, "  Track\n  Two "]),
			&format!(" {PLACEHOLDER}"),
			PLACEHOLDER,
		);
		assert_eq!(out, "\u{2}Live Show\u{2} - Band • Track Two");
	}

	#[test]
	fn lone_separator_details_are_empty() {
		let out = compose_announcement("", &lines(&["•"]), "", PLACEHOLDER);
		assert_eq!(out, "");
	}

	#[test]
	fn link_only() {
		let out = compose_announcement("", &[], "https://example.com/ep", PLACEHOLDER);
		assert_eq!(out, "https://example.com/ep");
	}

	#[test]
	fn strip_placeholder_cases() {
		assert_eq!(strip_placeholder("a Text - click to edit b", PLACEHOLDER), "a  b");
		assert_eq!(strip_placeholder("  Text - click to edit  ", PLACEHOLDER), "");
		assert_eq!(strip_placeholder("keep", ""), "keep");
	}

	#[test]
	fn join_non_empty_skips_blanks() {
		assert_eq!(join_non_empty(["a", "", "b"], "-"), "a-b");
		assert_eq!(join_non_empty(["", ""], "-"), "");
	}

	proptest! {
		#[test]
		fn compose_never_leaks_placeholder_or_newlines(
			title in ".{0,40}",
			details in proptest::collection::vec(".{0,20}", 0..5),
			url in "[a-z:/.]{0,30}",
		) {
			let out = compose_announcement(&title, &details, &url, PLACEHOLDER);
			prop_assert!(!out.contains('\n'));
			prop_assert!(!out.contains(PLACEHOLDER));
			prop_assert_eq!(out.trim(), out.as_str());
			prop_assert!(!out.contains("  "));
		}

		#[test]
		fn compose_is_deterministic(title in ".{0,40}", url in ".{0,40}") {
			let details = vec![title.clone()];
			prop_assert_eq!(
				compose_announcement(&title, &details, &url, PLACEHOLDER),
				compose_announcement(&title, &details, &url, PLACEHOLDER)
			);
		}

		#[test]
		fn collapse_is_idempotent(s in ".{0,60}") {
			let once = collapse_whitespace(&s);
			prop_assert_eq!(collapse_whitespace(&once), once.clone());
		}
	}
}
