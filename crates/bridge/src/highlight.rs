//! Translation of engine highlight groups into host decorations.
//!
//! A group resolves to exactly one of: ignored (the span is dropped), a
//! configured style, or the unknown-group style. Resolutions are memoized,
//! so an unknown group is reported once no matter how often it recurs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use parking_lot::Mutex;
use ropey::Rope;
use serde::Deserialize;

use crate::position::{EnginePos, OffsetEncoding, Range, engine_to_host};

/// Host style for a decoration. Values are passed to the host verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DecorationStyle {
	/// Foreground color.
	pub color: Option<String>,
	/// Background color.
	pub background_color: Option<String>,
	/// Border shorthand.
	pub border: Option<String>,
	/// Border color.
	pub border_color: Option<String>,
	/// Font weight.
	pub font_weight: Option<String>,
	/// Font style.
	pub font_style: Option<String>,
	/// Text decoration shorthand.
	pub text_decoration: Option<String>,
}

/// Whether engine decorations sit above or below the host's own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecorationPlacement {
	/// Drawn over host decorations.
	Above,
	/// Drawn under host decorations.
	#[default]
	Below,
}

/// Outcome of resolving a group name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
	/// Spans of this group are dropped.
	Ignored,
	/// A configured style.
	Mapped(Arc<DecorationStyle>),
	/// No mapping; the unknown-group style applies.
	Unknown(Arc<DecorationStyle>),
}

/// A highlighted range reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighlightSpan {
	/// Highlight group name.
	pub group: String,
	/// 0-based line.
	pub line: u32,
	/// Start byte column.
	pub start_col: u32,
	/// End byte column, exclusive.
	pub end_col: u32,
}

/// Decorations of one group, ready for the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoration {
	/// Highlight group name.
	pub group: String,
	/// Style to draw with.
	pub style: Arc<DecorationStyle>,
	/// Layering relative to host decorations.
	pub placement: DecorationPlacement,
	/// Ranges in host coordinates.
	pub ranges: Vec<Range>,
}

/// Highlight rule set for a session.
#[derive(Debug)]
pub struct HighlightRules {
	ignore: GlobSet,
	styles: HashMap<String, Arc<DecorationStyle>>,
	unknown: Arc<DecorationStyle>,
	placement: DecorationPlacement,
	resolved: Mutex<HashMap<String, Resolution>>,
}

impl HighlightRules {
	/// Builds a rule set. `ignore` holds glob patterns over group names.
	///
	/// # Errors
	///
	/// Returns the offending pattern's error if a glob does not parse.
	pub fn new(
		ignore: &[String],
		styles: BTreeMap<String, DecorationStyle>,
		unknown: DecorationStyle,
		placement: DecorationPlacement,
	) -> Result<Self, globset::Error> {
		let mut builder = GlobSetBuilder::new();
		for pattern in ignore {
			builder.add(Glob::new(pattern)?);
		}
		Ok(Self {
			ignore: builder.build()?,
			styles: styles.into_iter().map(|(group, style)| (group, Arc::new(style))).collect(),
			unknown: Arc::new(unknown),
			placement,
			resolved: Mutex::new(HashMap::new()),
		})
	}

	/// Placement applied to every decoration.
	pub fn placement(&self) -> DecorationPlacement {
		self.placement
	}

	/// Resolves a group name. Ignore patterns win over mappings.
	pub fn resolve(&self, group: &str) -> Resolution {
		let mut resolved = self.resolved.lock();
		if let Some(hit) = resolved.get(group) {
			return hit.clone();
		}

		let resolution = if self.ignore.is_match(group) {
			Resolution::Ignored
		} else if let Some(style) = self.styles.get(group) {
			Resolution::Mapped(style.clone())
		} else {
			tracing::warn!(group, "unknown highlight group; using fallback style");
			Resolution::Unknown(self.unknown.clone())
		};

		resolved.insert(group.to_owned(), resolution.clone());
		resolution
	}

	/// Translates engine spans into host decorations, one per group.
	///
	/// Spans on lines outside `text` are dropped.
	pub fn translate(&self, text: &Rope, spans: &[HighlightSpan], encoding: OffsetEncoding) -> Vec<Decoration> {
		let mut groups: BTreeMap<&str, Decoration> = BTreeMap::new();

		for span in spans {
			let style = match self.resolve(&span.group) {
				Resolution::Ignored => continue,
				Resolution::Mapped(style) | Resolution::Unknown(style) => style,
			};
			let start = engine_to_host(text, EnginePos::new(span.line, span.start_col), encoding);
			let end = engine_to_host(text, EnginePos::new(span.line, span.end_col), encoding);
			let (Some(start), Some(end)) = (start, end) else {
				tracing::debug!(group = %span.group, line = span.line, "highlight span outside the buffer");
				continue;
			};

			groups
				.entry(span.group.as_str())
				.or_insert_with(|| Decoration {
					group: span.group.clone(),
					style,
					placement: self.placement,
					ranges: Vec::new(),
				})
				.ranges
				.push(Range::new(start, end));
		}

		groups.into_values().collect()
	}
}
