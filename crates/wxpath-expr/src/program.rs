use std::fmt;

/// Slash prefix of a one-hop `url(...)` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlAxis {
    /// `/url(x)`
    Child,
    /// `//url(x)`
    Descendant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `!`, the XPath simple-map operator.
    SimpleMap,
    /// `||`, string concatenation.
    Concat,
}

/// One step of a parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Seed fetch: `url('...')`, optionally a deep-crawl root via `follow=`
    /// and a per-subtree depth cap via `depth=`.
    UrlLit {
        url: String,
        follow: Option<String>,
        depth: Option<usize>,
    },
    /// One-hop fetch of every URL the XPath produces.
    UrlEval { axis: UrlAxis, xpath: String },
    /// Recursive re-enqueue of every URL the XPath produces, up to the
    /// run's maximum depth.
    UrlDeep { xpath: String },
    /// Plain XPath evaluated on the current context.
    XPath { expr: String },
    /// `left ! right` or `left || right`.
    Binary {
        op: BinaryOp,
        left: Box<Segment>,
        right: Box<Segment>,
    },
    /// `map{'key':xpath, ...}`, one ordered map per context node.
    MapLit { entries: Vec<(String, String)> },
}

/// The ordered, normalised, immutable list of segments produced by
/// [`parse`](crate::parse). Displaying a program renders the normalised
/// expression; reparsing that text yields a structurally identical program.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    segments: Vec<Segment>,
}

impl Program {
    pub(crate) fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The `UrlLit` head.
    pub fn seed(&self) -> &Segment {
        &self.segments[0]
    }

    /// Index of the `UrlDeep` segment, if the program has one.
    pub fn deep_position(&self) -> Option<usize> {
        self.segments
            .iter()
            .position(|s| matches!(s, Segment::UrlDeep { .. }))
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for seg in &self.segments {
            // Top-level map literals carry their separating slash.
            if starts_with_map(seg) {
                write!(f, "/")?;
            }
            write!(f, "{seg}")?;
        }
        Ok(())
    }
}

/// True when the rendered segment starts with `map{`, which needs its `/`
/// separator back at the top level.
fn starts_with_map(seg: &Segment) -> bool {
    match seg {
        Segment::MapLit { .. } => true,
        Segment::Binary { left, .. } => starts_with_map(left),
        _ => false,
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::UrlLit { url, follow, depth } => {
                write!(f, "url('{url}'")?;
                if let Some(x) = follow {
                    write!(f, ", follow={x}")?;
                }
                if let Some(d) = depth {
                    write!(f, ", depth={d}")?;
                }
                write!(f, ")")
            }
            Segment::UrlEval {
                axis: UrlAxis::Child,
                xpath,
            } => write!(f, "/url({xpath})"),
            Segment::UrlEval {
                axis: UrlAxis::Descendant,
                xpath,
            } => write!(f, "//url({xpath})"),
            Segment::UrlDeep { xpath } => write!(f, "///url({xpath})"),
            Segment::XPath { expr } => write!(f, "{expr}"),
            Segment::MapLit { entries } => {
                write!(f, "map{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "'{k}':{v}")?;
                }
                write!(f, "}}")
            }
            Segment::Binary { op, left, right } => {
                let op = match op {
                    BinaryOp::SimpleMap => "!",
                    BinaryOp::Concat => "||",
                };
                write!(f, "{left} {op} {right}")
            }
        }
    }
}
