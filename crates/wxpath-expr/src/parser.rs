use crate::error::ParseError;
use crate::lexer::{Boundary, Scanner};
use crate::program::{BinaryOp, Program, Segment, UrlAxis};

/// Parses an expression into its normalised segment program.
///
/// Normalisation folds trailing `url(.)` forms into their prefixed
/// equivalents (`a/@href/url(.)` becomes `/url(a/@href)`), so the
/// interpreter only ever sees prefixed `url` segments.
pub fn parse(input: &str) -> Result<Program, ParseError> {
    Parser::new(input).run()
}

struct Parser<'a> {
    sc: Scanner<'a>,
    segments: Vec<Segment>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            sc: Scanner::new(input),
            segments: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Program, ParseError> {
        self.sc.eat_ws();
        self.seed()?;
        loop {
            self.sc.eat_ws();
            if self.sc.is_empty() {
                break;
            }
            if self.sc.eat("||") {
                self.binary(BinaryOp::Concat)?;
            } else if self.sc.starts_with("!") && !self.sc.starts_with("!=") {
                self.sc.eat("!");
                self.binary(BinaryOp::SimpleMap)?;
            } else if self.sc.peek() == Some('/') {
                self.step()?;
            } else {
                return Err(ParseError::new(
                    self.sc.pos(),
                    "expected '/', '!' or '||' before the next step",
                ));
            }
        }
        let program = Program::new(self.segments);
        validate(&program)?;
        Ok(program)
    }

    /// `url('...')` with optional `follow=` / `depth=` arguments.
    fn seed(&mut self) -> Result<(), ParseError> {
        if !self.sc.eat("url(") {
            return Err(ParseError::new(
                self.sc.pos(),
                "expression must start with url('...')",
            ));
        }
        self.sc.eat_ws();
        if !matches!(self.sc.peek(), Some('\'' | '"')) {
            return Err(ParseError::new(
                self.sc.pos(),
                "the seed url(...) takes a quoted URL",
            ));
        }
        let url = self.sc.scan_string()?;
        let mut follow = None;
        let mut depth = None;
        loop {
            self.sc.eat_ws();
            if self.sc.eat(")") {
                break;
            }
            if !self.sc.eat(",") {
                return Err(ParseError::new(
                    self.sc.pos(),
                    "expected ',' or ')' in url(...)",
                ));
            }
            self.sc.eat_ws();
            if self.sc.eat("follow=") {
                let at = self.sc.pos();
                let xp = self.sc.scan_xpath(Boundary::Arg)?;
                if xp.is_empty() {
                    return Err(ParseError::new(at, "empty follow= XPath"));
                }
                follow = Some(xp.to_string());
            } else if self.sc.eat("depth=") {
                depth = Some(self.sc.scan_integer()?);
            } else {
                return Err(ParseError::new(
                    self.sc.pos(),
                    "unknown url(...) argument, expected follow= or depth=",
                ));
            }
        }
        self.segments.push(Segment::UrlLit { url, follow, depth });
        Ok(())
    }

    /// A slash-prefixed step: `url(...)`, `map{...}`, or an XPath fragment.
    fn step(&mut self) -> Result<(), ParseError> {
        let slashes = self.sc.peek_slashes();
        let after = &self.sc.rest()[slashes..];
        if after.starts_with("url(") {
            for _ in 0..slashes {
                self.sc.bump();
            }
            self.sc.eat("url(");
            self.url_step(slashes)
        } else if after.starts_with("map{") {
            for _ in 0..slashes {
                self.sc.bump();
            }
            self.sc.eat("map{");
            let entries = self.map_entries()?;
            self.segments.push(Segment::MapLit { entries });
            Ok(())
        } else {
            let at = self.sc.pos();
            let expr = self.sc.scan_xpath(Boundary::Segment)?.to_string();
            if expr.is_empty() {
                return Err(ParseError::new(at, "empty XPath step"));
            }
            self.segments.push(Segment::XPath { expr });
            Ok(())
        }
    }

    /// Body of a non-seed `url(...)`. `slashes` is the prefix length:
    /// 1 child, 2 descendant, 3 deep.
    fn url_step(&mut self, slashes: usize) -> Result<(), ParseError> {
        let at = self.sc.pos();
        self.sc.eat_ws();
        let inner = self.sc.scan_xpath(Boundary::Arg)?.to_string();
        self.sc.eat_ws();
        if self.sc.starts_with(",") {
            return Err(ParseError::new(
                self.sc.pos(),
                "follow=/depth= are only valid on the seed url(...)",
            ));
        }
        if !self.sc.eat(")") {
            return Err(ParseError::new(self.sc.pos(), "unclosed url(...)"));
        }
        if inner.is_empty() {
            return Err(ParseError::new(at, "url(...) needs an XPath argument"));
        }
        let seg = if inner == "." {
            // `prev/url(.)` folds into the prefixed form.
            let prev = match self.segments.pop() {
                Some(Segment::XPath { expr }) => expr,
                other => {
                    if let Some(seg) = other {
                        self.segments.push(seg);
                    }
                    return Err(ParseError::new(at, "url(.) must follow an XPath step"));
                }
            };
            match slashes {
                3 => Segment::UrlDeep { xpath: prev },
                2 => Segment::UrlEval {
                    axis: UrlAxis::Descendant,
                    xpath: prev,
                },
                _ => {
                    let axis = if prev.starts_with("//") {
                        UrlAxis::Descendant
                    } else {
                        UrlAxis::Child
                    };
                    Segment::UrlEval { axis, xpath: prev }
                }
            }
        } else {
            match slashes {
                3 => Segment::UrlDeep { xpath: inner },
                2 => Segment::UrlEval {
                    axis: UrlAxis::Descendant,
                    xpath: inner,
                },
                _ => Segment::UrlEval {
                    axis: UrlAxis::Child,
                    xpath: inner,
                },
            }
        };
        self.segments.push(seg);
        Ok(())
    }

    /// Entries of `map{'k':xpath, ...}`; the opening `map{` is consumed.
    fn map_entries(&mut self) -> Result<Vec<(String, String)>, ParseError> {
        let mut entries = Vec::new();
        loop {
            self.sc.eat_ws();
            if self.sc.eat("}") {
                break;
            }
            let key = self.sc.scan_string()?;
            self.sc.eat_ws();
            if !self.sc.eat(":") {
                return Err(ParseError::new(self.sc.pos(), "expected ':' after map key"));
            }
            self.sc.eat_ws();
            let at = self.sc.pos();
            let value = self.sc.scan_xpath(Boundary::Arg)?.to_string();
            if value.is_empty() {
                return Err(ParseError::new(at, "empty map value"));
            }
            entries.push((key, value));
            self.sc.eat_ws();
            if self.sc.eat(",") {
                continue;
            }
            if self.sc.eat("}") {
                break;
            }
            return Err(ParseError::new(
                self.sc.pos(),
                "expected ',' or '}' in map{...}",
            ));
        }
        if entries.is_empty() {
            return Err(ParseError::new(
                self.sc.pos(),
                "map{...} needs at least one entry",
            ));
        }
        Ok(entries)
    }

    /// `left ! right` / `left || right`; the operator is consumed, the left
    /// operand is the previously parsed segment.
    fn binary(&mut self, op: BinaryOp) -> Result<(), ParseError> {
        let left = match self.segments.pop() {
            Some(
                seg @ (Segment::XPath { .. } | Segment::MapLit { .. } | Segment::Binary { .. }),
            ) => seg,
            other => {
                if let Some(seg) = other {
                    self.segments.push(seg);
                }
                return Err(ParseError::new(
                    self.sc.pos(),
                    "binary operator needs an XPath left operand",
                ));
            }
        };
        self.sc.eat_ws();
        let right = if self.sc.eat("map{") {
            Segment::MapLit {
                entries: self.map_entries()?,
            }
        } else {
            let at = self.sc.pos();
            let expr = self.sc.scan_xpath(Boundary::Segment)?.to_string();
            if expr.is_empty() {
                return Err(ParseError::new(at, "binary operator needs a right operand"));
            }
            Segment::XPath { expr }
        };
        self.segments.push(Segment::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        });
        Ok(())
    }
}

/// Post-parse validation of the program invariants.
fn validate(program: &Program) -> Result<(), ParseError> {
    let segs = program.segments();
    let follow = match segs.first() {
        Some(Segment::UrlLit { follow, .. }) => follow.is_some(),
        _ => {
            return Err(ParseError::new(0, "expression must start with url('...')"));
        }
    };
    let mut deep = usize::from(follow);
    for (i, seg) in segs.iter().enumerate() {
        match seg {
            Segment::UrlLit { .. } if i > 0 => {
                return Err(ParseError::new(
                    0,
                    "url('...') literals are only valid as the first step",
                ));
            }
            Segment::UrlDeep { xpath } => {
                deep += 1;
                if deep > 1 {
                    return Err(ParseError::new(
                        0,
                        "at most one deep crawl (///url or follow=) per expression",
                    ));
                }
                check_relative(segs, i, xpath)?;
            }
            Segment::UrlEval { xpath, .. } => check_relative(segs, i, xpath)?,
            _ => {}
        }
    }
    Ok(())
}

/// After a narrowing step, `url(...)` may not take an absolute XPath.
fn check_relative(segs: &[Segment], i: usize, xpath: &str) -> Result<(), ParseError> {
    if i == 0 {
        return Ok(());
    }
    let narrowed = matches!(
        segs[i - 1],
        Segment::XPath { .. } | Segment::MapLit { .. } | Segment::Binary { .. }
    );
    if narrowed && xpath.starts_with('/') {
        return Err(ParseError::new(
            0,
            "absolute XPath is not allowed in url(...) after a narrowing step",
        ));
    }
    Ok(())
}
