use lazy_static::lazy_static;
use sxd_xpath::function::{self, Function};
use sxd_xpath::{context, Context, Value as XValue, XPath};
use wxpath_expr::{ParseError, UrlAxis};

use crate::error::Error;
use crate::value;

/// Namespace of the crawl-context functions `wx:backlink` and `wx:depth`.
pub const WX_NS: &str = "https://wxpath.dev/functions";

lazy_static! {
    static ref XP_FACTORY: sxd_xpath::Factory = sxd_xpath::Factory::new();
}

/// Crawl context of one fetched document; every node of the document shares
/// it.
#[derive(Debug, Clone)]
pub struct DocProvenance {
    /// Canonical URL of the document (after redirects); what `base-uri(.)`
    /// returns and what relative references resolve against.
    pub base_url: String,
    /// URL of the document that enqueued this one. `wx:backlink` on the seed
    /// returns the empty string: the XPath 1.0 value model has no null.
    pub backlink: Option<String>,
    pub depth: usize,
}

/// Compiles one XPath fragment. Compilation failures surface as parse
/// errors of the whole expression.
pub fn compile(expr: &str) -> Result<XPath, Error> {
    XP_FACTORY
        .build(expr)
        .map_err(|e| {
            Error::Parse(ParseError {
                position: 0,
                message: format!("invalid XPath `{expr}`: {e}"),
            })
        })?
        .ok_or_else(|| {
            Error::Parse(ParseError {
                position: 0,
                message: format!("empty XPath `{expr}`"),
            })
        })
}

/// Evaluation context for one document: namespaces plus the provenance
/// functions, which close over the document's crawl context.
pub fn document_context<'d>(prov: &DocProvenance) -> Context<'d> {
    let mut ctx = Context::new();
    ctx.set_namespace("wx", WX_NS);
    ctx.set_function(
        (WX_NS, "backlink"),
        StringConst(prov.backlink.clone().unwrap_or_default()),
    );
    ctx.set_function((WX_NS, "depth"), NumberConst(prov.depth as f64));
    ctx.set_function("base-uri", StringConst(prov.base_url.clone()));
    ctx
}

/// Axis adjustment for `url(...)` steps: `/url(x)` looks among children,
/// `//url(x)` among descendants. Expressions that already carry an axis
/// (absolute, `.`-relative, or parenthesised) are kept as written.
pub fn axis_expr(axis: UrlAxis, xpath: &str) -> String {
    if xpath.starts_with('/') || xpath.starts_with('.') || xpath.starts_with('(') {
        xpath.to_string()
    } else {
        match axis {
            UrlAxis::Child => format!("./{xpath}"),
            UrlAxis::Descendant => format!(".//{xpath}"),
        }
    }
}

/// XPath `string()` conversion of an evaluation result.
pub fn value_string(value: &XValue) -> String {
    match value {
        XValue::String(s) => s.clone(),
        XValue::Number(n) => value::number_string(*n),
        XValue::Boolean(b) => b.to_string(),
        XValue::Nodeset(ns) => ns
            .document_order_first()
            .map(|n| n.string_value())
            .unwrap_or_default(),
    }
}

/// URL candidates from a `url(...)` evaluation: node string-values in
/// document order, or a single string result.
pub fn value_urls(value: XValue) -> Vec<String> {
    match value {
        XValue::Nodeset(ns) => ns
            .document_order()
            .into_iter()
            .map(|n| n.string_value())
            .filter(|s| !s.trim().is_empty())
            .collect(),
        XValue::String(s) if !s.trim().is_empty() => vec![s],
        _ => Vec::new(),
    }
}

struct StringConst(String);

impl Function for StringConst {
    fn evaluate<'c, 'd>(
        &self,
        _context: &context::Evaluation<'c, 'd>,
        _args: Vec<XValue<'d>>,
    ) -> Result<XValue<'d>, function::Error> {
        Ok(XValue::String(self.0.clone()))
    }
}

struct NumberConst(f64);

impl Function for NumberConst {
    fn evaluate<'c, 'd>(
        &self,
        _context: &context::Evaluation<'c, 'd>,
        _args: Vec<XValue<'d>>,
    ) -> Result<XValue<'d>, function::Error> {
        Ok(XValue::Number(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wxpath_html::{to_package, HtmlDom};

    fn prov() -> DocProvenance {
        DocProvenance {
            base_url: "http://h/a".into(),
            backlink: Some("http://h/".into()),
            depth: 2,
        }
    }

    #[test]
    fn axis_adjustment() {
        assert_eq!(axis_expr(UrlAxis::Child, "a/@href"), "./a/@href");
        assert_eq!(axis_expr(UrlAxis::Descendant, "a/@href"), ".//a/@href");
        assert_eq!(axis_expr(UrlAxis::Descendant, "//a/@href"), "//a/@href");
        assert_eq!(axis_expr(UrlAxis::Child, "./a"), "./a");
        assert_eq!(axis_expr(UrlAxis::Child, "(//a)[1]"), "(//a)[1]");
    }

    #[test]
    fn provenance_functions_answer_from_doc_context() {
        let dom = HtmlDom::parse_document("<p>x</p>");
        let package = to_package(&dom);
        let doc = package.as_document();
        let ctx = document_context(&prov());

        let xp = compile("wx:backlink(.)").unwrap();
        let v = xp.evaluate(&ctx, doc.root()).unwrap();
        assert_eq!(value_string(&v), "http://h/");

        let xp = compile("wx:depth(.)").unwrap();
        let v = xp.evaluate(&ctx, doc.root()).unwrap();
        assert_eq!(value_string(&v), "2");

        let xp = compile("base-uri(.)").unwrap();
        let v = xp.evaluate(&ctx, doc.root()).unwrap();
        assert_eq!(value_string(&v), "http://h/a");
    }

    #[test]
    fn backlink_on_seed_is_empty() {
        let dom = HtmlDom::parse_document("<p>x</p>");
        let package = to_package(&dom);
        let doc = package.as_document();
        let ctx = document_context(&DocProvenance {
            base_url: "http://h/".into(),
            backlink: None,
            depth: 0,
        });
        let xp = compile("wx:backlink(.)").unwrap();
        let v = xp.evaluate(&ctx, doc.root()).unwrap();
        assert_eq!(value_string(&v), "");
    }
}
