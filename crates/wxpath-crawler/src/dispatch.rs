use sxd_document::dom::Document;
use sxd_xpath::nodeset::Node;
use sxd_xpath::{Context, Value as XValue, XPath};
use wxpath_expr::{BinaryOp, Program, Segment, UrlAxis};
use wxpath_html::element_markup;

use crate::engine::CancelToken;
use crate::error::Error;
use crate::frontier::CrawlTask;
use crate::value::{ProvenancedElement, Value};
use crate::xpath::{self, DocProvenance};

/// The program's XPath fragments, compiled. Compiled XPaths are not `Send`,
/// so every worker compiles its own copy; [`CompiledProgram::check`] runs
/// once at run entry to fail fast on bad fragments.
pub struct CompiledProgram {
    segs: Vec<CompiledSegment>,
    /// The deep-crawl XPath (from `///url(...)` or `follow=`), re-evaluated
    /// on every deep-visited document.
    deep: Option<XPath>,
}

enum CompiledSegment {
    /// The `UrlLit` head; consumed at seeding, never dispatched.
    Seed,
    /// `UrlEval` or `UrlDeep`, axis-adjusted.
    Url(XPath),
    XPath(XPath),
    Binary {
        op: BinaryOp,
        left: Box<CompiledSegment>,
        right: Box<CompiledSegment>,
    },
    MapLit(Vec<(String, XPath)>),
}

impl CompiledProgram {
    pub fn new(program: &Program) -> Result<Self, Error> {
        let mut deep = None;
        let segs = program
            .segments()
            .iter()
            .map(|seg| compile_segment(seg, &mut deep))
            .collect::<Result<_, _>>()?;
        Ok(Self { segs, deep })
    }

    /// Compile-and-discard, to surface XPath syntax errors at run entry.
    pub fn check(program: &Program) -> Result<(), Error> {
        Self::new(program).map(|_| ())
    }
}

fn compile_segment(seg: &Segment, deep: &mut Option<XPath>) -> Result<CompiledSegment, Error> {
    match seg {
        Segment::UrlLit { follow, .. } => {
            if let Some(f) = follow {
                *deep = Some(xpath::compile(&xpath::axis_expr(UrlAxis::Descendant, f))?);
            }
            Ok(CompiledSegment::Seed)
        }
        Segment::UrlEval { axis, xpath: x } => Ok(CompiledSegment::Url(xpath::compile(
            &xpath::axis_expr(*axis, x),
        )?)),
        Segment::UrlDeep { xpath: x } => {
            let adjusted = xpath::axis_expr(UrlAxis::Descendant, x);
            *deep = Some(xpath::compile(&adjusted)?);
            Ok(CompiledSegment::Url(xpath::compile(&adjusted)?))
        }
        Segment::XPath { expr } => Ok(CompiledSegment::XPath(xpath::compile(expr)?)),
        Segment::Binary { op, left, right } => Ok(CompiledSegment::Binary {
            op: *op,
            left: Box::new(compile_segment(left, deep)?),
            right: Box::new(compile_segment(right, deep)?),
        }),
        Segment::MapLit { entries } => {
            let compiled = entries
                .iter()
                .map(|(k, x)| Ok((k.clone(), xpath::compile(x)?)))
                .collect::<Result<_, Error>>()?;
            Ok(CompiledSegment::MapLit(compiled))
        }
    }
}

/// What executing the remaining program on one fetched document produced.
#[derive(Debug, Default)]
pub struct Outcome {
    pub children: Vec<CrawlTask>,
    pub data: Vec<Value>,
}

/// One evaluation result item: a live node usable as the next context, or an
/// already-converted datum.
enum Item<'d> {
    Node(Node<'d>),
    Data(Value),
}

/// Runs the task's remaining segments against a fetched, parsed document.
///
/// `UrlEval`/`UrlDeep` are evaluated exactly once per document, against the
/// document root, never per context node. A document whose extraction tail
/// is empty emits its own root element. The cancel flag is observed before
/// every segment's work; on cancel, whatever was already produced is
/// returned and the rest of the program is skipped.
pub fn execute(
    doc: &Document<'_>,
    program: &Program,
    compiled: &CompiledProgram,
    task: &CrawlTask,
    prov: &DocProvenance,
    cancel: &CancelToken,
) -> Result<Outcome, Error> {
    let ctx = xpath::document_context(prov);
    let root = Node::Root(doc.root());
    let mut out = Outcome::default();

    if cancel.is_cancelled() {
        return Ok(out);
    }

    // Deep-visited documents re-enqueue their links before extraction.
    if task.deep {
        if let Some(deep_xp) = &compiled.deep {
            for url in eval_urls(deep_xp, &ctx, root, prov, cancel)? {
                out.children.push(child_task(url, task, task.cursor, true));
            }
        }
    }

    let mut contexts = vec![root];
    let mut i = task.cursor;
    let mut extracted = false;
    while i < program.len() {
        if cancel.is_cancelled() {
            return Ok(out);
        }
        match &compiled.segs[i] {
            CompiledSegment::Seed => {
                return Err(Error::Program(
                    "url('...') literal past the head of the program".into(),
                ));
            }
            CompiledSegment::Url(xp) => {
                let deep = matches!(program.segments()[i], Segment::UrlDeep { .. });
                for url in eval_urls(xp, &ctx, root, prov, cancel)? {
                    out.children.push(child_task(url, task, i + 1, deep));
                }
                // The tail belongs to the fetched children. A tail-less deep
                // crawl emits every visited document, the seed included.
                if deep && i + 1 >= program.len() && !cancel.is_cancelled() {
                    out.data.push(document_value(doc, prov));
                }
                return Ok(out);
            }
            seg => {
                let items = eval_segment(seg, &contexts, &ctx, prov, cancel)?;
                extracted = true;
                i += 1;
                if i >= program.len() {
                    for item in items {
                        out.data.push(item_value(item, prov));
                    }
                } else {
                    contexts = items
                        .into_iter()
                        .filter_map(|item| match item {
                            Item::Node(n) => Some(n),
                            Item::Data(_) => {
                                log::warn!(
                                    "Dropping non-node result of segment {} on {}: \
                                     further steps need a context node",
                                    i - 1,
                                    prov.base_url
                                );
                                None
                            }
                        })
                        .collect();
                }
            }
        }
    }

    if !extracted && task.cursor >= program.len() {
        out.data.push(document_value(doc, prov));
    }
    Ok(out)
}

fn child_task(url: String, parent: &CrawlTask, cursor: usize, deep: bool) -> CrawlTask {
    CrawlTask {
        url,
        depth: parent.depth + 1,
        backlink: Some(parent.url.clone()),
        cursor,
        deep,
        depth_cap: parent.depth_cap,
    }
}

/// Evaluates a `url(...)` XPath once against the document root and resolves
/// the produced references against the document base.
fn eval_urls<'d>(
    xp: &XPath,
    ctx: &Context<'d>,
    root: Node<'d>,
    prov: &DocProvenance,
    cancel: &CancelToken,
) -> Result<Vec<String>, Error> {
    if cancel.is_cancelled() {
        return Ok(Vec::new());
    }
    let value = xp
        .evaluate(ctx, root)
        .map_err(|e| Error::Program(format!("XPath evaluation failed: {e}")))?;
    let mut urls = Vec::new();
    for href in xpath::value_urls(value) {
        if cancel.is_cancelled() {
            break;
        }
        if let Some(url) = crate::urls::resolve(&prov.base_url, &href) {
            urls.push(url);
        }
    }
    Ok(urls)
}

fn eval_segment<'d>(
    seg: &CompiledSegment,
    contexts: &[Node<'d>],
    ctx: &Context<'d>,
    prov: &DocProvenance,
    cancel: &CancelToken,
) -> Result<Vec<Item<'d>>, Error> {
    let mut items = Vec::new();
    match seg {
        CompiledSegment::XPath(xp) => {
            for &c in contexts {
                if cancel.is_cancelled() {
                    break;
                }
                let value = xp
                    .evaluate(ctx, c)
                    .map_err(|e| Error::Program(format!("XPath evaluation failed: {e}")))?;
                push_value(&mut items, value, prov);
            }
        }
        CompiledSegment::MapLit(entries) => {
            for &c in contexts {
                if cancel.is_cancelled() {
                    break;
                }
                let mut map = Vec::with_capacity(entries.len());
                for (key, xp) in entries {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let value = xp
                        .evaluate(ctx, c)
                        .map_err(|e| Error::Program(format!("XPath evaluation failed: {e}")))?;
                    map.push((key.clone(), map_value(value, prov)));
                }
                if map.len() == entries.len() {
                    items.push(Item::Data(Value::Map(map)));
                }
            }
        }
        CompiledSegment::Binary { op, left, right } => match op {
            BinaryOp::SimpleMap => {
                for item in eval_segment(left, contexts, ctx, prov, cancel)? {
                    if cancel.is_cancelled() {
                        break;
                    }
                    match item {
                        Item::Node(n) => {
                            items.extend(eval_segment(right, &[n], ctx, prov, cancel)?);
                        }
                        Item::Data(_) => {
                            log::warn!(
                                "Dropping atomic left operand of '!' on {}: \
                                 the right side needs a context node",
                                prov.base_url
                            );
                        }
                    }
                }
            }
            BinaryOp::Concat => {
                for &c in contexts {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let l = segment_string(left, c, ctx, prov, cancel)?;
                    let r = segment_string(right, c, ctx, prov, cancel)?;
                    items.push(Item::Data(Value::str(
                        format!("{l}{r}"),
                        Some(prov.base_url.clone()),
                    )));
                }
            }
        },
        CompiledSegment::Seed | CompiledSegment::Url(_) => {
            return Err(Error::Program(
                "url(...) is not valid inside a binary operand".into(),
            ));
        }
    }
    Ok(items)
}

/// XPath `string()` of one operand evaluated against one context node.
fn segment_string<'d>(
    seg: &CompiledSegment,
    c: Node<'d>,
    ctx: &Context<'d>,
    prov: &DocProvenance,
    cancel: &CancelToken,
) -> Result<String, Error> {
    if let CompiledSegment::XPath(xp) = seg {
        let value = xp
            .evaluate(ctx, c)
            .map_err(|e| Error::Program(format!("XPath evaluation failed: {e}")))?;
        return Ok(xpath::value_string(&value));
    }
    let items = eval_segment(seg, &[c], ctx, prov, cancel)?;
    Ok(items
        .into_iter()
        .next()
        .map(|item| match item {
            Item::Node(n) => n.string_value(),
            Item::Data(v) => v.string_value(),
        })
        .unwrap_or_default())
}

fn push_value<'d>(items: &mut Vec<Item<'d>>, value: XValue<'d>, prov: &DocProvenance) {
    match value {
        XValue::Nodeset(ns) => {
            for n in ns.document_order() {
                items.push(Item::Node(n));
            }
        }
        XValue::String(s) => items.push(Item::Data(Value::str(s, Some(prov.base_url.clone())))),
        XValue::Number(n) => items.push(Item::Data(Value::Number(n))),
        XValue::Boolean(b) => items.push(Item::Data(Value::Bool(b))),
    }
}

fn item_value(item: Item<'_>, prov: &DocProvenance) -> Value {
    match item {
        Item::Node(n) => node_value(n, prov),
        Item::Data(v) => v,
    }
}

fn node_value(n: Node<'_>, prov: &DocProvenance) -> Value {
    match n {
        Node::Element(e) => Value::Element(ProvenancedElement {
            markup: element_markup(e),
            base_url: prov.base_url.clone(),
            backlink: prov.backlink.clone(),
            depth: prov.depth,
        }),
        Node::Root(r) => match r.children().into_iter().find_map(|c| c.element()) {
            Some(e) => Value::Element(ProvenancedElement {
                markup: element_markup(e),
                base_url: prov.base_url.clone(),
                backlink: prov.backlink.clone(),
                depth: prov.depth,
            }),
            None => Value::str("", Some(prov.base_url.clone())),
        },
        // URL-carrying attributes are emitted resolved against the document
        // base, like the `base-uri` function would resolve them.
        Node::Attribute(a) if matches!(a.name().local_part(), "href" | "src" | "action") => {
            let value = crate::urls::resolve(&prov.base_url, a.value())
                .unwrap_or_else(|| a.value().to_string());
            Value::str(value, Some(prov.base_url.clone()))
        }
        other => Value::str(other.string_value(), Some(prov.base_url.clone())),
    }
}

/// The document itself as a datum: its root element with provenance.
fn document_value(doc: &Document<'_>, prov: &DocProvenance) -> Value {
    node_value(Node::Root(doc.root()), prov)
}

/// How a map entry's evaluation becomes a map value: an empty nodeset is
/// null, a singleton collapses to the item, anything larger is an array.
fn map_value(value: XValue<'_>, prov: &DocProvenance) -> Value {
    match value {
        XValue::Nodeset(ns) => {
            let nodes = ns.document_order();
            match nodes.len() {
                0 => Value::Null,
                1 => node_value(nodes[0], prov),
                _ => Value::Array(nodes.into_iter().map(|n| node_value(n, prov)).collect()),
            }
        }
        XValue::String(s) => Value::str(s, Some(prov.base_url.clone())),
        XValue::Number(n) => Value::Number(n),
        XValue::Boolean(b) => Value::Bool(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wxpath_html::{to_package, HtmlDom};

    fn run(
        expression: &str,
        html: &str,
        cursor: usize,
        deep: bool,
        depth: usize,
    ) -> Outcome {
        let program = wxpath_expr::parse(expression).unwrap();
        let compiled = CompiledProgram::new(&program).unwrap();
        let dom = HtmlDom::parse_document(html);
        let package = to_package(&dom);
        let doc = package.as_document();
        let task = CrawlTask {
            url: "http://h/a".into(),
            depth,
            backlink: None,
            cursor,
            deep,
            depth_cap: None,
        };
        let prov = DocProvenance {
            base_url: "http://h/a".into(),
            backlink: None,
            depth,
        };
        execute(&doc, &program, &compiled, &task, &prov, &CancelToken::new()).unwrap()
    }

    const LINKS: &str = r#"<body><a href="/x">x</a><a href="y">y</a></body>"#;

    #[test]
    fn plain_xpath_extracts_in_document_order() {
        let out = run("url('http://h/a')//a/@href", LINKS, 1, false, 0);
        assert!(out.children.is_empty());
        let strings: Vec<_> = out
            .data
            .iter()
            .map(|v| v.string_value())
            .collect();
        // href attributes come back resolved against the document base
        assert_eq!(strings, vec!["http://h/x", "http://h/y"]);
    }

    #[test]
    fn url_eval_resolves_and_enqueues_once_per_document() {
        let out = run(
            "url('http://h/a')//url(//a/@href)//title/text()",
            LINKS,
            1,
            false,
            0,
        );
        // no extraction on this document; the tail belongs to the children
        assert!(out.data.is_empty());
        let urls: Vec<_> = out.children.iter().map(|t| t.url.as_str()).collect();
        assert_eq!(urls, vec!["http://h/x", "http://h/y"]);
        assert!(out.children.iter().all(|t| t.depth == 1 && !t.deep));
        assert!(out
            .children
            .iter()
            .all(|t| t.backlink.as_deref() == Some("http://h/a") && t.cursor == 2));
    }

    #[test]
    fn tailless_deep_crawl_emits_the_document() {
        let out = run("url('http://h/a')///url(//a/@href)", LINKS, 1, false, 0);
        assert_eq!(out.children.len(), 2);
        assert!(out.children.iter().all(|t| t.deep && t.cursor == 2));
        // the visited document itself is the datum
        assert_eq!(out.data.len(), 1);
        assert!(matches!(out.data[0], Value::Element(_)));
    }

    #[test]
    fn deep_task_reenqueues_and_runs_tail() {
        let html = r#"<body><a href="/next">n</a><h1>T</h1></body>"#;
        let out = run(
            "url('http://h/a')///url(//a/@href)/map{'t':(//h1)[1]}",
            html,
            2,
            true,
            1,
        );
        assert_eq!(out.children.len(), 1);
        assert_eq!(out.children[0].url, "http://h/next");
        assert_eq!(out.children[0].depth, 2);
        assert_eq!(out.data.len(), 1);
        match &out.data[0] {
            Value::Map(entries) => {
                assert_eq!(entries[0].0, "t");
                assert!(matches!(entries[0].1, Value::Element(_)));
            }
            other => panic!("expected a map, got {other:?}"),
        }
    }

    #[test]
    fn seed_with_pending_tail_emits_nothing_itself() {
        // equivalent deep expression with a tail: the seed skips extraction
        let out = run(
            "url('http://h/a')///url(//a/@href)/map{'t':(//h1)[1]}",
            LINKS,
            1,
            false,
            0,
        );
        assert!(out.data.is_empty());
        assert_eq!(out.children.len(), 2);
    }

    #[test]
    fn follow_seed_extracts_and_reenqueues() {
        let html = r#"<body><a href="/next">n</a><h1>Seed</h1></body>"#;
        let out = run(
            "url('http://h/a', follow=//a/@href)//h1/text()",
            html,
            1,
            true,
            0,
        );
        // the seed document both re-enqueues and runs the extraction tail
        assert_eq!(out.children.len(), 1);
        assert_eq!(out.data.len(), 1);
        assert_eq!(out.data[0].string_value(), "Seed");
    }

    #[test]
    fn map_extraction_is_per_context_node() {
        let html = r#"<body>
            <item><h2>A</h2><a href="/a">a</a></item>
            <item><h2>B</h2><a href="/b">b</a></item>
        </body>"#;
        let out = run(
            "url('http://h/a')//item/map{'t':(.//h2)[1],'u':.//a/@href}",
            html,
            1,
            false,
            0,
        );
        assert_eq!(out.data.len(), 2);
        for (v, (t, u)) in out.data.iter().zip([("A", "/a"), ("B", "/b")]) {
            match v {
                Value::Map(entries) => {
                    assert_eq!(entries[0].0, "t");
                    assert_eq!(entries[1].0, "u");
                    assert!(entries[0].1.string_value().contains(t));
                    assert_eq!(
                        entries[1].1.string_value(),
                        format!("http://h{u}"),
                    );
                }
                other => panic!("expected a map, got {other:?}"),
            }
        }
    }

    #[test]
    fn simple_map_operator_chains_contexts() {
        let html = "<body><h1>a</h1><h1>b</h1></body>";
        let out = run("url('http://h/a')//h1 ! string(.)", html, 1, false, 0);
        let strings: Vec<_> = out.data.iter().map(|v| v.string_value()).collect();
        assert_eq!(strings, vec!["a", "b"]);
    }

    #[test]
    fn concat_operator_joins_string_values() {
        let html = "<head><title>T</title></head>";
        let out = run("url('http://h/a')//title/text() || '!'", html, 1, false, 0);
        assert_eq!(out.data.len(), 1);
        assert_eq!(out.data[0].string_value(), "T!");
    }

    #[test]
    fn bare_seed_emits_document_element() {
        let out = run("url('http://h/a')", "<p>doc</p>", 1, false, 0);
        assert_eq!(out.data.len(), 1);
        match &out.data[0] {
            Value::Element(el) => {
                assert!(el.markup.starts_with("<html"));
                assert_eq!(el.base_url, "http://h/a");
                assert_eq!(el.depth, 0);
            }
            other => panic!("expected an element, got {other:?}"),
        }
    }

    #[test]
    fn empty_url_eval_produces_no_children() {
        let out = run(
            "url('http://h/a')//url(//a[@rel='next']/@href)",
            "<p>no links</p>",
            1,
            false,
            0,
        );
        assert!(out.children.is_empty());
        assert!(out.data.is_empty());
    }

    #[test]
    fn cancelled_dispatch_produces_nothing() {
        let program = wxpath_expr::parse("url('http://h/a')///url(//a/@href)").unwrap();
        let compiled = CompiledProgram::new(&program).unwrap();
        let dom = HtmlDom::parse_document(LINKS);
        let package = to_package(&dom);
        let doc = package.as_document();
        let task = CrawlTask {
            url: "http://h/a".into(),
            depth: 0,
            backlink: None,
            cursor: 1,
            deep: false,
            depth_cap: None,
        };
        let prov = DocProvenance {
            base_url: "http://h/a".into(),
            backlink: None,
            depth: 0,
        };
        let cancel = CancelToken::new();
        cancel.cancel();
        let out = execute(&doc, &program, &compiled, &task, &prov, &cancel).unwrap();
        assert!(out.children.is_empty());
        assert!(out.data.is_empty());
    }

    #[test]
    fn non_http_and_fragment_links_are_skipped() {
        let html = r##"<body>
            <a href="mailto:x@y">m</a>
            <a href="javascript:void(0)">j</a>
            <a href="#top">t</a>
            <a href="/ok">ok</a>
        </body>"##;
        let out = run("url('http://h/a')//url(//a/@href)", html, 1, false, 0);
        let urls: Vec<_> = out.children.iter().map(|t| t.url.as_str()).collect();
        // "#top" resolves to the page itself; the engine-level dedup drops it
        assert_eq!(urls, vec!["http://h/a", "http://h/ok"]);
    }
}
