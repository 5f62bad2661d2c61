use sxd_document::dom::{Document, Element};
use sxd_document::Package;

use crate::dom::{HtmlDom, NodeData, NodeId};

/// Builds an XPath-evaluable `sxd_document` package from a parsed HTML tree.
///
/// Elements and attributes are created without namespace so that path
/// expressions like `//a` match HTML directly; doctypes and `xmlns`
/// attributes have no XML-document counterpart and are skipped.
pub fn to_package(dom: &HtmlDom) -> Package {
    let package = Package::new();
    {
        let doc = package.as_document();
        for &child in dom.children(dom.root()) {
            match dom.data(child) {
                NodeData::Element { .. } => {
                    let el = build_element(&doc, dom, child);
                    doc.root().append_child(el);
                }
                NodeData::Comment { comment } => {
                    doc.root().append_child(doc.create_comment(comment));
                }
                NodeData::ProcessingInstruction { target, data } => {
                    doc.root()
                        .append_child(doc.create_processing_instruction(target, Some(&**data)));
                }
                _ => {}
            }
        }
    }
    package
}

fn build_element<'d>(doc: &Document<'d>, dom: &HtmlDom, id: NodeId) -> Element<'d> {
    let NodeData::Element { name, attrs } = dom.data(id) else {
        unreachable!("build_element called on a non-element");
    };
    let el = doc.create_element(&*name.local);
    for (qname, value) in attrs {
        if qname.local.starts_with("xmlns") {
            continue;
        }
        el.set_attribute_value(&*qname.local, value);
    }
    for &child in dom.children(id) {
        match dom.data(child) {
            NodeData::Element { .. } => {
                let c = build_element(doc, dom, child);
                el.append_child(c);
            }
            NodeData::Text { text } => {
                el.append_child(doc.create_text(text));
            }
            NodeData::Comment { comment } => {
                el.append_child(doc.create_comment(comment));
            }
            NodeData::ProcessingInstruction { target, data } => {
                el.append_child(doc.create_processing_instruction(target, Some(&**data)));
            }
            NodeData::Document | NodeData::Fragment | NodeData::Doctype { .. } => {}
        }
    }
    el
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_root_element<'d>(doc: &'d Document<'d>) -> Element<'d> {
        doc.root()
            .children()
            .iter()
            .find_map(|c| c.element())
            .expect("html element")
    }

    #[test]
    fn html_becomes_queryable_document() {
        let dom = HtmlDom::parse_document(
            r#"<!DOCTYPE html><body><a href="/x">x</a><a href="/y">y</a></body>"#,
        );
        let package = to_package(&dom);
        let doc = package.as_document();

        let factory = sxd_xpath::Factory::new();
        let xpath = factory.build("//a/@href").unwrap().unwrap();
        let ctx = sxd_xpath::Context::new();
        let value = xpath.evaluate(&ctx, doc.root()).unwrap();
        match value {
            sxd_xpath::Value::Nodeset(nodes) => {
                let hrefs: Vec<_> = nodes
                    .document_order()
                    .into_iter()
                    .map(|n| n.string_value())
                    .collect();
                assert_eq!(hrefs, vec!["/x", "/y"]);
            }
            other => panic!("expected a nodeset, got {other:?}"),
        }
    }

    #[test]
    fn quirky_html_still_builds() {
        let dom = HtmlDom::parse_document("<p>unclosed<table><tr><td>cell");
        let package = to_package(&dom);
        let doc = package.as_document();
        let root = first_root_element(&doc);
        assert_eq!(root.name().local_part(), "html");
    }
}
