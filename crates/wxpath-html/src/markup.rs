use sxd_document::dom::{ChildOfElement, Element};

/// Renders an element subtree as compact markup, for emitting DOM elements
/// through the result stream and the CLI's JSON flattening.
pub fn element_markup(el: Element<'_>) -> String {
    let mut out = String::new();
    write_element(&mut out, el);
    out
}

fn write_element(out: &mut String, el: Element<'_>) {
    let name = el.name().local_part();
    out.push('<');
    out.push_str(name);
    for attr in el.attributes() {
        out.push(' ');
        out.push_str(attr.name().local_part());
        out.push_str("=\"");
        push_escaped(out, attr.value(), true);
        out.push('"');
    }
    let children = el.children();
    if children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for child in children {
        match child {
            ChildOfElement::Element(e) => write_element(out, e),
            ChildOfElement::Text(t) => push_escaped(out, t.text(), false),
            ChildOfElement::Comment(_) | ChildOfElement::ProcessingInstruction(_) => {}
        }
    }
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn push_escaped(out: &mut String, text: &str, in_attr: bool) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if in_attr => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::HtmlDom;
    use crate::sxd::to_package;

    #[test]
    fn compact_markup_roundtrip() {
        let dom = HtmlDom::parse_document(r#"<div id="x"><p>a &amp; b</p><br></div>"#);
        let package = to_package(&dom);
        let doc = package.as_document();

        let factory = sxd_xpath::Factory::new();
        let xpath = factory.build("//div").unwrap().unwrap();
        let ctx = sxd_xpath::Context::new();
        let div = match xpath.evaluate(&ctx, doc.root()).unwrap() {
            sxd_xpath::Value::Nodeset(nodes) => nodes
                .document_order()
                .into_iter()
                .find_map(|n| match n {
                    sxd_xpath::nodeset::Node::Element(e) => Some(e),
                    _ => None,
                })
                .expect("div element"),
            other => panic!("expected a nodeset, got {other:?}"),
        };
        assert_eq!(
            element_markup(div),
            r#"<div id="x"><p>a &amp; b</p><br/></div>"#
        );
    }
}
