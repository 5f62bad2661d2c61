use std::borrow::Cow;

use html5ever::driver;
use html5ever::tendril::StrTendril;
use html5ever::tree_builder::QuirksMode;
use html5ever::QualName;
use tendril::TendrilSink;

/// Index of a node in the arena. The root document node is always index 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug, Clone)]
pub enum NodeData {
    Document,
    Fragment,
    Doctype {
        name: StrTendril,
    },
    Element {
        name: QualName,
        attrs: Vec<(QualName, StrTendril)>,
    },
    Text {
        text: StrTendril,
    },
    Comment {
        comment: StrTendril,
    },
    ProcessingInstruction {
        target: StrTendril,
        data: StrTendril,
    },
}

impl NodeData {
    pub fn is_element(&self) -> bool {
        matches!(self, NodeData::Element { .. })
    }

    pub fn is_text(&self) -> bool {
        matches!(self, NodeData::Text { .. })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub data: NodeData,
}

/// An owned HTML tree.
///
/// Built through the `html5ever` `TreeSink`; nodes are arena-allocated and
/// never freed individually, detaching only unlinks them.
#[derive(Debug, Clone)]
pub struct HtmlDom {
    pub(crate) nodes: Vec<Node>,

    /// Parse errors.
    pub errors: Vec<Cow<'static, str>>,

    /// The quirks mode.
    pub quirks_mode: QuirksMode,
}

impl HtmlDom {
    pub(crate) fn new_document() -> Self {
        Self {
            nodes: vec![Node {
                parent: None,
                children: Vec::new(),
                data: NodeData::Document,
            }],
            errors: Vec::new(),
            quirks_mode: QuirksMode::NoQuirks,
        }
    }

    /// Parses a string of HTML as a document.
    pub fn parse_document(document: &str) -> Self {
        let parser = driver::parse_document(Self::new_document(), Default::default());
        parser.one(document)
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn data(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0].data
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Depth-first walk over the subtree rooted at `id`, root included.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children(id).iter().rev());
        }
        out
    }

    /// Unlinks the subtree rooted at `id` from its parent. Hooks use this to
    /// prune unwanted markup before XPath evaluation.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|&c| c != id);
        }
    }

    /// Concatenated text of the subtree rooted at `id`.
    pub fn text(&self, id: NodeId) -> String {
        let mut out = String::new();
        for n in self.descendants(id) {
            if let NodeData::Text { text } = self.data(n) {
                out.push_str(text);
            }
        }
        out
    }

    pub(crate) fn push(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent: None,
            children: Vec::new(),
            data,
        });
        id
    }

    pub(crate) fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    pub(crate) fn insert_before(&mut self, sibling: NodeId, new: NodeId) {
        let parent = self.nodes[sibling.0].parent.expect("sibling has a parent");
        self.detach(new);
        self.nodes[new.0].parent = Some(parent);
        let idx = self.nodes[parent.0]
            .children
            .iter()
            .position(|&c| c == sibling)
            .expect("sibling is linked");
        self.nodes[parent.0].children.insert(idx, new);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_collects_tree() {
        let dom = HtmlDom::parse_document("<!DOCTYPE html><title>abc</title><p>x<b>y</b></p>");
        let root = dom.root();
        assert!(!dom.children(root).is_empty());
        let text = dom.text(root);
        assert!(text.contains("abc") && text.contains('x') && text.contains('y'));
    }

    #[test]
    fn adjacent_text_is_merged() {
        let dom = HtmlDom::parse_document("<p>a<!-- c -->b</p>");
        let texts = dom
            .descendants(dom.root())
            .into_iter()
            .filter(|&n| dom.data(n).is_text())
            .count();
        // Comment keeps the two text nodes apart.
        assert_eq!(texts, 2);
    }

    #[test]
    fn detach_prunes_subtree() {
        let mut dom = HtmlDom::parse_document("<p>keep</p><script>drop()</script>");
        let scripts: Vec<_> = dom
            .descendants(dom.root())
            .into_iter()
            .filter(|&n| match dom.data(n) {
                NodeData::Element { name, .. } => &*name.local == "script",
                _ => false,
            })
            .collect();
        for s in scripts {
            dom.detach(s);
        }
        assert!(!dom.text(dom.root()).contains("drop"));
    }
}
