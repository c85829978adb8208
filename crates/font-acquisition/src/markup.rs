//! Link extraction from listing and download pages.
//!
//! Pages are parsed with html5ever, so nesting, attribute quoting and
//! entities are handled the way a browser would handle them.

use std::collections::HashMap;

use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use url::Url;

/// An `<a>` element's attributes, detached from the parsed tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    attrs: HashMap<String, String>,
}

impl Anchor {
    pub fn href(&self) -> Option<&str> {
        self.attrs.get("href").map(|s| s.trim()).filter(|s| !s.is_empty())
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attrs
            .get("class")
            .map_or(false, |classes| classes.split_whitespace().any(|c| c == class))
    }
}

fn parse(html: &str) -> RcDom {
    parse_document(RcDom::default(), Default::default()).one(html)
}

/// Elements under `handle` in document order, `handle` excluded
fn descendants(handle: &Handle) -> Vec<Handle> {
    let mut out = Vec::new();
    let mut stack: Vec<Handle> = handle.children.borrow().iter().rev().cloned().collect();
    while let Some(node) = stack.pop() {
        stack.extend(node.children.borrow().iter().rev().cloned());
        if matches!(node.data, NodeData::Element { .. }) {
            out.push(node);
        }
    }
    out
}

fn is_tag(handle: &Handle, tag: &str) -> bool {
    match &handle.data {
        NodeData::Element { name, .. } => name.local.as_ref() == tag,
        _ => false,
    }
}

fn attributes(handle: &Handle) -> HashMap<String, String> {
    match &handle.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .map(|attr| (attr.name.local.to_string(), attr.value.to_string()))
            .collect(),
        _ => HashMap::new(),
    }
}

fn anchors_under(handle: &Handle) -> Vec<Anchor> {
    descendants(handle)
        .iter()
        .filter(|node| is_tag(node, "a"))
        .map(|node| Anchor {
            attrs: attributes(node),
        })
        .collect()
}

/// Every `<a>` element in document order (`a`)
pub fn anchors(html: &str) -> Vec<Anchor> {
    anchors_under(&parse(html).document)
}

/// First anchor carrying `class` whose href satisfies `accept` (`a.<class>`)
pub fn first_anchor_with_class<F>(html: &str, class: &str, accept: F) -> Option<Anchor>
where
    F: Fn(&str) -> bool,
{
    anchors(html)
        .into_iter()
        .find(|a| a.has_class(class) && a.href().map_or(false, &accept))
}

/// First anchor with an href anywhere inside a `<div>` carrying `class`
/// (`div.<class> a[href]`)
pub fn first_anchor_in_div(html: &str, class: &str) -> Option<Anchor> {
    let dom = parse(html);
    descendants(&dom.document)
        .iter()
        .filter(|node| is_tag(node, "div"))
        .filter(|node| {
            attributes(node)
                .get("class")
                .map_or(false, |classes| classes.split_whitespace().any(|c| c == class))
        })
        .find_map(|div| anchors_under(div).into_iter().find(|a| a.href().is_some()))
}

/// Resolve an href against the page it was found on. Handles relative and
/// protocol-relative (`//host/path`) links.
pub fn absolute_url(base: &str, href: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}

/// The human part of a font page URL: `/obscure-display-font.html` and
/// `https://site/obscure-display.font` both give `obscure-display`
pub fn slug(url: &str) -> String {
    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.split(['?', '#']).next().unwrap_or(url).to_string());
    let last = path.rsplit('/').find(|segment| !segment.is_empty()).unwrap_or("");
    let stem = last
        .strip_suffix(".html")
        .or_else(|| last.strip_suffix(".htm"))
        .or_else(|| last.strip_suffix(".font"))
        .unwrap_or(last);
    stem.strip_suffix("-font").unwrap_or(stem).to_string()
}
