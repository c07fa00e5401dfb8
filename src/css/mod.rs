//! CSS selector matching against a mirrored script-side DOM.
//!
//! Script code keeps elements and selector ASTs as plain heap arrays (the
//! layouts below are synchronized with the script source). On first sight
//! each array is cloned into a native node, cached by the array's value
//! identity, so repeated `matches` calls over a stylesheet never re-read
//! the heap. Matching itself is a recursive boolean evaluator that does
//! not allocate.
//!
//! Combinators anchor on their right-hand operand and walk ancestors or
//! siblings leftwards, stopping at the `#document` node; sibling walks
//! skip `#text` and `#comment` nodes.

use crate::error::{Result, RuntimeError};
use crate::heap::{Heap, Value};
use hashbrown::HashMap;
use smallvec::SmallVec;

// Script-side element array layout.
const ELEM_TYPE: usize = 0;
const ELEM_PARENT: usize = 1;
const ELEM_FIRST_CHILD: usize = 2;
const ELEM_LAST_CHILD: usize = 3;
const ELEM_PREV: usize = 4;
const ELEM_NEXT: usize = 5;
const ELEM_ATTRS: usize = 6;
const ELEM_DATA: usize = 7;
const ELEM_CLASS_SET: usize = 8;
const ELEM_SIZE: usize = 9;

// Script-side selector type codes.
const SEL_TYPE: i32 = 0;
const SEL_ID: i32 = 1;
const SEL_CLASS: i32 = 2;
const SEL_ATTRIB: i32 = 3;
const SEL_ATTRIB_PREFIX: i32 = 4;
const SEL_ATTRIB_SUFFIX: i32 = 5;
const SEL_ATTRIB_SUBSTRING: i32 = 6;
const SEL_ATTRIB_EXACT: i32 = 7;
const SEL_ATTRIB_INCLUDE: i32 = 8;
const SEL_ATTRIB_DASH: i32 = 9;
const SEL_PSEUDO_ELEMENT: i32 = 10;
const SEL_PSEUDO_CLASS: i32 = 11;
const SEL_FUNCTION_IDENT: i32 = 12;
const SEL_FUNCTION_STRING: i32 = 13;
const SEL_FUNCTION_ANB: i32 = 14;
const SEL_NOT: i32 = 15;
const SEL_SEQUENCE: i32 = 16;
const COMB_DESCENDANT: i32 = 17;
const COMB_CHILD: i32 = 18;
const COMB_NEXT_SIBLING: i32 = 19;
const COMB_SUBSEQUENT_SIBLING: i32 = 20;

// Script-side selector array slots (meaning depends on the type code).
const SELECTOR_TYPE: usize = 0;
const SELECTOR_NAME: usize = 1;
const SELECTOR_ATTRIB_NAME: usize = 2;
const SELECTOR_ATTRIB_VALUE: usize = 3;
const SELECTOR_FIRST: usize = 1;
const SELECTOR_SECOND: usize = 2;
const SELECTOR_SIZE: usize = 4;

type ElementId = usize;
type SelectorId = usize;

#[derive(Default)]
struct Element {
    name: String,
    parent: Option<ElementId>,
    first_child: Option<ElementId>,
    #[allow(dead_code)]
    last_child: Option<ElementId>,
    prev: Option<ElementId>,
    next: Option<ElementId>,
    attrs: Vec<(String, String)>,
    classes: Vec<String>,
    data_len: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum AttribOp {
    Prefix,
    Suffix,
    Substring,
    Exact,
    Include,
    Dash,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CombKind {
    Descendant,
    Child,
    NextSibling,
    SubsequentSibling,
}

enum Selector {
    Type { name: String },
    Id { name: String },
    Class { name: String },
    Attrib { name: String },
    AttribMatch { op: AttribOp, name: String, value: String },
    PseudoElement,
    PseudoClass { name: String },
    Function,
    Not(SelectorId),
    Sequence(SmallVec<[SelectorId; 4]>),
    Combinator { kind: CombKind, first: SelectorId, second: SelectorId },
    /// Placeholder while the node is being mirrored (cycles resolve to it).
    Pending,
}

#[derive(Clone, Copy)]
enum NodeRef {
    Elem(ElementId),
    Sel(SelectorId),
}

/// Matcher context: the mirrored document plus the value-id cache.
pub struct CssMatcher {
    nodes: HashMap<u32, NodeRef>,
    elements: Vec<Element>,
    selectors: Vec<Selector>,
    #[allow(dead_code)]
    document: ElementId,
}

impl CssMatcher {
    /// Mirrors the element tree reachable from `document`.
    pub fn new(heap: &Heap, document: Value) -> Result<Self> {
        let mut matcher = Self {
            nodes: HashMap::new(),
            elements: Vec::new(),
            selectors: Vec::new(),
            document: 0,
        };
        matcher.document = matcher.mirror_element(heap, document)?;
        Ok(matcher)
    }

    /// Tests `element` against `selector`; both are mirrored on first
    /// sight and served from the cache afterwards.
    pub fn matches(&mut self, heap: &Heap, element: Value, selector: Value) -> Result<bool> {
        let elem = self.mirror_element(heap, element)?;
        let sel = self.mirror_selector(heap, selector)?;
        Ok(self.eval(elem, sel))
    }

    // ----- mirroring -------------------------------------------------------

    fn mirror_element(&mut self, heap: &Heap, value: Value) -> Result<ElementId> {
        let vid = value
            .ref_id()
            .ok_or_else(|| RuntimeError::invalid_access("element must be an array"))?;
        if let Some(node) = self.nodes.get(&vid) {
            return match node {
                NodeRef::Elem(id) => Ok(*id),
                NodeRef::Sel(_) => Err(RuntimeError::invalid_access(
                    "value already mirrors a selector",
                )),
            };
        }
        if heap.array_len(value)? < ELEM_SIZE {
            return Err(RuntimeError::OutOfBounds("element array too short"));
        }

        // register before recursing so parent/sibling cycles terminate
        let id = self.elements.len();
        self.elements.push(Element::default());
        self.nodes.insert(vid, NodeRef::Elem(id));

        match self.fill_element(heap, value, id) {
            Ok(()) => Ok(id),
            Err(err) => {
                self.nodes.remove(&vid);
                Err(err)
            }
        }
    }

    fn fill_element(&mut self, heap: &Heap, value: Value, id: ElementId) -> Result<()> {
        let name = heap.get_string(heap.get_elem(value, ELEM_TYPE)?)?;
        self.elements[id].name = name;

        for (slot, field) in [
            (ELEM_PARENT, 0usize),
            (ELEM_FIRST_CHILD, 1),
            (ELEM_LAST_CHILD, 2),
            (ELEM_PREV, 3),
            (ELEM_NEXT, 4),
        ] {
            let v = heap.get_elem(value, slot)?;
            let link = if v.is_null() {
                None
            } else {
                Some(self.mirror_element(heap, v)?)
            };
            let elem = &mut self.elements[id];
            match field {
                0 => elem.parent = link,
                1 => elem.first_child = link,
                2 => elem.last_child = link,
                3 => elem.prev = link,
                _ => elem.next = link,
            }
        }

        let attrs = heap.get_elem(value, ELEM_ATTRS)?;
        if !attrs.is_null() {
            let len = heap.hash_len(attrs)?;
            let mut mirrored = Vec::with_capacity(len);
            for i in 0..len {
                let (k, v) = heap.hash_entry(attrs, i)?;
                mirrored.push((heap.get_string(k)?, heap.get_string(v)?));
            }
            self.elements[id].attrs = mirrored;
        }

        let classes = heap.get_elem(value, ELEM_CLASS_SET)?;
        if !classes.is_null() {
            let len = heap.hash_len(classes)?;
            let mut mirrored = Vec::with_capacity(len);
            for i in 0..len {
                let (k, _) = heap.hash_entry(classes, i)?;
                mirrored.push(heap.get_string(k)?);
            }
            self.elements[id].classes = mirrored;
        }

        let data = heap.get_elem(value, ELEM_DATA)?;
        if !data.is_null() {
            self.elements[id].data_len = heap.array_len(data)?;
        }
        Ok(())
    }

    fn mirror_selector(&mut self, heap: &Heap, value: Value) -> Result<SelectorId> {
        let vid = value
            .ref_id()
            .ok_or_else(|| RuntimeError::invalid_access("selector must be an array"))?;
        if let Some(node) = self.nodes.get(&vid) {
            return match node {
                NodeRef::Sel(id) => Ok(*id),
                NodeRef::Elem(_) => Err(RuntimeError::invalid_access(
                    "value already mirrors an element",
                )),
            };
        }
        if heap.array_len(value)? < SELECTOR_SIZE {
            return Err(RuntimeError::OutOfBounds("selector array too short"));
        }

        let id = self.selectors.len();
        self.selectors.push(Selector::Pending);
        self.nodes.insert(vid, NodeRef::Sel(id));

        match self.fill_selector(heap, value, id) {
            Ok(()) => Ok(id),
            Err(err) => {
                self.nodes.remove(&vid);
                Err(err)
            }
        }
    }

    fn fill_selector(&mut self, heap: &Heap, value: Value, id: SelectorId) -> Result<()> {
        let Value::Int(code) = heap.get_elem(value, SELECTOR_TYPE)? else {
            return Err(RuntimeError::BadFormat("selector type is not an integer"));
        };
        let get_str = |heap: &Heap, slot: usize| -> Result<String> {
            heap.get_string(heap.get_elem(value, slot)?)
        };

        let sel = match code {
            SEL_TYPE => Selector::Type {
                // the type selector stores namespace at 1, name at 2
                name: get_str(heap, SELECTOR_ATTRIB_NAME)?,
            },
            SEL_ID => Selector::Id {
                name: get_str(heap, SELECTOR_NAME)?,
            },
            SEL_CLASS => Selector::Class {
                name: get_str(heap, SELECTOR_NAME)?,
            },
            SEL_ATTRIB => Selector::Attrib {
                name: get_str(heap, SELECTOR_ATTRIB_NAME)?,
            },
            SEL_ATTRIB_PREFIX | SEL_ATTRIB_SUFFIX | SEL_ATTRIB_SUBSTRING | SEL_ATTRIB_EXACT
            | SEL_ATTRIB_INCLUDE | SEL_ATTRIB_DASH => Selector::AttribMatch {
                op: match code {
                    SEL_ATTRIB_PREFIX => AttribOp::Prefix,
                    SEL_ATTRIB_SUFFIX => AttribOp::Suffix,
                    SEL_ATTRIB_SUBSTRING => AttribOp::Substring,
                    SEL_ATTRIB_EXACT => AttribOp::Exact,
                    SEL_ATTRIB_INCLUDE => AttribOp::Include,
                    _ => AttribOp::Dash,
                },
                name: get_str(heap, SELECTOR_ATTRIB_NAME)?,
                value: get_str(heap, SELECTOR_ATTRIB_VALUE)?,
            },
            SEL_PSEUDO_ELEMENT => Selector::PseudoElement,
            SEL_PSEUDO_CLASS => Selector::PseudoClass {
                name: get_str(heap, SELECTOR_NAME)?.to_ascii_lowercase(),
            },
            SEL_FUNCTION_IDENT | SEL_FUNCTION_STRING | SEL_FUNCTION_ANB => Selector::Function,
            SEL_NOT => {
                let inner = self.mirror_selector(heap, heap.get_elem(value, SELECTOR_NAME)?)?;
                Selector::Not(inner)
            }
            SEL_SEQUENCE => {
                let list = heap.get_elem(value, SELECTOR_NAME)?;
                let len = heap.array_len(list)?;
                let mut ids = SmallVec::new();
                for i in 0..len {
                    let sub = heap.get_elem(list, i)?;
                    ids.push(self.mirror_selector(heap, sub)?);
                }
                Selector::Sequence(ids)
            }
            COMB_DESCENDANT | COMB_CHILD | COMB_NEXT_SIBLING | COMB_SUBSEQUENT_SIBLING => {
                let first =
                    self.mirror_selector(heap, heap.get_elem(value, SELECTOR_FIRST)?)?;
                let second =
                    self.mirror_selector(heap, heap.get_elem(value, SELECTOR_SECOND)?)?;
                Selector::Combinator {
                    kind: match code {
                        COMB_DESCENDANT => CombKind::Descendant,
                        COMB_CHILD => CombKind::Child,
                        COMB_NEXT_SIBLING => CombKind::NextSibling,
                        _ => CombKind::SubsequentSibling,
                    },
                    first,
                    second,
                }
            }
            _ => return Err(RuntimeError::BadFormat("unknown selector type")),
        };
        self.selectors[id] = sel;
        Ok(())
    }

    // ----- matching --------------------------------------------------------

    fn attr<'a>(&'a self, elem: ElementId, name: &str) -> Option<&'a str> {
        self.elements[elem]
            .attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Previous sibling that is a real tag (skips `#text`/`#comment`).
    fn prev_tag(&self, elem: ElementId) -> Option<ElementId> {
        let mut cur = self.elements[elem].prev;
        while let Some(e) = cur {
            if !self.elements[e].name.starts_with('#') {
                return Some(e);
            }
            cur = self.elements[e].prev;
        }
        None
    }

    fn next_tag(&self, elem: ElementId) -> Option<ElementId> {
        let mut cur = self.elements[elem].next;
        while let Some(e) = cur {
            if !self.elements[e].name.starts_with('#') {
                return Some(e);
            }
            cur = self.elements[e].next;
        }
        None
    }

    fn eval(&self, elem: ElementId, sel: SelectorId) -> bool {
        match &self.selectors[sel] {
            Selector::Type { name } => name == "*" || self.elements[elem].name == *name,
            Selector::Id { name } => self.attr(elem, "id") == Some(name.as_str()),
            Selector::Class { name } => {
                self.elements[elem].classes.iter().any(|c| c == name)
            }
            Selector::Attrib { name } => self.attr(elem, name).is_some(),
            Selector::AttribMatch { op, name, value } => {
                let Some(actual) = self.attr(elem, name) else {
                    return false;
                };
                match op {
                    AttribOp::Prefix => actual.starts_with(value.as_str()),
                    AttribOp::Suffix => actual.ends_with(value.as_str()),
                    AttribOp::Substring => actual.contains(value.as_str()),
                    AttribOp::Exact => actual == value,
                    AttribOp::Include => include_word_match(actual, value),
                    AttribOp::Dash => {
                        actual == value
                            || (actual.len() > value.len()
                                && actual.starts_with(value.as_str())
                                && actual.as_bytes()[value.len()] == b'-')
                    }
                }
            }
            Selector::PseudoElement | Selector::Function | Selector::Pending => false,
            Selector::PseudoClass { name } => self.eval_pseudo_class(elem, name),
            Selector::Not(inner) => !self.eval(elem, *inner),
            Selector::Sequence(ids) => ids.iter().all(|&s| self.eval(elem, s)),
            Selector::Combinator { kind, first, second } => {
                if !self.eval(elem, *second) {
                    return false;
                }
                match kind {
                    CombKind::Descendant => {
                        let mut cur = self.elements[elem].parent;
                        while let Some(parent) = cur {
                            if self.elements[parent].name == "#document" {
                                break;
                            }
                            if self.eval(parent, *first) {
                                return true;
                            }
                            cur = self.elements[parent].parent;
                        }
                        false
                    }
                    CombKind::Child => match self.elements[elem].parent {
                        Some(parent) if self.elements[parent].name != "#document" => {
                            self.eval(parent, *first)
                        }
                        _ => false,
                    },
                    CombKind::NextSibling => match self.prev_tag(elem) {
                        Some(prev) => self.eval(prev, *first),
                        None => false,
                    },
                    CombKind::SubsequentSibling => {
                        let mut cur = self.prev_tag(elem);
                        while let Some(prev) = cur {
                            if self.eval(prev, *first) {
                                return true;
                            }
                            cur = self.prev_tag(prev);
                        }
                        false
                    }
                }
            }
        }
    }

    fn eval_pseudo_class(&self, elem: ElementId, name: &str) -> bool {
        match name {
            "root" => match self.elements[elem].parent {
                Some(parent) => self.elements[parent].name == "#document",
                None => false,
            },
            "empty" => {
                let mut cur = self.elements[elem].first_child;
                while let Some(child) = cur {
                    let c = &self.elements[child];
                    let ignorable =
                        c.name == "#comment" || (c.name == "#text" && c.data_len == 0);
                    if !ignorable {
                        return false;
                    }
                    cur = c.next;
                }
                true
            }
            "first-child" => self.prev_tag(elem).is_none(),
            "last-child" => self.next_tag(elem).is_none(),
            "only-child" => self.prev_tag(elem).is_none() && self.next_tag(elem).is_none(),
            "first-of-type" => !self.has_same_type(elem, Direction::Prev),
            "last-of-type" => !self.has_same_type(elem, Direction::Next),
            "only-of-type" => {
                !self.has_same_type(elem, Direction::Prev)
                    && !self.has_same_type(elem, Direction::Next)
            }
            _ => false,
        }
    }

    fn has_same_type(&self, elem: ElementId, dir: Direction) -> bool {
        let name = &self.elements[elem].name;
        let step = |e| match dir {
            Direction::Prev => self.prev_tag(e),
            Direction::Next => self.next_tag(e),
        };
        let mut cur = step(elem);
        while let Some(e) = cur {
            if self.elements[e].name == *name {
                return true;
            }
            cur = step(e);
        }
        false
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Prev,
    Next,
}

/// Heap-handle surface: matchers owned by the script heap as refcounted
/// typed handles.
pub struct CssHandles {
    matcher_tag: u32,
}

impl CssHandles {
    /// Reserves the matcher handle type; call once per heap.
    pub fn install(heap: &mut Heap) -> Self {
        Self {
            matcher_tag: heap.register_handle_types(1),
        }
    }

    /// Builds a matcher over `document` and wraps it in a handle.
    pub fn matcher_create(&self, heap: &mut Heap, document: Value) -> Result<Value> {
        let matcher = CssMatcher::new(heap, document)?;
        Ok(heap.create_handle(self.matcher_tag, std::cell::RefCell::new(matcher)))
    }

    /// Runs [`CssMatcher::matches`] through a matcher handle.
    pub fn matcher_matches(
        &self,
        heap: &Heap,
        matcher: Value,
        element: Value,
        selector: Value,
    ) -> Result<bool> {
        let cell = heap.get_handle::<std::cell::RefCell<CssMatcher>>(matcher, self.matcher_tag)?;
        let mut m = cell.borrow_mut();
        m.matches(heap, element, selector)
    }
}

/// Whitespace-separated word match for `[attr~=value]`.
///
/// The upstream matcher compares the word-search result to zero, which
/// inverts the sense; every CSS implementation treats a found word as a
/// match, and that is the behavior here.
fn include_word_match(haystack: &str, word: &str) -> bool {
    haystack
        .split([' ', '\t', '\n', '\r', '\x0C'])
        .any(|token| token == word)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a script-side element array the way page scripts do.
    fn make_element(heap: &mut Heap, name: &str) -> Value {
        let arr = heap.create_array(ELEM_SIZE);
        let name_v = heap.create_string(name);
        heap.set_elem(arr, ELEM_TYPE, name_v).unwrap();
        arr
    }

    fn link_children(heap: &mut Heap, parent: Value, children: &[Value]) {
        for (i, &child) in children.iter().enumerate() {
            heap.set_elem(child, ELEM_PARENT, parent).unwrap();
            if i > 0 {
                heap.set_elem(child, ELEM_PREV, children[i - 1]).unwrap();
                heap.set_elem(children[i - 1], ELEM_NEXT, child).unwrap();
            }
        }
        if let (Some(&first), Some(&last)) = (children.first(), children.last()) {
            heap.set_elem(parent, ELEM_FIRST_CHILD, first).unwrap();
            heap.set_elem(parent, ELEM_LAST_CHILD, last).unwrap();
        }
    }

    fn set_attr(heap: &mut Heap, elem: Value, name: &str, value: &str) {
        let attrs = match heap.get_elem(elem, ELEM_ATTRS).unwrap() {
            v if v.is_null() => {
                let h = heap.create_hash();
                heap.set_elem(elem, ELEM_ATTRS, h).unwrap();
                h
            }
            v => v,
        };
        let k = heap.create_string(name);
        let v = heap.create_string(value);
        heap.hash_set(attrs, k, v).unwrap();
    }

    fn add_class(heap: &mut Heap, elem: Value, class: &str) {
        let set = match heap.get_elem(elem, ELEM_CLASS_SET).unwrap() {
            v if v.is_null() => {
                let h = heap.create_hash();
                heap.set_elem(elem, ELEM_CLASS_SET, h).unwrap();
                h
            }
            v => v,
        };
        let k = heap.create_string(class);
        heap.hash_set(set, k, Value::Int(1)).unwrap();
    }

    fn sel(heap: &mut Heap, code: i32) -> Value {
        let arr = heap.create_array(SELECTOR_SIZE);
        heap.set_elem(arr, SELECTOR_TYPE, Value::Int(code)).unwrap();
        arr
    }

    fn sel_type(heap: &mut Heap, name: &str) -> Value {
        let s = sel(heap, SEL_TYPE);
        let n = heap.create_string(name);
        heap.set_elem(s, SELECTOR_ATTRIB_NAME, n).unwrap();
        s
    }

    fn sel_named(heap: &mut Heap, code: i32, name: &str) -> Value {
        let s = sel(heap, code);
        let n = heap.create_string(name);
        heap.set_elem(s, SELECTOR_NAME, n).unwrap();
        s
    }

    fn sel_attrib(heap: &mut Heap, code: i32, name: &str, value: &str) -> Value {
        let s = sel(heap, code);
        let n = heap.create_string(name);
        let v = heap.create_string(value);
        heap.set_elem(s, SELECTOR_ATTRIB_NAME, n).unwrap();
        heap.set_elem(s, SELECTOR_ATTRIB_VALUE, v).unwrap();
        s
    }

    fn comb(heap: &mut Heap, code: i32, first: Value, second: Value) -> Value {
        let s = sel(heap, code);
        heap.set_elem(s, SELECTOR_FIRST, first).unwrap();
        heap.set_elem(s, SELECTOR_SECOND, second).unwrap();
        s
    }

    /// `#document > div > (p, ul > (li, li))`
    struct Dom {
        heap: Heap,
        document: Value,
        div: Value,
        p: Value,
        li1: Value,
        li2: Value,
    }

    fn build_dom() -> Dom {
        let mut heap = Heap::new();
        let document = make_element(&mut heap, "#document");
        let div = make_element(&mut heap, "div");
        let p = make_element(&mut heap, "p");
        let ul = make_element(&mut heap, "ul");
        let li1 = make_element(&mut heap, "li");
        let li2 = make_element(&mut heap, "li");
        link_children(&mut heap, document, &[div]);
        link_children(&mut heap, div, &[p, ul]);
        link_children(&mut heap, ul, &[li1, li2]);
        Dom {
            heap,
            document,
            div,
            p,
            li1,
            li2,
        }
    }

    #[test]
    fn type_and_wildcard() {
        let mut dom = build_dom();
        let mut m = CssMatcher::new(&dom.heap, dom.document).unwrap();
        let s_div = sel_type(&mut dom.heap, "div");
        let s_any = sel_type(&mut dom.heap, "*");
        assert!(m.matches(&dom.heap, dom.div, s_div).unwrap());
        assert!(!m.matches(&dom.heap, dom.p, s_div).unwrap());
        assert!(m.matches(&dom.heap, dom.p, s_any).unwrap());
    }

    #[test]
    fn descendant_combinator_stops_at_document() {
        let mut dom = build_dom();
        let mut m = CssMatcher::new(&dom.heap, dom.document).unwrap();
        let s = {
            let a = sel_type(&mut dom.heap, "div");
            let b = sel_type(&mut dom.heap, "p");
            comb(&mut dom.heap, COMB_DESCENDANT, a, b)
        };
        assert!(m.matches(&dom.heap, dom.p, s).unwrap());

        // `#document p` must not match: the walk stops at #document
        let s2 = {
            let a = sel_type(&mut dom.heap, "#document");
            let b = sel_type(&mut dom.heap, "p");
            comb(&mut dom.heap, COMB_DESCENDANT, a, b)
        };
        assert!(!m.matches(&dom.heap, dom.p, s2).unwrap());
    }

    #[test]
    fn child_combinator_and_first_child() {
        let mut dom = build_dom();
        let mut m = CssMatcher::new(&dom.heap, dom.document).unwrap();
        let s = {
            let a = sel_type(&mut dom.heap, "ul");
            let b = sel_named(&mut dom.heap, SEL_PSEUDO_CLASS, "first-child");
            comb(&mut dom.heap, COMB_CHILD, a, b)
        };
        assert!(m.matches(&dom.heap, dom.li1, s).unwrap());
        assert!(!m.matches(&dom.heap, dom.li2, s).unwrap());
    }

    #[test]
    fn include_matches_whitespace_words() {
        let mut dom = build_dom();
        set_attr(&mut dom.heap, dom.p, "class", "alpha beta\tgamma");
        let mut m = CssMatcher::new(&dom.heap, dom.document).unwrap();

        let hit = sel_attrib(&mut dom.heap, SEL_ATTRIB_INCLUDE, "class", "beta");
        let miss = sel_attrib(&mut dom.heap, SEL_ATTRIB_INCLUDE, "class", "bet");
        assert!(m.matches(&dom.heap, dom.p, hit).unwrap());
        assert!(!m.matches(&dom.heap, dom.p, miss).unwrap());
    }

    #[test]
    fn not_and_class() {
        let mut dom = build_dom();
        add_class(&mut dom.heap, dom.p, "x");
        let mut m = CssMatcher::new(&dom.heap, dom.document).unwrap();

        let s = {
            let cls = sel_named(&mut dom.heap, SEL_CLASS, "x");
            let not = sel(&mut dom.heap, SEL_NOT);
            dom.heap.set_elem(not, SELECTOR_NAME, cls).unwrap();
            not
        };
        assert!(!m.matches(&dom.heap, dom.p, s).unwrap());
        assert!(m.matches(&dom.heap, dom.div, s).unwrap());
    }

    #[test]
    fn dash_match() {
        let mut dom = build_dom();
        set_attr(&mut dom.heap, dom.p, "lang", "en-US");
        let mut m = CssMatcher::new(&dom.heap, dom.document).unwrap();

        let en = sel_attrib(&mut dom.heap, SEL_ATTRIB_DASH, "lang", "en");
        let exact = sel_attrib(&mut dom.heap, SEL_ATTRIB_DASH, "lang", "en-US");
        let es = sel_attrib(&mut dom.heap, SEL_ATTRIB_DASH, "lang", "es");
        assert!(m.matches(&dom.heap, dom.p, en).unwrap());
        assert!(m.matches(&dom.heap, dom.p, exact).unwrap());
        assert!(!m.matches(&dom.heap, dom.p, es).unwrap());
    }

    #[test]
    fn of_type_walks_skip_text_nodes() {
        let mut heap = Heap::new();
        let document = make_element(&mut heap, "#document");
        let div = make_element(&mut heap, "div");
        let p1 = make_element(&mut heap, "p");
        let text = make_element(&mut heap, "#text");
        let span = make_element(&mut heap, "span");
        let p2 = make_element(&mut heap, "p");
        link_children(&mut heap, document, &[div]);
        link_children(&mut heap, div, &[p1, text, span, p2]);
        let mut m = CssMatcher::new(&heap, document).unwrap();

        let first = sel_named(&mut heap, SEL_PSEUDO_CLASS, "first-of-type");
        let only = sel_named(&mut heap, SEL_PSEUDO_CLASS, "only-of-type");
        assert!(m.matches(&heap, p1, first).unwrap());
        assert!(!m.matches(&heap, p2, first).unwrap());
        assert!(m.matches(&heap, span, only).unwrap());
        assert!(!m.matches(&heap, p1, only).unwrap());
    }

    #[test]
    fn matcher_handles_check_types_and_dispatch() {
        let mut dom = build_dom();
        let handles = CssHandles::install(&mut dom.heap);
        let matcher = handles.matcher_create(&mut dom.heap, dom.document).unwrap();

        let s = sel_type(&mut dom.heap, "div");
        assert!(handles
            .matcher_matches(&dom.heap, matcher, dom.div, s)
            .unwrap());

        // a foreign handle value is rejected by the type tag
        let other_tag = dom.heap.register_handle_types(1);
        let bogus = dom.heap.create_handle(other_tag, 0u8);
        assert!(handles
            .matcher_matches(&dom.heap, bogus, dom.div, s)
            .is_err());
    }

    #[test]
    fn empty_ignores_comments_and_blank_text() {
        let mut heap = Heap::new();
        let document = make_element(&mut heap, "#document");
        let div = make_element(&mut heap, "div");
        let comment = make_element(&mut heap, "#comment");
        let text = make_element(&mut heap, "#text");
        let data = heap.create_array(0);
        heap.set_elem(text, ELEM_DATA, data).unwrap();
        link_children(&mut heap, document, &[div]);
        link_children(&mut heap, div, &[comment, text]);
        let mut m = CssMatcher::new(&heap, document).unwrap();

        let empty = sel_named(&mut heap, SEL_PSEUDO_CLASS, "empty");
        assert!(m.matches(&heap, div, empty).unwrap());
    }
}
