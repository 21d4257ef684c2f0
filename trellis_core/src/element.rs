// Copyright 2026 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The declarative tree the reconciler consumes.
//!
//! A render produces a [`Node`]: nothing, a text leaf, an [`Element`], or an
//! ordered list of nodes. Elements carry an [`ElementType`] (host tag or
//! component identity), an optional [`Key`], and [`Props`].
//!
//! Component identity is pointer identity. A [`FunctionComponent`] must be
//! created once and reused; creating a fresh one on every render makes every
//! render look like a type change and remounts the subtree.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::any::Any;
use core::cell::RefCell;
use core::fmt;

use crate::context::ContextHandle;
use crate::error::{EffectError, ReconcileError};
use crate::hooks::RenderCx;

/// Sibling-unique identity of an element.
pub type Key = Rc<str>;

/// A type-erased context value.
pub type ContextValue = Rc<dyn Any>;

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// A declarative child specification.
#[derive(Clone, Default)]
pub enum Node {
    /// Renders nothing (`null`, `false`, the empty string).
    #[default]
    Empty,
    /// A text leaf. Numbers are rendered through their decimal text.
    Text(Rc<str>),
    /// A single element.
    Element(Rc<Element>),
    /// An ordered list of children.
    List(Rc<[Node]>),
}

impl Node {
    /// Creates a text node.
    pub fn text(s: impl Into<Rc<str>>) -> Self {
        Self::Text(s.into())
    }

    /// Creates a list node.
    pub fn list(items: impl IntoIterator<Item = Self>) -> Self {
        Self::List(items.into_iter().collect())
    }

    /// Returns the text of a non-empty text node.
    ///
    /// Empty text renders nothing, so it is not treated as text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) if !s.is_empty() => Some(&**s),
            _ => None,
        }
    }

    /// Identity comparison: text by value, elements and lists by pointer.
    #[must_use]
    pub fn is(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Empty, Self::Empty) => true,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Element(a), Self::Element(b)) => Rc::ptr_eq(a, b),
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<Element> for Node {
    fn from(el: Element) -> Self {
        Self::Element(Rc::new(el))
    }
}

impl From<ElementBuilder> for Node {
    fn from(b: ElementBuilder) -> Self {
        b.build()
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Self::Text(s.into())
    }
}

impl From<String> for Node {
    fn from(s: String) -> Self {
        Self::Text(s.into())
    }
}

impl From<i64> for Node {
    fn from(n: i64) -> Self {
        Self::Text(n.to_string().into())
    }
}

impl From<Vec<Self>> for Node {
    fn from(v: Vec<Self>) -> Self {
        Self::List(v.into())
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Text(s) => write!(f, "Text({s:?})"),
            Self::Element(el) => el.fmt(f),
            Self::List(items) => f.debug_list().entries(items.iter()).finish(),
        }
    }
}

/// An element descriptor: `{ type, key, props }`.
#[derive(Clone)]
pub struct Element {
    pub(crate) ty: ElementType,
    pub(crate) key: Option<Key>,
    pub(crate) props: Props,
}

impl Element {
    /// The element's type.
    #[must_use]
    pub fn ty(&self) -> &ElementType {
        &self.ty
    }

    /// The element's key.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// The element's props.
    #[must_use]
    pub fn props(&self) -> &Props {
        &self.props
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("ty", &self.ty)
            .field("key", &self.key)
            .field("props", &self.props)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Element types
// ---------------------------------------------------------------------------

/// What an element renders as.
#[derive(Clone)]
pub enum ElementType {
    /// A host element with the given tag (`"div"`, `"li"`, …).
    Host(Rc<str>),
    /// A function component.
    Function(FunctionComponent),
    /// A class component.
    Class(ClassType),
    /// Groups children without a host node.
    Fragment,
    /// Provides a context value to its subtree.
    Provider(ContextHandle),
    /// Reads a context value through a render prop.
    Consumer(ContextHandle),
    /// Skips re-rendering its inner component when props compare equal.
    Memo(MemoType),
}

impl ElementType {
    /// Type compatibility used to decide whether a fiber can be reused.
    #[must_use]
    pub fn same_type(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Host(a), Self::Host(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(&a.0, &b.0),
            (Self::Class(a), Self::Class(b)) => Rc::ptr_eq(&a.0, &b.0),
            (Self::Fragment, Self::Fragment) => true,
            (Self::Provider(a), Self::Provider(b)) | (Self::Consumer(a), Self::Consumer(b)) => {
                a.id() == b.id()
            }
            (Self::Memo(a), Self::Memo(b)) => Rc::ptr_eq(&a.0, &b.0),
            _ => false,
        }
    }

    /// A short name for diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Host(tag) => &**tag,
            Self::Function(c) => c.name(),
            Self::Class(c) => c.name(),
            Self::Fragment => "Fragment",
            Self::Provider(_) => "Provider",
            Self::Consumer(_) => "Consumer",
            Self::Memo(m) => m.inner().name(),
        }
    }
}

impl fmt::Debug for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host(tag) => write!(f, "Host({tag})"),
            Self::Function(c) => write!(f, "Function({})", c.name()),
            Self::Class(c) => write!(f, "Class({})", c.name()),
            Self::Fragment => f.write_str("Fragment"),
            Self::Provider(ctx) => write!(f, "Provider({:?})", ctx.id()),
            Self::Consumer(ctx) => write!(f, "Consumer({:?})", ctx.id()),
            Self::Memo(m) => write!(f, "Memo({:?})", m.inner()),
        }
    }
}

type RenderFn = dyn Fn(&mut RenderCx<'_, '_>, &Props) -> Node;

struct FunctionDef {
    name: Rc<str>,
    render: Box<RenderFn>,
}

/// A function component: a render function plus a diagnostic name.
#[derive(Clone)]
pub struct FunctionComponent(Rc<FunctionDef>);

impl FunctionComponent {
    /// Creates a component from a render function.
    pub fn new(
        name: impl Into<Rc<str>>,
        render: impl Fn(&mut RenderCx<'_, '_>, &Props) -> Node + 'static,
    ) -> Self {
        Self(Rc::new(FunctionDef {
            name: name.into(),
            render: Box::new(render),
        }))
    }

    /// The diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Starts an element of this component.
    #[must_use]
    pub fn element(&self) -> ElementBuilder {
        ElementBuilder::new(ElementType::Function(self.clone()))
    }

    pub(crate) fn render(&self, cx: &mut RenderCx<'_, '_>, props: &Props) -> Node {
        (self.0.render)(cx, props)
    }
}

impl fmt::Debug for FunctionComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionComponent({})", self.name())
    }
}

/// A stateful component instance.
///
/// One instance is constructed when the component mounts and reused for every
/// later render at the same position.
pub trait Component {
    /// Renders the component. `context` is the current value of the class's
    /// declared context type, if it has one.
    fn render(&mut self, props: &Props, context: Option<&ContextValue>) -> Node;

    /// Called after the instance's host nodes are first attached.
    fn did_mount(&mut self) -> Result<(), EffectError> {
        Ok(())
    }

    /// Called after a re-render has been committed.
    fn did_update(&mut self, prev_props: &Props) -> Result<(), EffectError> {
        _ = prev_props;
        Ok(())
    }

    /// Called before the instance's host nodes are removed.
    fn will_unmount(&mut self) {}
}

type Constructor = dyn Fn(&Props) -> Box<dyn Component>;

struct ClassDef {
    name: Rc<str>,
    construct: Box<Constructor>,
    context_type: Option<ContextHandle>,
}

/// A class component: a constructor for [`Component`] instances.
#[derive(Clone)]
pub struct ClassType(Rc<ClassDef>);

impl ClassType {
    /// Creates a class type from a constructor.
    pub fn new(
        name: impl Into<Rc<str>>,
        construct: impl Fn(&Props) -> Box<dyn Component> + 'static,
    ) -> Self {
        Self(Rc::new(ClassDef {
            name: name.into(),
            construct: Box::new(construct),
            context_type: None,
        }))
    }

    /// Creates a class type that reads `context` on every render.
    pub fn with_context(
        name: impl Into<Rc<str>>,
        context: ContextHandle,
        construct: impl Fn(&Props) -> Box<dyn Component> + 'static,
    ) -> Self {
        Self(Rc::new(ClassDef {
            name: name.into(),
            construct: Box::new(construct),
            context_type: Some(context),
        }))
    }

    /// The diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Starts an element of this class.
    #[must_use]
    pub fn element(&self) -> ElementBuilder {
        ElementBuilder::new(ElementType::Class(self.clone()))
    }

    pub(crate) fn context_type(&self) -> Option<&ContextHandle> {
        self.0.context_type.as_ref()
    }

    pub(crate) fn construct(&self, props: &Props) -> Rc<RefCell<Box<dyn Component>>> {
        Rc::new(RefCell::new((self.0.construct)(props)))
    }
}

impl fmt::Debug for ClassType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassType({})", self.name())
    }
}

type CompareFn = dyn Fn(&Props, &Props) -> bool;

struct MemoDef {
    inner: ElementType,
    compare: Option<Box<CompareFn>>,
}

/// A memoized wrapper around a function or class component.
#[derive(Clone)]
pub struct MemoType(Rc<MemoDef>);

impl MemoType {
    /// The wrapped component type.
    #[must_use]
    pub fn inner(&self) -> &ElementType {
        &self.0.inner
    }

    /// Returns `true` if the wrapped component can skip rendering with
    /// `next` props.
    pub(crate) fn props_equal(&self, prev: &Props, next: &Props) -> bool {
        match &self.0.compare {
            Some(compare) => compare(prev, next),
            None => shallow_equal(prev, next),
        }
    }

    /// Starts an element of this memoized component.
    #[must_use]
    pub fn element(&self) -> ElementBuilder {
        ElementBuilder::new(ElementType::Memo(self.clone()))
    }
}

/// Wraps `inner` so it re-renders only when its props change shallowly.
#[must_use]
pub fn memo(inner: ElementType) -> MemoType {
    MemoType(Rc::new(MemoDef {
        inner,
        compare: None,
    }))
}

/// Wraps `inner` with a custom props comparison. `compare` returns `true` when
/// the props are equal and rendering can be skipped.
pub fn memo_with(
    inner: ElementType,
    compare: impl Fn(&Props, &Props) -> bool + 'static,
) -> MemoType {
    MemoType(Rc::new(MemoDef {
        inner,
        compare: Some(Box::new(compare)),
    }))
}

// ---------------------------------------------------------------------------
// Props
// ---------------------------------------------------------------------------

/// An event listener stored in props.
#[derive(Clone)]
pub struct Listener(Rc<dyn Fn(&dyn Any)>);

impl Listener {
    /// Wraps a closure.
    pub fn new(f: impl Fn(&dyn Any) + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// Invokes the listener with an event payload.
    pub fn call(&self, event: &dyn Any) {
        (self.0)(event);
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Listener")
    }
}

/// A single prop value.
#[derive(Clone, Default)]
pub enum PropValue {
    /// Absent / `null`. Setting a property to `Null` clears it on the host.
    #[default]
    Null,
    /// A boolean.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A float.
    Float(f64),
    /// A string.
    Str(Rc<str>),
    /// An event listener.
    Callback(Listener),
    /// Any other value, compared by pointer.
    Any(Rc<dyn Any>),
}

impl PropValue {
    /// `Object.is` comparison.
    ///
    /// Numbers compare by value across `Int`/`Float`, `NaN` is itself, and
    /// `-0.0` is not `0`. Strings compare by content. Listeners and opaque
    /// values compare by pointer.
    #[must_use]
    pub fn is(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => float_is(*a, *b),
            #[expect(
                clippy::cast_precision_loss,
                reason = "numbers share one domain under Object.is"
            )]
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => {
                float_is(*a as f64, *b)
            }
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Callback(a), Self::Callback(b)) => Rc::ptr_eq(&a.0, &b.0),
            (Self::Any(a), Self::Any(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Text form used by hosts for attribute values. Listeners and opaque
    /// values have none.
    #[must_use]
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Null => Some(String::new()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Int(n) => Some(n.to_string()),
            Self::Float(x) => Some(x.to_string()),
            Self::Str(s) => Some(s.to_string()),
            Self::Callback(_) | Self::Any(_) => None,
        }
    }

    /// Downcasts an opaque value.
    #[must_use]
    pub fn downcast<T: 'static>(&self) -> Option<Rc<T>> {
        match self {
            Self::Any(v) => v.clone().downcast::<T>().ok(),
            _ => None,
        }
    }
}

fn float_is(a: f64, b: f64) -> bool {
    (a.is_nan() && b.is_nan()) || a.to_bits() == b.to_bits()
}

impl fmt::Debug for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Callback(_) => f.write_str("Callback"),
            Self::Any(_) => f.write_str("Any"),
        }
    }
}

impl From<bool> for PropValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for PropValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for PropValue {
    fn from(n: i32) -> Self {
        Self::Int(n.into())
    }
}

impl From<f64> for PropValue {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for PropValue {
    fn from(s: &str) -> Self {
        Self::Str(s.into())
    }
}

impl From<Rc<str>> for PropValue {
    fn from(s: Rc<str>) -> Self {
        Self::Str(s)
    }
}

impl From<String> for PropValue {
    fn from(s: String) -> Self {
        Self::Str(s.into())
    }
}

impl From<Listener> for PropValue {
    fn from(l: Listener) -> Self {
        Self::Callback(l)
    }
}

/// Children given as a function of a context value.
#[derive(Clone)]
pub struct RenderProp(Rc<dyn Fn(&ContextValue) -> Node>);

impl RenderProp {
    /// Wraps a closure.
    pub fn new(f: impl Fn(&ContextValue) -> Node + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub(crate) fn call(&self, value: &ContextValue) -> Node {
        (self.0)(value)
    }
}

#[derive(Default)]
struct PropsInner {
    attrs: Vec<(Rc<str>, PropValue)>,
    children: Node,
    render: Option<RenderProp>,
}

/// Immutable, cheaply cloned element props.
///
/// Attributes keep insertion order. `children` is the element's child
/// specification; `render` is the render-prop used by context consumers.
#[derive(Clone, Default)]
pub struct Props(Rc<PropsInner>);

impl Props {
    /// Props holding only a text child (the payload of a text fiber).
    pub(crate) fn from_text(text: Rc<str>) -> Self {
        Self(Rc::new(PropsInner {
            children: Node::Text(text),
            ..PropsInner::default()
        }))
    }

    /// Props holding only children (fragments).
    pub(crate) fn from_children(children: Node) -> Self {
        Self(Rc::new(PropsInner {
            children,
            ..PropsInner::default()
        }))
    }

    /// Looks up an attribute.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&PropValue> {
        self.0
            .attrs
            .iter()
            .find_map(|(k, v)| (&**k == key).then_some(v))
    }

    /// Iterates attributes in insertion order.
    pub fn attrs(&self) -> impl Iterator<Item = (&str, &PropValue)> {
        self.0.attrs.iter().map(|(k, v)| (&**k, v))
    }

    /// Number of attributes.
    #[must_use]
    pub fn attr_count(&self) -> usize {
        self.0.attrs.len()
    }

    /// The child specification.
    #[must_use]
    pub fn children(&self) -> &Node {
        &self.0.children
    }

    /// The render prop, if any.
    #[must_use]
    pub fn render_prop(&self) -> Option<&RenderProp> {
        self.0.render.as_ref()
    }

    /// Looks up a listener.
    ///
    /// Returns `Ok(None)` if the prop is absent, and an error if it is present
    /// but not callable.
    pub fn listener(&self, key: &str) -> Result<Option<&Listener>, ReconcileError> {
        match self.get(key) {
            None | Some(PropValue::Null) => Ok(None),
            Some(PropValue::Callback(l)) => Ok(Some(l)),
            Some(other) => Err(ReconcileError::NotCallable {
                prop: key.into(),
                found: alloc::format!("{other:?}"),
            }),
        }
    }

    /// Returns `true` if both handles point at the same props object.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (k, v) in &self.0.attrs {
            map.entry(k, v);
        }
        if !matches!(self.0.children, Node::Empty) {
            map.entry(&"children", &self.0.children);
        }
        map.finish()
    }
}

/// Shallow props comparison: same attribute keys, each value `Object.is`
/// equal, and identical children.
#[must_use]
pub fn shallow_equal(a: &Props, b: &Props) -> bool {
    if Props::ptr_eq(a, b) {
        return true;
    }
    if a.attr_count() != b.attr_count() {
        return false;
    }
    let attrs_equal = a
        .attrs()
        .all(|(k, v)| b.get(k).is_some_and(|other| v.is(other)));
    let render_equal = match (a.render_prop(), b.render_prop()) {
        (None, None) => true,
        (Some(x), Some(y)) => Rc::ptr_eq(&x.0, &y.0),
        _ => false,
    };
    attrs_equal && render_equal && a.children().is(b.children())
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Incrementally builds an [`Element`].
pub struct ElementBuilder {
    ty: ElementType,
    key: Option<Key>,
    attrs: Vec<(Rc<str>, PropValue)>,
    children: Vec<Node>,
    render: Option<RenderProp>,
}

impl fmt::Debug for ElementBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementBuilder")
            .field("ty", &self.ty)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl ElementBuilder {
    /// Starts an element of the given type.
    #[must_use]
    pub fn new(ty: ElementType) -> Self {
        Self {
            ty,
            key: None,
            attrs: Vec::new(),
            children: Vec::new(),
            render: None,
        }
    }

    /// Sets the key.
    #[must_use]
    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Sets an attribute, replacing an earlier value for the same key.
    #[must_use]
    pub fn attr(mut self, key: impl Into<Rc<str>>, value: impl Into<PropValue>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((key, value)),
        }
        self
    }

    /// Sets an event listener attribute.
    #[must_use]
    pub fn on(self, event: impl Into<Rc<str>>, f: impl Fn(&dyn Any) + 'static) -> Self {
        self.attr(event, Listener::new(f))
    }

    /// Appends a child.
    #[must_use]
    pub fn child(mut self, child: impl Into<Node>) -> Self {
        self.children.push(child.into());
        self
    }

    /// Appends a list of children as a single (keyed) list child.
    #[must_use]
    pub fn children(self, children: impl IntoIterator<Item = Node>) -> Self {
        self.child(Node::list(children))
    }

    /// Sets the render prop (used by context consumers).
    #[must_use]
    pub fn render(mut self, f: impl Fn(&ContextValue) -> Node + 'static) -> Self {
        self.render = Some(RenderProp::new(f));
        self
    }

    /// Finishes the element.
    #[must_use]
    pub fn build_element(self) -> Element {
        let children = match self.children.len() {
            0 => Node::Empty,
            1 => self.children.into_iter().next().unwrap_or_default(),
            _ => Node::List(self.children.into()),
        };
        Element {
            ty: self.ty,
            key: self.key,
            props: Props(Rc::new(PropsInner {
                attrs: self.attrs,
                children,
                render: self.render,
            })),
        }
    }

    /// Finishes the element as a [`Node`].
    #[must_use]
    pub fn build(self) -> Node {
        Node::Element(Rc::new(self.build_element()))
    }
}

/// Starts a host element.
#[must_use]
pub fn h(tag: &str) -> ElementBuilder {
    ElementBuilder::new(ElementType::Host(tag.into()))
}

/// Starts a fragment.
#[must_use]
pub fn fragment() -> ElementBuilder {
    ElementBuilder::new(ElementType::Fragment)
}

/// Creates a text node.
pub fn text(s: impl Into<Rc<str>>) -> Node {
    Node::text(s)
}
