//! Per-branch scope stack.
//!
//! Each compilation branch owns a stack of nested semantic contexts.
//! Frames are held behind `Rc`: forking a branch clones the vector of
//! handles, and clone-on-write (`Rc::make_mut`) isolates any frame a
//! branch mutates afterwards. Immutable frames lower in the stack stay
//! structurally shared between branches, which is what makes forking
//! cheap and join comparison a plain equality check.

use std::fmt;
use std::rc::Rc;

use crate::symbol::{Family, Signature, StorageClass};
use crate::token::Loc;

/// A struct/union/enum reference being accumulated by an arising
/// specification.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TagRef {
    pub family: Family,
    pub name: Option<String>,
    pub loc: Loc,
    /// A `{` body was seen, making this a tag definition.
    pub defined: bool,
}

/// The declarator chain of an arising specification.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct Declarator {
    pub pointer: u8,
    pub name: Option<String>,
    pub name_loc: Option<Loc>,
    pub array: bool,
    pub signature: Option<Signature>,
}

impl Declarator {
    pub fn reset(&mut self) {
        *self = Declarator::default();
    }
}

/// A declaration being progressively constructed before its declarator
/// is complete. Mutable while on top of the stack.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct ArisingSpec {
    pub storage: StorageClass,
    pub qualifiers: Vec<String>,
    pub specifiers: Vec<String>,
    pub tag: Option<TagRef>,
    pub declarator: Declarator,
    /// Enumerators collected from an `enum { … }` body.
    pub enum_constants: Vec<(String, Loc)>,
    /// Skipping an enumerator's `= value` expression.
    pub enum_skip: bool,
    /// Brace depth while consuming a struct/union/enum body.
    pub body_depth: u32,
    pub start: Option<Loc>,
}

impl ArisingSpec {
    pub fn in_tag_body(&self) -> bool {
        self.body_depth > 0
    }

    /// Normalized specifier text, tag reference included.
    pub fn specifier_text(&self) -> String {
        match &self.tag {
            Some(tag) => {
                let kw = match tag.family {
                    Family::TagStruct => "struct",
                    Family::TagUnion => "union",
                    _ => "enum",
                };
                match &tag.name {
                    Some(name) => format!("{} {}", kw, name),
                    None => kw.to_string(),
                }
            }
            None => self.specifiers.join(" "),
        }
    }
}

/// Parameter list being collected between `(` and `)`.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct SigScope {
    pub sig: Signature,
    /// Token texts of the parameter currently being read.
    pub current: Vec<String>,
    pub current_storage: StorageClass,
    /// Nested parenthesis depth inside the parameter list.
    pub depth: u32,
}

/// One nested semantic context.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    TranslationUnit,
    Arising(ArisingSpec),
    Function { name: String },
    Compound,
    Initializer { depth: u32 },
    FunctionSignature(SigScope),
}

impl Frame {
    pub fn is_arising(&self) -> bool {
        matches!(self, Frame::Arising(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Frame::Function { .. })
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::TranslationUnit => write!(f, "translation-unit"),
            Frame::Arising(_) => write!(f, "arising-specification"),
            Frame::Function { name } => write!(f, "function {}", name),
            Frame::Compound => write!(f, "compound-statement"),
            Frame::Initializer { .. } => write!(f, "initializer"),
            Frame::FunctionSignature(_) => write!(f, "function-signature"),
        }
    }
}

/// LIFO stack of scope frames, one per branch.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeStack {
    frames: Vec<Rc<Frame>>,
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStack {
    /// A fresh stack holding the translation-unit frame.
    pub fn new() -> Self {
        Self { frames: vec![Rc::new(Frame::TranslationUnit)] }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn enter(&mut self, frame: Frame) {
        self.frames.push(Rc::new(frame));
    }

    /// Pops the current frame. The translation-unit frame stays.
    pub fn leave(&mut self) -> Option<Frame> {
        if self.frames.len() <= 1 {
            return None;
        }
        let rc = self.frames.pop().expect("non-empty scope stack");
        Some(Rc::try_unwrap(rc).unwrap_or_else(|rc| (*rc).clone()))
    }

    pub fn current(&self) -> &Frame {
        self.frames.last().expect("non-empty scope stack")
    }

    /// Mutable access to the current frame; clones it first if it is
    /// shared with a sibling branch.
    pub fn current_mut(&mut self) -> &mut Frame {
        let rc = self.frames.last_mut().expect("non-empty scope stack");
        Rc::make_mut(rc)
    }

    /// The frame `depth` levels up: 0 is the current frame, 1 the one
    /// directly enclosing it.
    pub fn surrounding(&self, depth: usize) -> Option<&Frame> {
        let len = self.frames.len();
        if depth < len {
            Some(&self.frames[len - 1 - depth])
        } else {
            None
        }
    }

    /// The nearest frame matching `pred`, searching inside-out.
    pub fn find(&self, pred: impl Fn(&Frame) -> bool) -> Option<&Frame> {
        self.frames.iter().rev().map(Rc::as_ref).find(|&f| pred(f))
    }

    /// The name of the nearest enclosing function, if any.
    pub fn enclosing_function(&self) -> Option<&str> {
        self.find(|f| f.is_function()).and_then(|f| match f {
            Frame::Function { name } => Some(name.as_str()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifo() {
        let mut stack = ScopeStack::new();
        assert_eq!(stack.depth(), 1);
        assert_eq!(*stack.current(), Frame::TranslationUnit);

        stack.enter(Frame::Function { name: "f".into() });
        stack.enter(Frame::Compound);
        assert_eq!(stack.depth(), 3);
        assert_eq!(*stack.current(), Frame::Compound);
        assert_eq!(stack.surrounding(1), Some(&Frame::Function { name: "f".into() }));
        assert_eq!(stack.surrounding(2), Some(&Frame::TranslationUnit));
        assert_eq!(stack.surrounding(3), None);

        assert_eq!(stack.leave(), Some(Frame::Compound));
        assert_eq!(stack.depth(), 2);
    }

    #[test]
    fn test_translation_unit_frame_stays() {
        let mut stack = ScopeStack::new();
        assert_eq!(stack.leave(), None);
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn test_find_nearest() {
        let mut stack = ScopeStack::new();
        stack.enter(Frame::Function { name: "outer".into() });
        stack.enter(Frame::Compound);
        assert_eq!(stack.enclosing_function(), Some("outer"));
        assert!(stack.find(|f| matches!(f, Frame::Initializer { .. })).is_none());
    }

    #[test]
    fn test_forked_stacks_do_not_corrupt_each_other() {
        let mut a = ScopeStack::new();
        a.enter(Frame::Arising(ArisingSpec {
            specifiers: vec!["int".into()],
            ..Default::default()
        }));

        let mut b = a.clone();
        assert_eq!(a, b);

        if let Frame::Arising(spec) = b.current_mut() {
            spec.declarator.name = Some("x".into());
        }
        assert_ne!(a, b);
        if let Frame::Arising(spec) = a.current() {
            assert_eq!(spec.declarator.name, None);
        }
    }
}
