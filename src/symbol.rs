//! Symbols and the condition-qualified symbol index.
//!
//! A symbol is one name the source can declare under some preprocessor
//! condition. The index merges repeated declarations of the same
//! `(namespace, identifier)` with condition-aware rules, so that parsing
//! both arms of a conditional never double-counts a declaration and the
//! disjunction of the indexed existence conditions is exactly the
//! condition under which the name is visible.

use std::collections::HashMap;
use std::fmt;

use log::debug;

use crate::cond::{Cond, Conditions};
use crate::diag::Diagnostic;
use crate::token::Loc;

/// What kind of thing a symbol is.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Family {
    Function,
    Variable,
    Typedef,
    TagStruct,
    TagUnion,
    TagEnum,
    EnumConstant,
    MacroObject,
    MacroFunction,
    Label,
}

impl Family {
    /// The C namespace the family lives in.
    pub fn namespace(self) -> Namespace {
        match self {
            Family::Function | Family::Variable | Family::Typedef | Family::EnumConstant => {
                Namespace::Ordinary
            }
            Family::TagStruct | Family::TagUnion | Family::TagEnum => Namespace::Tag,
            Family::Label => Namespace::Label,
            Family::MacroObject | Family::MacroFunction => Namespace::Macro,
        }
    }

    pub fn is_tag(self) -> bool {
        matches!(self, Family::TagStruct | Family::TagUnion | Family::TagEnum)
    }

    pub fn is_macro(self) -> bool {
        matches!(self, Family::MacroObject | Family::MacroFunction)
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Family::Function => "function",
            Family::Variable => "variable",
            Family::Typedef => "typedef",
            Family::TagStruct => "struct",
            Family::TagUnion => "union",
            Family::TagEnum => "enum",
            Family::EnumConstant => "enum-constant",
            Family::MacroObject => "macro-object",
            Family::MacroFunction => "macro-function",
            Family::Label => "label",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Namespace {
    Ordinary,
    Tag,
    Label,
    Macro,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Linkage {
    External,
    Internal,
    /// Block-scope names have no linkage.
    None,
    /// A typedef names a type only.
    Typedef,
}

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Linkage::External => write!(f, "extern"),
            Linkage::Internal => write!(f, "intern"),
            Linkage::None => write!(f, "none"),
            Linkage::Typedef => write!(f, "typedef"),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum StorageClass {
    #[default]
    Unspecified,
    Typedef,
    Extern,
    Static,
    Auto,
    Register,
}

impl StorageClass {
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "typedef" => Some(StorageClass::Typedef),
            "extern" => Some(StorageClass::Extern),
            "static" => Some(StorageClass::Static),
            "auto" => Some(StorageClass::Auto),
            "register" => Some(StorageClass::Register),
            _ => None,
        }
    }
}

/// Signature shape of a declarator: no type checking beyond this.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct TypeInfo {
    /// Normalized specifier text, e.g. `unsigned long` or `struct s`.
    pub specifiers: String,
    /// Qualifier text, e.g. `const`.
    pub qualifiers: String,
    pub pointer: u8,
    pub array: bool,
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.qualifiers.is_empty() {
            write!(f, "{} ", self.qualifiers)?;
        }
        write!(f, "{}", self.specifiers)?;
        for _ in 0..self.pointer {
            write!(f, " *")?;
        }
        if self.array {
            write!(f, " []")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Param {
    pub type_text: String,
    pub name: Option<String>,
    pub storage: StorageClass,
}

/// A function's parameter list, opened at `(` and closed at `)`.
///
/// The two parenthesis locations are the signature's adducers; the
/// signature is complete once both are present.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct Signature {
    pub params: Vec<Param>,
    pub variadic: bool,
    pub opened: Option<Loc>,
    pub closed: Option<Loc>,
}

impl Signature {
    pub fn open(loc: Loc) -> Self {
        Self { opened: Some(loc), ..Default::default() }
    }

    pub fn complete(&self) -> bool {
        self.opened.is_some() && self.closed.is_some()
    }

    /// Adds one parameter. `register` is the only storage class allowed
    /// in a parameter declaration.
    pub fn add_param(&mut self, param: Param) -> Result<(), String> {
        if !matches!(param.storage, StorageClass::Unspecified | StorageClass::Register) {
            return Err(format!(
                "invalid storage class in parameter `{}'",
                param.name.as_deref().unwrap_or("<anonymous>")
            ));
        }
        self.params.push(param);
        Ok(())
    }

    /// Parameter-for-parameter type match against a redeclaration.
    pub fn type_matches(&self, other: &Signature) -> bool {
        self.params.len() == other.params.len()
            && self.variadic == other.variadic
            && self
                .params
                .iter()
                .zip(&other.params)
                .all(|(a, b)| a.type_text == b.type_text)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p.type_text)?;
            if let Some(name) = &p.name {
                write!(f, " {}", name)?;
            }
        }
        if self.variadic {
            if !self.params.is_empty() {
                write!(f, ", ")?;
            }
            write!(f, "...")?;
        }
        write!(f, ")")
    }
}

/// Where a symbol was declared.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Origin {
    File,
    Function(String),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::File => write!(f, "file"),
            Origin::Function(name) => write!(f, "{}()", name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub identifier: String,
    pub family: Family,
    /// The preprocessor condition under which this symbol exists.
    pub existence: Cond,
    pub declarations: Vec<Loc>,
    pub definitions: Vec<Loc>,
    pub linkage: Linkage,
    pub storage: StorageClass,
    pub type_info: TypeInfo,
    pub signature: Option<Signature>,
    pub origin: Origin,
}

impl Symbol {
    pub fn namespace(&self) -> Namespace {
        self.family.namespace()
    }

    /// Structural equality: `(family, linkage, storage_class, type_info,
    /// signature shape)`. Conditions and locations are not compared.
    pub fn structurally_equal(&self, other: &Symbol) -> bool {
        self.family == other.family
            && self.linkage == other.linkage
            && self.storage == other.storage
            && self.type_info == other.type_info
            && match (&self.signature, &other.signature) {
                (Some(a), Some(b)) => a.type_matches(b),
                (None, None) => true,
                _ => false,
            }
    }

    fn merge_locs(&mut self, other: &Symbol) {
        for &loc in &other.declarations {
            if !self.declarations.contains(&loc) {
                self.declarations.push(loc);
            }
        }
        for &loc in &other.definitions {
            if !self.definitions.contains(&loc) {
                self.definitions.push(loc);
            }
        }
    }
}

/// Filter criteria for [`SymbolIndex::find`]; all present fields must
/// match.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub identifier: Option<String>,
    pub namespace: Option<Namespace>,
    pub family: Option<Family>,
    pub origin: Option<Origin>,
}

impl Query {
    fn matches(&self, sym: &Symbol) -> bool {
        self.identifier.as_ref().is_none_or(|i| *i == sym.identifier)
            && self.namespace.is_none_or(|n| n == sym.namespace())
            && self.family.is_none_or(|f| f == sym.family)
            && self.origin.as_ref().is_none_or(|o| *o == sym.origin)
    }
}

/// Maps `(namespace, identifier)` to the set of symbols that name can
/// denote, each qualified by its existence condition.
#[derive(Debug, Default)]
pub struct SymbolIndex {
    symbols: Vec<Symbol>,
    by_key: HashMap<(Namespace, String), Vec<usize>>,
}

impl SymbolIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    pub fn find(&self, query: &Query) -> Vec<&Symbol> {
        self.symbols.iter().filter(|s| query.matches(s)).collect()
    }

    /// Inserts a newly arising symbol, merging it with already-indexed
    /// symbols of the same `(namespace, identifier)` under the
    /// condition-aware rules. Returns the index of the canonical symbol
    /// and any diagnostics raised by the merge.
    pub fn announce(&mut self, conds: &Conditions, sym: Symbol) -> (usize, Vec<Diagnostic>) {
        let key = (sym.namespace(), sym.identifier.clone());
        let mut diags = Vec::new();

        let ids: Vec<usize> = self.by_key.get(&key).cloned().unwrap_or_default();

        // Partition the existing symbols by how their condition relates
        // to the new one.
        let c_new = sym.existence;
        let mut subsuming = Vec::new(); // existing condition is implied by the new one
        let mut subsumed = Vec::new(); // existing condition implies the new one
        let mut independent = Vec::new();
        for &i in &ids {
            let c_old = self.symbols[i].existence;
            if conds.implies(c_new, c_old) {
                subsuming.push(i);
            } else if conds.implies(c_old, c_new) {
                subsumed.push(i);
            } else {
                independent.push(i);
            }
        }

        if !subsuming.is_empty() && !subsumed.is_empty() {
            diags.push(Diagnostic::warning(
                sym.declarations.first().copied(),
                format!(
                    "inconsistent condition partition for `{}'",
                    sym.identifier
                ),
            ));
        }

        if let Some(&i) = subsuming.first() {
            // The new declaration exists under a condition the indexed
            // symbol already covers.
            if !self.symbols[i].structurally_equal(&sym) {
                diags.push(conflict(&self.symbols[i], &sym));
            }
            debug!("announce `{}': subsumed by existing {}", sym.identifier, i);
            self.symbols[i].merge_locs(&sym);
            return (i, diags);
        }

        if let Some(&i) = subsumed.first() {
            // The indexed symbol's condition is stricter; the new
            // declaration widens it.
            if !self.symbols[i].structurally_equal(&sym) {
                diags.push(conflict(&self.symbols[i], &sym));
            }
            let widened = conds.disjunction(self.symbols[i].existence, c_new);
            debug!(
                "announce `{}': widening existing {} to {}",
                sym.identifier,
                i,
                conds.display(widened)
            );
            self.symbols[i].existence = widened;
            self.symbols[i].merge_locs(&sym);
            return (i, diags);
        }

        // Only independent conditions remain: widen a structurally equal
        // symbol, otherwise insert as a separate one.
        if let Some(&i) = independent.iter().find(|&&i| self.symbols[i].structurally_equal(&sym)) {
            let widened = conds.disjunction(self.symbols[i].existence, c_new);
            debug!(
                "announce `{}': disjoining into existing {} as {}",
                sym.identifier,
                i,
                conds.display(widened)
            );
            self.symbols[i].existence = widened;
            self.symbols[i].merge_locs(&sym);
            return (i, diags);
        }

        if let Some(&i) = independent.first() {
            diags.push(conflict(&self.symbols[i], &sym));
        }

        debug!(
            "announce `{}': new symbol under {}",
            sym.identifier,
            conds.display(c_new)
        );
        let index = self.symbols.len();
        self.symbols.push(sym);
        self.by_key.entry(key).or_default().push(index);
        (index, diags)
    }

    pub fn get(&self, index: usize) -> &Symbol {
        &self.symbols[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Symbol {
        &mut self.symbols[index]
    }
}

fn conflict(existing: &Symbol, arising: &Symbol) -> Diagnostic {
    Diagnostic::error(
        arising.declarations.first().or(arising.definitions.first()).copied(),
        format!(
            "conflicting symbols at {}: {} {} vs {} {}",
            arising.identifier,
            existing.family,
            existing.type_info,
            arising.family,
            arising.type_info
        ),
    )
}
