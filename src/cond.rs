//! Symbolic boolean conditions over preprocessor predicates.
//!
//! Every compilation branch and every indexed symbol is labelled with a
//! [`Cond`]: the boolean combination of preprocessor facts under which it
//! exists. Conditions are managed by a [`Conditions`] table, a reduced
//! ordered BDD with complemented low edges and a hash-consing unique table.
//! Canonicity makes equivalence a pointer comparison and keeps implication
//! exact, so the consolidator never misses a join it is entitled to.
//!
//! # Example
//!
//! ```
//! use cbranch::cond::Conditions;
//!
//! let conds = Conditions::new();
//! let a = conds.defined("A");
//! let b = conds.defined("B");
//!
//! let both = conds.conjunction(a, b);
//! assert!(conds.implies(both, a));
//! assert!(!conds.implies(a, both));
//!
//! // A ∨ (¬A ∧ B) collapses to A ∨ B:
//! let not_a_and_b = conds.conjunction(conds.complement(a), b);
//! let either = conds.disjunction(a, not_a_and_b);
//! assert!(conds.equivalent(either, conds.disjunction(a, b)));
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::ops::Neg;

use log::debug;

/// A single preprocessor-level fact, compared structurally.
///
/// `#ifdef X` and `#if defined(X)` intern to the same [`Atom::Defined`];
/// `#if X` interns a distinct [`Atom::Value`] (the macro expands to a
/// truthy value), and `#if X == 3` a [`Atom::Cmp`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Atom {
    /// `defined(NAME)`
    Defined(String),
    /// `NAME` evaluates truthy in a `#if` expression.
    Value(String),
    /// `EXPR == k` for an integer `k`.
    Cmp(String, i64),
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Defined(name) => write!(f, "defined({})", name),
            Atom::Value(name) => write!(f, "{}", name),
            Atom::Cmp(expr, k) => write!(f, "{} == {}", expr, k),
        }
    }
}

/// A lightweight reference to a condition.
///
/// Packs a node index and a complement bit. Negation is free and two
/// conditions are equivalent iff their `Cond` handles are equal.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct Cond(u32);

impl Cond {
    /// The unconditional condition ⊤.
    pub const TOP: Self = Self::new(1, false);
    /// The unsatisfiable condition ⊥.
    pub const BOTTOM: Self = Self::new(1, true);

    const fn new(index: u32, negated: bool) -> Self {
        Self((index << 1) | negated as u32)
    }

    pub(crate) const fn index(self) -> u32 {
        self.0 >> 1
    }

    pub(crate) const fn is_negated(self) -> bool {
        (self.0 & 1) != 0
    }

    const fn is_terminal(self) -> bool {
        self.index() == 1
    }
}

// -Cond
impl Neg for Cond {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self(self.0 ^ 1)
    }
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", if self.is_negated() { "~" } else { "" }, self.index())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
struct Node {
    var: u32,
    low: Cond,
    high: Cond,
}

#[derive(Debug, Default)]
struct Tables {
    /// Node arena. Index 0 is a sentinel, index 1 the terminal.
    nodes: Vec<Node>,
    /// Hash-consing table: (var, low, high) -> node index.
    unique: HashMap<(u32, Cond, Cond), u32>,
    ite_cache: HashMap<(Cond, Cond, Cond), Cond>,
    /// Interned atoms; variable `v` is `atoms[v - 1]`.
    atoms: Vec<Atom>,
    atom_vars: HashMap<Atom, u32>,
}

/// The condition manager: owns the node storage, the unique table, the
/// operation cache, and the atom interner. All conditions arising in one
/// translation unit share a single table.
pub struct Conditions {
    inner: RefCell<Tables>,
}

impl Default for Conditions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Conditions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.inner.borrow();
        f.debug_struct("Conditions")
            .field("nodes", &t.nodes.len())
            .field("atoms", &t.atoms.len())
            .finish()
    }
}

impl Conditions {
    pub fn new() -> Self {
        let mut tables = Tables::default();
        tables.nodes.push(Node { var: u32::MAX, low: Cond::TOP, high: Cond::TOP }); // sentinel
        tables.nodes.push(Node { var: u32::MAX, low: Cond::TOP, high: Cond::TOP }); // terminal
        Self { inner: RefCell::new(tables) }
    }

    /// The unconditional condition ⊤.
    pub fn top(&self) -> Cond {
        Cond::TOP
    }

    /// The unsatisfiable condition ⊥.
    pub fn bottom(&self) -> Cond {
        Cond::BOTTOM
    }

    pub fn is_top(&self, c: Cond) -> bool {
        c == Cond::TOP
    }

    pub fn is_bottom(&self, c: Cond) -> bool {
        c == Cond::BOTTOM
    }

    /// Interns `atom` and returns the condition that holds iff it is true.
    pub fn atom(&self, atom: Atom) -> Cond {
        let mut t = self.inner.borrow_mut();
        let var = match t.atom_vars.get(&atom) {
            Some(&v) => v,
            None => {
                let v = t.atoms.len() as u32 + 1;
                t.atoms.push(atom.clone());
                t.atom_vars.insert(atom, v);
                debug!("interned atom {} as x{}", t.atoms[v as usize - 1], v);
                v
            }
        };
        Tables::mk_node(&mut t, var, Cond::BOTTOM, Cond::TOP)
    }

    /// Shorthand for the `defined(NAME)` atom.
    pub fn defined(&self, name: &str) -> Cond {
        self.atom(Atom::Defined(name.to_string()))
    }

    /// Shorthand for the truthy-value atom `NAME`.
    pub fn value(&self, name: &str) -> Cond {
        self.atom(Atom::Value(name.to_string()))
    }

    /// Shorthand for the comparison atom `EXPR == k`.
    pub fn cmp(&self, expr: &str, k: i64) -> Cond {
        self.atom(Atom::Cmp(expr.to_string(), k))
    }

    /// `a ∧ b`
    pub fn conjunction(&self, a: Cond, b: Cond) -> Cond {
        let mut t = self.inner.borrow_mut();
        Tables::ite(&mut t, a, b, Cond::BOTTOM)
    }

    /// `a ∨ b`
    pub fn disjunction(&self, a: Cond, b: Cond) -> Cond {
        let mut t = self.inner.borrow_mut();
        Tables::ite(&mut t, a, Cond::TOP, b)
    }

    /// `¬a`
    pub fn complement(&self, a: Cond) -> Cond {
        -a
    }

    /// `¬c1 ∧ ¬c2 ∧ …` over the conditions collected so far by a
    /// conditional chain. Gates `#elif`/`#else` branches.
    pub fn complement_of_all(&self, siblings: &[Cond]) -> Cond {
        let mut acc = Cond::TOP;
        for &c in siblings {
            acc = self.conjunction(acc, -c);
        }
        acc
    }

    /// True iff `a` implies `b` in every assignment. Exact.
    pub fn implies(&self, a: Cond, b: Cond) -> bool {
        self.conjunction(a, -b) == Cond::BOTTOM
    }

    /// True iff `a` and `b` denote the same boolean function. Exact,
    /// reflexive, symmetric: canonicity reduces it to handle equality.
    pub fn equivalent(&self, a: Cond, b: Cond) -> bool {
        a == b
    }

    /// Evaluates `c` under an assignment of truth values to variables
    /// (`assignment[v - 1]` is the value of variable `v`).
    pub fn evaluate(&self, c: Cond, assignment: &[bool]) -> bool {
        let t = self.inner.borrow();
        let mut node = c;
        loop {
            if node == Cond::TOP {
                return true;
            }
            if node == Cond::BOTTOM {
                return false;
            }
            let n = t.nodes[node.index() as usize];
            let (low, high) = if node.is_negated() {
                (-n.low, -n.high)
            } else {
                (n.low, n.high)
            };
            node = if assignment[n.var as usize - 1] { high } else { low };
        }
    }

    /// Number of interned atoms (the variable universe so far).
    pub fn num_atoms(&self) -> usize {
        self.inner.borrow().atoms.len()
    }

    /// The cubes of `c`: each is a conjunction of (atom, polarity) pairs,
    /// and `c` is their disjunction. ⊤ yields one empty cube, ⊥ none.
    pub fn cubes(&self, c: Cond) -> Vec<Vec<(Atom, bool)>> {
        let t = self.inner.borrow();
        let mut out = Vec::new();
        let mut path = Vec::new();
        Tables::collect_cubes(&t, c, &mut path, &mut out);
        out
    }

    /// Renders `c` as a disjunction of conjunction cubes over atom names.
    pub fn display(&self, c: Cond) -> String {
        if c == Cond::TOP {
            return "1".to_string();
        }
        if c == Cond::BOTTOM {
            return "0".to_string();
        }
        let cubes = self.cubes(c);
        let mut parts = Vec::with_capacity(cubes.len());
        for cube in cubes {
            let lits: Vec<String> = cube
                .iter()
                .map(|(atom, pos)| match (atom, pos) {
                    (a, true) => a.to_string(),
                    (Atom::Defined(name), false) => format!("!defined({})", name),
                    (Atom::Value(name), false) => format!("!{}", name),
                    (Atom::Cmp(expr, k), false) => format!("{} != {}", expr, k),
                })
                .collect();
            parts.push(lits.join(" && "));
        }
        parts.join(" || ")
    }
}

impl Tables {
    fn mk_node(t: &mut Tables, var: u32, low: Cond, high: Cond) -> Cond {
        // Canonicity: the high edge is never complemented.
        if high.is_negated() {
            return -Self::mk_node(t, var, -low, -high);
        }
        // Redundant test.
        if low == high {
            return low;
        }
        if let Some(&index) = t.unique.get(&(var, low, high)) {
            return Cond::new(index, false);
        }
        let index = t.nodes.len() as u32;
        t.nodes.push(Node { var, low, high });
        t.unique.insert((var, low, high), index);
        debug!("mk_node(x{}, {}, {}) -> @{}", var, low, high, index);
        Cond::new(index, false)
    }

    fn var_of(t: &Tables, c: Cond) -> u32 {
        t.nodes[c.index() as usize].var
    }

    /// Cofactors of `c` with respect to the top variable `v`.
    fn top_cofactors(t: &Tables, c: Cond, v: u32) -> (Cond, Cond) {
        if c.is_terminal() || v < Self::var_of(t, c) {
            return (c, c);
        }
        debug_assert_eq!(v, Self::var_of(t, c));
        let n = t.nodes[c.index() as usize];
        if c.is_negated() {
            (-n.low, -n.high)
        } else {
            (n.low, n.high)
        }
    }

    /// `ITE(f, g, h) = (f ∧ g) ∨ (¬f ∧ h)`
    fn ite(t: &mut Tables, f: Cond, g: Cond, h: Cond) -> Cond {
        // Terminal cases.
        if f == Cond::TOP {
            return g;
        }
        if f == Cond::BOTTOM {
            return h;
        }
        if g == h {
            return g;
        }
        if g == Cond::TOP && h == Cond::BOTTOM {
            return f;
        }
        if g == Cond::BOTTOM && h == Cond::TOP {
            return -f;
        }

        // Standard triples.
        if g == f {
            return Self::ite(t, f, Cond::TOP, h);
        }
        if g == -f {
            return Self::ite(t, f, Cond::BOTTOM, h);
        }
        if h == f {
            return Self::ite(t, f, g, Cond::BOTTOM);
        }
        if h == -f {
            return Self::ite(t, f, g, Cond::TOP);
        }

        // Normalize so that f, then g, is regular.
        let (mut f, mut g, mut h) = (f, g, h);
        if f.is_negated() {
            f = -f;
            std::mem::swap(&mut g, &mut h);
        }
        let mut negate = false;
        if g.is_negated() {
            negate = true;
            g = -g;
            h = -h;
        }

        if let Some(&res) = t.ite_cache.get(&(f, g, h)) {
            return if negate { -res } else { res };
        }

        // Top variable among the non-terminal arguments.
        let mut m = Self::var_of(t, f);
        if !g.is_terminal() {
            m = m.min(Self::var_of(t, g));
        }
        if !h.is_terminal() {
            m = m.min(Self::var_of(t, h));
        }

        let (f0, f1) = Self::top_cofactors(t, f, m);
        let (g0, g1) = Self::top_cofactors(t, g, m);
        let (h0, h1) = Self::top_cofactors(t, h, m);

        let low = Self::ite(t, f0, g0, h0);
        let high = Self::ite(t, f1, g1, h1);
        let res = Self::mk_node(t, m, low, high);

        t.ite_cache.insert((f, g, h), res);
        if negate {
            -res
        } else {
            res
        }
    }

    fn collect_cubes(
        t: &Tables,
        c: Cond,
        path: &mut Vec<(u32, bool)>,
        out: &mut Vec<Vec<(Atom, bool)>>,
    ) {
        if c == Cond::BOTTOM {
            return;
        }
        if c == Cond::TOP {
            out.push(
                path.iter()
                    .map(|&(v, pos)| (t.atoms[v as usize - 1].clone(), pos))
                    .collect(),
            );
            return;
        }
        let v = Self::var_of(t, c);
        let (low, high) = Self::top_cofactors(t, c, v);
        path.push((v, false));
        Self::collect_cubes(t, low, path, out);
        path.pop();
        path.push((v, true));
        Self::collect_cubes(t, high, path, out);
        path.pop();
    }
}
