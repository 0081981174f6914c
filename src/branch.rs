//! Compilation branches: the fork/join state machine.
//!
//! When the parser meets a preprocessor conditional it forks its state
//! into branches and parses each one independently; branches whose
//! parser state has reconverged are joined back under the disjunction of
//! their conditions. Branches are owned nodes in an arena indexed by
//! [`BranchId`]; a child refers to its parent by id, the parent owns its
//! `forks` list, and no threads are involved — the tree is walked
//! deterministically by the driver.
//!
//! Two branches that agree in every observable parser dimension are
//! indistinguishable going forward; merging them under the disjunction
//! of their conditions bounds the combinatorial explosion and yields
//! unified symbol existence conditions.

use log::{debug, warn};

use crate::cond::{Cond, Conditions};
use crate::pending::PendingTokens;
use crate::scope::ScopeStack;
use crate::token::{Loc, Token};
use crate::track::Track;

/// Arena index of a branch.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct BranchId(u32);

impl BranchId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// The code element whose parsing caused a branch to be created.
#[derive(Debug, Clone, PartialEq)]
pub enum Adducer {
    Root,
    Directive { name: String, loc: Loc },
    Join { first: String, second: String },
}

/// An in-progress `#define` absorbing the rest of its directive line.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MacroCollect {
    pub start: Loc,
    pub name: Option<String>,
    pub name_loc: Option<Loc>,
    /// No whitespace between the name and what follows: a `(` next
    /// makes the macro function-like.
    pub name_glued: bool,
    pub function_like: bool,
    /// Still inside the parameter parentheses.
    pub in_params: bool,
    pub params: Vec<String>,
    pub replacement: Vec<Token>,
}

impl MacroCollect {
    pub fn new(start: Loc) -> Self {
        Self {
            start,
            name: None,
            name_loc: None,
            name_glued: false,
            function_like: false,
            in_params: false,
            params: Vec::new(),
            replacement: Vec::new(),
        }
    }
}

/// An in-progress code element that temporarily absorbs incoming tokens
/// instead of letting them drive the parser state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Requester {
    MacroDef(MacroCollect),
}

#[derive(Debug, Clone)]
pub struct Branch {
    /// Ancestry path: `"*"` for the root, `"*:1"`, `"*:1:3"` below it.
    pub label: String,
    pub parent: Option<BranchId>,
    /// The additional condition gating this branch relative to its parent.
    pub branching_condition: Cond,
    /// Cached conjunction of every ancestor condition with
    /// `branching_condition`.
    pub conditions: Cond,
    pub forks: Vec<BranchId>,
    pub adducer: Adducer,
    pub pending: PendingTokens,
    pub scopes: ScopeStack,
    pub token_requester: Option<Requester>,
    pub active: bool,
    /// Dead-ended: never reactivated, contributes no symbols.
    pub failed: bool,
}

impl Branch {
    /// True iff the observable parser state equals `other`'s: the
    /// precondition for joining.
    fn state_equal(&self, other: &Branch) -> bool {
        self.pending == other.pending
            && self.scopes == other.scopes
            && self.token_requester == other.token_requester
    }
}

/// The branch tree of one translation unit.
#[derive(Debug)]
pub struct BranchTree {
    arena: Vec<Branch>,
    root: BranchId,
}

impl BranchTree {
    /// Creates the tree with its root branch `"*"` gated on
    /// `root_condition` (⊤, or an assumption supplied by the caller).
    pub fn new(root_condition: Cond) -> Self {
        let root = Branch {
            label: "*".to_string(),
            parent: None,
            branching_condition: root_condition,
            conditions: root_condition,
            forks: Vec::new(),
            adducer: Adducer::Root,
            pending: PendingTokens::new(),
            scopes: ScopeStack::new(),
            token_requester: None,
            active: true,
            failed: false,
        };
        Self { arena: vec![root], root: BranchId(0) }
    }

    pub fn root(&self) -> BranchId {
        self.root
    }

    pub fn get(&self, id: BranchId) -> &Branch {
        &self.arena[id.index()]
    }

    pub fn get_mut(&mut self, id: BranchId) -> &mut Branch {
        &mut self.arena[id.index()]
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Every active leaf of the subtree under `id`, in document order of
    /// creation: the set that actually consumes tokens.
    pub fn active_branches(&self, id: BranchId) -> Vec<BranchId> {
        let mut out = Vec::new();
        self.collect_active(id, &mut out);
        out
    }

    fn collect_active(&self, id: BranchId, out: &mut Vec<BranchId>) {
        let branch = self.get(id);
        if branch.active {
            out.push(id);
        }
        for &fork in &branch.forks {
            self.collect_active(fork, out);
        }
    }

    /// True iff any branch in the subtree under the forks of `id` is
    /// still active.
    fn has_live_forks(&self, id: BranchId) -> bool {
        self.get(id)
            .forks
            .iter()
            .any(|&f| self.get(f).active || self.has_live_forks(f))
    }

    pub fn activate(&mut self, track: &mut Track, id: BranchId) {
        let branch = self.get_mut(id);
        if !branch.active {
            branch.active = true;
            debug!("activate {}", self.get(id).label);
            track.activate(&self.get(id).label);
        }
    }

    pub fn deactivate(&mut self, track: &mut Track, id: BranchId) {
        let branch = self.get_mut(id);
        if branch.active {
            branch.active = false;
            debug!("deactivate {}", self.get(id).label);
            track.deactivate(&self.get(id).label);
        }
    }

    /// Dead-ends a branch: it stops consuming tokens and contributes no
    /// further symbols. Siblings are unaffected.
    pub fn fail(&mut self, track: &mut Track, id: BranchId, reason: &str) {
        warn!("branch {} failed: {}", self.get(id).label, reason);
        self.get_mut(id).failed = true;
        self.deactivate(track, id);
    }

    /// Creates a child gated on `gate`, inheriting copies of the parent's
    /// parser state. The caller decides whether the parent keeps
    /// consuming tokens (it normally deactivates on the same directive).
    pub fn fork(
        &mut self,
        conds: &Conditions,
        track: &mut Track,
        parent: BranchId,
        gate: Cond,
        adducer: Adducer,
    ) -> BranchId {
        let p = self.get(parent);
        let label = format!("{}:{}", p.label, p.forks.len() + 1);
        let child = Branch {
            label: label.clone(),
            parent: Some(parent),
            branching_condition: gate,
            conditions: conds.conjunction(p.conditions, gate),
            forks: Vec::new(),
            adducer,
            pending: p.pending.clone(),
            scopes: p.scopes.clone(),
            token_requester: p.token_requester.clone(),
            active: true,
            failed: false,
        };
        let id = BranchId(self.arena.len() as u32);
        debug!(
            "fork {} -> {} under {}",
            self.get(parent).label,
            label,
            conds.display(gate)
        );
        track.fork(&self.get(parent).label, &label, &conds.display(gate));
        self.arena.push(child);
        self.get_mut(parent).forks.push(id);
        id
    }

    /// True iff `a` and `b` can be joined: both active, neither with live
    /// sub-forks, and their parser state triples compare equal.
    pub fn join_possible(&self, a: BranchId, b: BranchId) -> bool {
        let (ba, bb) = (self.get(a), self.get(b));
        ba.active
            && bb.active
            && !self.has_live_forks(a)
            && !self.has_live_forks(b)
            && ba.state_equal(bb)
    }

    /// Joins two sibling branches into a new branch gated on the
    /// disjunction of their conditions. Either operand's parser state is
    /// valid for the joint branch since they are identical by
    /// precondition.
    pub fn try_join(
        &mut self,
        conds: &Conditions,
        track: &mut Track,
        a: BranchId,
        b: BranchId,
    ) -> Option<BranchId> {
        if !self.join_possible(a, b) {
            return None;
        }
        let parent = self.get(a).parent?;
        debug_assert_eq!(self.get(b).parent, Some(parent));

        let gate = conds.disjunction(
            self.get(a).branching_condition,
            self.get(b).branching_condition,
        );
        let p = self.get(parent);
        let label = format!("{}:{}", p.label, p.forks.len() + 1);
        let joint = Branch {
            label: label.clone(),
            parent: Some(parent),
            branching_condition: gate,
            conditions: conds.conjunction(p.conditions, gate),
            forks: Vec::new(),
            adducer: Adducer::Join {
                first: self.get(a).label.clone(),
                second: self.get(b).label.clone(),
            },
            pending: self.get(a).pending.clone(),
            scopes: self.get(a).scopes.clone(),
            token_requester: self.get(a).token_requester.clone(),
            active: true,
            failed: false,
        };
        let id = BranchId(self.arena.len() as u32);
        debug!(
            "join {} + {} -> {} under {}",
            self.get(a).label,
            self.get(b).label,
            label,
            conds.display(gate)
        );
        track.join(
            &self.get(a).label,
            &self.get(b).label,
            &label,
            &conds.display(gate),
        );
        self.arena.push(joint);
        self.get_mut(parent).forks.push(id);
        self.deactivate(track, a);
        self.deactivate(track, b);
        Some(id)
    }

    /// Absorbs the single remaining active fork of `id` back into `id`
    /// when that fork no longer excludes anything `id` admits, clearing
    /// the fork list and reactivating `id`.
    pub fn try_join_forks(
        &mut self,
        conds: &Conditions,
        track: &mut Track,
        id: BranchId,
    ) -> bool {
        let active_forks: Vec<BranchId> = self
            .get(id)
            .forks
            .iter()
            .copied()
            .filter(|&f| self.get(f).active)
            .collect();

        if self.get(id).forks.is_empty() {
            return false;
        }

        if active_forks.is_empty() {
            if self.has_live_forks(id) {
                return false;
            }
            // Every fork dead-ended; the branch resumes from its own
            // pre-fork state.
            warn!(
                "all forks of {} dead-ended, resuming parent",
                self.get(id).label
            );
            self.get_mut(id).forks.clear();
            self.activate(track, id);
            return true;
        }

        let &[fork] = &active_forks[..] else { return false };
        if self.has_live_forks(fork) {
            return false;
        }
        let gated = conds.conjunction(self.get(id).conditions, self.get(fork).branching_condition);
        if !conds.equivalent(gated, self.get(id).conditions) {
            return false;
        }

        debug!(
            "join_forks: absorbing {} into {}",
            self.get(fork).label,
            self.get(id).label
        );
        let (pending, scopes, requester) = {
            let f = self.get(fork);
            (f.pending.clone(), f.scopes.clone(), f.token_requester.clone())
        };
        let from_label = self.get(fork).label.clone();
        self.deactivate(track, fork);
        let branch = self.get_mut(id);
        branch.pending = pending;
        branch.scopes = scopes;
        branch.token_requester = requester;
        branch.forks.clear();
        track.join_forks(&self.get(id).label, &from_label);
        self.activate(track, id);
        true
    }

    /// One bottom-up consolidation pass over the subtree under `id`:
    /// joins adjacent active sibling pairs, then collapses a single
    /// remaining fork. Returns whether any join occurred; the driver
    /// iterates to a fixed point.
    pub fn consolidate_branches(
        &mut self,
        conds: &Conditions,
        track: &mut Track,
        id: BranchId,
    ) -> bool {
        let mut progress = false;

        for fork in self.get(id).forks.clone() {
            progress |= self.consolidate_branches(conds, track, fork);
        }

        loop {
            let active: Vec<BranchId> = self
                .get(id)
                .forks
                .iter()
                .copied()
                .filter(|&f| self.get(f).active)
                .collect();
            let mut joined = false;
            for pair in active.windows(2) {
                if self.try_join(conds, track, pair[0], pair[1]).is_some() {
                    progress = true;
                    joined = true;
                    break;
                }
            }
            if !joined {
                break;
            }
        }

        progress |= self.try_join_forks(conds, track, id);
        progress
    }

    /// Asserts the accumulation invariant: every branch's `conditions`
    /// is the conjunction of its parent's `conditions` with its own
    /// `branching_condition`.
    pub fn check_condition_accumulation(&self, conds: &Conditions) {
        for branch in &self.arena {
            if let Some(parent) = branch.parent {
                let expected =
                    conds.conjunction(self.get(parent).conditions, branch.branching_condition);
                assert!(
                    conds.equivalent(branch.conditions, expected),
                    "condition accumulation broken at {}",
                    branch.label
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Conditions, Track, BranchTree) {
        (Conditions::new(), Track::new(), BranchTree::new(Cond::TOP))
    }

    fn directive(name: &str) -> Adducer {
        Adducer::Directive { name: name.to_string(), loc: Loc::new(1, 1) }
    }

    #[test]
    fn test_labels_follow_ancestry() {
        let (conds, mut track, mut tree) = setup();
        let a = conds.defined("A");
        let root = tree.root();

        let c1 = tree.fork(&conds, &mut track, root, a, directive("#if"));
        let c2 = tree.fork(&conds, &mut track, root, -a, directive("#else"));
        let g = tree.fork(&conds, &mut track, c1, conds.defined("B"), directive("#if"));

        assert_eq!(tree.get(root).label, "*");
        assert_eq!(tree.get(c1).label, "*:1");
        assert_eq!(tree.get(c2).label, "*:2");
        assert_eq!(tree.get(g).label, "*:1:1");
        tree.check_condition_accumulation(&conds);
    }

    #[test]
    fn test_fork_then_join_identity() {
        // P3: fork into complementary children, mutate nothing, and
        // consolidation restores a single active branch in the pre-fork
        // state.
        let (conds, mut track, mut tree) = setup();
        let a = conds.defined("A");
        let root = tree.root();

        let c1 = tree.fork(&conds, &mut track, root, a, directive("#if"));
        let c2 = tree.fork(&conds, &mut track, root, -a, directive("#else"));
        tree.deactivate(&mut track, root);

        assert_eq!(tree.active_branches(root), vec![c1, c2]);
        while tree.consolidate_branches(&conds, &mut track, root) {}

        assert_eq!(tree.active_branches(root), vec![root]);
        assert!(tree.get(root).forks.is_empty());
        assert!(tree.get(root).pending.is_empty());
        tree.check_condition_accumulation(&conds);
    }

    #[test]
    fn test_join_requires_equal_state() {
        let (conds, mut track, mut tree) = setup();
        let a = conds.defined("A");
        let root = tree.root();

        let c1 = tree.fork(&conds, &mut track, root, a, directive("#if"));
        let c2 = tree.fork(&conds, &mut track, root, -a, directive("#else"));
        tree.deactivate(&mut track, root);

        tree.get_mut(c1)
            .pending
            .push(Token::new(crate::token::TokenKind::Identifier, "int", Loc::new(2, 1)));

        assert!(!tree.join_possible(c1, c2));
        while tree.consolidate_branches(&conds, &mut track, root) {}
        assert_eq!(tree.active_branches(root), vec![c1, c2]);
    }

    #[test]
    fn test_join_condition_is_disjunction() {
        let (conds, mut track, mut tree) = setup();
        let a = conds.value("A");
        let b = conds.value("B");
        let root = tree.root();

        let c1 = tree.fork(&conds, &mut track, root, a, directive("#if"));
        let second = conds.conjunction(-a, b);
        let c2 = tree.fork(&conds, &mut track, root, second, directive("#elif"));
        tree.deactivate(&mut track, root);

        let joint = tree.try_join(&conds, &mut track, c1, c2).unwrap();
        let expected = conds.disjunction(a, b);
        assert!(conds.equivalent(tree.get(joint).branching_condition, expected));
        assert!(!tree.get(c1).active);
        assert!(!tree.get(c2).active);
        tree.check_condition_accumulation(&conds);
    }

    #[test]
    fn test_partial_conditional_does_not_absorb() {
        // A lone `#if A` fork (no else, states diverged) must not be
        // absorbed into the parent: it still excludes ¬A.
        let (conds, mut track, mut tree) = setup();
        let a = conds.defined("A");
        let root = tree.root();

        let c1 = tree.fork(&conds, &mut track, root, a, directive("#if"));
        tree.deactivate(&mut track, root);
        tree.get_mut(c1)
            .pending
            .push(Token::new(crate::token::TokenKind::Identifier, "int", Loc::new(2, 1)));

        assert!(!tree.try_join_forks(&conds, &mut track, root));
        assert_eq!(tree.active_branches(root), vec![c1]);
    }

    #[test]
    fn test_all_forks_failed_resumes_parent() {
        let (conds, mut track, mut tree) = setup();
        let a = conds.defined("A");
        let root = tree.root();

        let c1 = tree.fork(&conds, &mut track, root, a, directive("#if"));
        tree.deactivate(&mut track, root);
        tree.fail(&mut track, c1, "lexical error");

        while tree.consolidate_branches(&conds, &mut track, root) {}
        assert_eq!(tree.active_branches(root), vec![root]);
        assert!(tree.get(root).forks.is_empty());
    }
}
